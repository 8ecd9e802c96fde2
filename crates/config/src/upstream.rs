//! Upstream service endpoints: where the gateway sends converted requests and where it
//! refreshes and probes credentials.

use serde::Deserialize;
use url::Url;

/// Upstream endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL the converted request is POSTed to; the response is a binary EventStream.
    pub endpoint: Url,
    /// Model identifier advertised by `GET /v1/models` and sent upstream.
    pub model_id: String,
    /// Refresh endpoint used for `Social` credentials.
    pub social_refresh_endpoint: Url,
    /// Refresh endpoint used for `IdC` credentials.
    pub idc_refresh_endpoint: Url,
    /// Endpoint probed after each refresh to compute remaining quota.
    pub quota_endpoint: Url,
    /// Safety margin subtracted from a cached token's `expires_at` before it is considered stale.
    pub token_refresh_margin_secs: u64,
    /// Interval between credential-pool sweeps that evict expired cache entries.
    pub sweep_interval_secs: u64,
    /// Maximum time a cached token is kept regardless of `expires_at`, bounding how long a pool
    /// entry's memory (token, quota reading) survives between refreshes.
    pub token_cache_ttl_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse("https://upstream.invalid/generate").expect("valid default url"),
            model_id: "upstream-default".to_string(),
            social_refresh_endpoint: Url::parse("https://upstream.invalid/refresh/social").expect("valid default url"),
            idc_refresh_endpoint: Url::parse("https://upstream.invalid/refresh/idc").expect("valid default url"),
            quota_endpoint: Url::parse("https://upstream.invalid/quota").expect("valid default url"),
            token_refresh_margin_secs: 300,
            sweep_interval_secs: 60,
            token_cache_ttl_secs: 3600,
        }
    }
}
