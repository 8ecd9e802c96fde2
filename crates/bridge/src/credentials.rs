//! Credential pool: round-robin selection across refresh-token-backed identities, with
//! single-flight access-token refresh and quota-based exhaustion tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use config::{CredentialConfig, UpstreamConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::error::GatewayError;

struct CachedToken {
    access_token: SecretString,
    cached_at: Instant,
    expires_at: Instant,
    available_quota: i64,
    last_used: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }

    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        self.expires_at <= now || now.saturating_duration_since(self.cached_at) >= ttl
    }
}

struct PoolEntry {
    config: CredentialConfig,
    cache: Mutex<Option<CachedToken>>,
    exhausted: AtomicBool,
}

/// A credential handed out by [`CredentialPool::select`] for one upstream call.
pub struct SelectedCredential {
    pub access_token: SecretString,
    pub index: usize,
    pub available_before: i64,
    pub exceeded: bool,
}

/// The shared, process-wide pool of upstream credentials.
pub struct CredentialPool {
    entries: Vec<PoolEntry>,
    cursor: AtomicUsize,
    http: reqwest::Client,
    upstream: UpstreamConfig,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expiresIn")]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    #[serde(rename = "usageBreakdownList", default)]
    usage_breakdown_list: Vec<UsageBreakdown>,
}

#[derive(Debug, Deserialize)]
struct UsageBreakdown {
    #[serde(rename = "resourceType")]
    resource_type: String,
    #[serde(rename = "usageLimitWithPrecision", default)]
    usage_limit_with_precision: f64,
    #[serde(rename = "currentUsageWithPrecision", default)]
    current_usage_with_precision: f64,
    #[serde(rename = "freeTrialInfo", default)]
    free_trial_info: Option<FreeTrialInfo>,
}

#[derive(Debug, Deserialize)]
struct FreeTrialInfo {
    #[serde(rename = "freeTrialStatus")]
    free_trial_status: String,
    #[serde(rename = "usageLimitWithPrecision", default)]
    usage_limit_with_precision: f64,
    #[serde(rename = "currentUsageWithPrecision", default)]
    current_usage_with_precision: f64,
}

impl CredentialPool {
    /// Builds the pool from configuration. Does not perform any network I/O; tokens are
    /// refreshed lazily on first use.
    pub fn new(upstream: UpstreamConfig, credentials: Vec<CredentialConfig>) -> Result<Self, GatewayError> {
        if credentials.is_empty() {
            return Err(GatewayError::InvalidRequest("no credentials configured".to_string()));
        }

        let entries = credentials
            .into_iter()
            .map(|config| PoolEntry {
                config,
                cache: Mutex::new(None),
                exhausted: AtomicBool::new(false),
            })
            .collect();

        Ok(Self {
            entries,
            cursor: AtomicUsize::new(0),
            http: reqwest::Client::new(),
            upstream,
            sweep_task: Mutex::new(None),
        })
    }

    /// Spawns the periodic sweep that evicts stale cache entries. Safe to call once per pool.
    pub fn spawn_sweep(self: &Arc<Self>) {
        let pool = self.clone();
        let interval = Duration::from_secs(self.upstream.sweep_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.sweep().await;
            }
        });

        tokio::spawn({
            let sweep_task = self.sweep_task_handle();
            async move {
                *sweep_task.lock().await = Some(handle);
            }
        });
    }

    fn sweep_task_handle(&self) -> &Mutex<Option<JoinHandle<()>>> {
        &self.sweep_task
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let ttl = Duration::from_secs(self.upstream.token_cache_ttl_secs);

        for entry in &self.entries {
            let mut cache = entry.cache.lock().await;
            if let Some(token) = cache.as_ref()
                && token.is_stale(now, ttl)
            {
                *cache = None;
                // A swept entry gets a fully fresh `get_or_refresh` (new token, new quota
                // probe) on its next selection; re-enter that path instead of leaving the
                // entry permanently exhausted from a quota reading that's now stale.
                entry.exhausted.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Cancels the sweep task and releases all cached tokens. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweep_task.lock().await.take() {
            handle.abort();
        }

        for entry in &self.entries {
            *entry.cache.lock().await = None;
        }
    }

    /// Selects the next credential in round-robin order, refreshing its access token if
    /// necessary and skipping entries that are disabled or already known to be exhausted.
    pub async fn select(&self) -> Result<SelectedCredential, GatewayError> {
        let n = self.entries.len();

        for _ in 0..n {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst) % n;
            let entry = &self.entries[index];

            if entry.config.disabled() || entry.exhausted.load(Ordering::SeqCst) {
                continue;
            }

            match self.get_or_refresh(index).await {
                Ok(()) => {
                    let mut cache = entry.cache.lock().await;
                    let Some(cached) = cache.as_mut() else {
                        continue;
                    };

                    let available_before = cached.available_quota;
                    if available_before > 0 {
                        cached.available_quota -= 1;
                    }
                    cached.last_used = Some(Instant::now());
                    let exceeded = available_before <= 0;

                    if exceeded {
                        entry.exhausted.store(true, Ordering::SeqCst);
                    }

                    return Ok(SelectedCredential {
                        access_token: cached.access_token.clone(),
                        index,
                        available_before,
                        exceeded,
                    });
                }
                Err(err) => {
                    log::warn!(
                        "credential refresh failed for index {index}: {err}, advancing to next credential"
                    );
                    entry.exhausted.store(true, Ordering::SeqCst);
                    continue;
                }
            }
        }

        Err(GatewayError::AllCredentialsFailed)
    }

    async fn get_or_refresh(&self, index: usize) -> Result<(), GatewayError> {
        let entry = &self.entries[index];
        let margin = Duration::from_secs(self.upstream.token_refresh_margin_secs);

        let mut cache = entry.cache.lock().await;

        if let Some(token) = cache.as_ref()
            && token.is_fresh(margin)
        {
            return Ok(());
        }

        let (access_token, expires_in) = self.refresh(&entry.config).await?;
        let available_quota = self.probe_quota(&access_token).await.unwrap_or_else(|err| {
            log::warn!("quota probe failed for credential index {index}: {err}");
            0
        });

        *cache = Some(CachedToken {
            access_token: access_token.clone(),
            cached_at: Instant::now(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
            available_quota,
            last_used: None,
        });

        entry.exhausted.store(available_quota <= 0, Ordering::SeqCst);

        log::info!("refreshed credential index {index}, available_quota={available_quota}, expires_in={expires_in}s");

        Ok(())
    }

    async fn refresh(&self, config: &CredentialConfig) -> Result<(SecretString, u64), GatewayError> {
        let (url, body) = match config {
            CredentialConfig::Social { refresh_token, .. } => (
                self.upstream.social_refresh_endpoint.clone(),
                serde_json::json!({ "refreshToken": refresh_token.expose_secret() }),
            ),
            CredentialConfig::IdC {
                refresh_token,
                client_id,
                client_secret,
                ..
            } => (
                self.upstream.idc_refresh_endpoint.clone(),
                serde_json::json!({
                    "clientId": client_id,
                    "clientSecret": client_secret.expose_secret(),
                    "grantType": "refresh_token",
                    "refreshToken": refresh_token.expose_secret(),
                }),
            ),
        };

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::UpstreamTransport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::RefreshFailure(format!("HTTP {status}: {body}")));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::RefreshFailure(err.to_string()))?;

        Ok((SecretString::from(parsed.access_token), parsed.expires_in))
    }

    async fn probe_quota(&self, access_token: &SecretString) -> Result<i64, GatewayError> {
        let response = self
            .http
            .get(self.upstream.quota_endpoint.clone())
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(GatewayError::UpstreamTransport)?;

        if !response.status().is_success() {
            return Err(GatewayError::RefreshFailure(format!(
                "quota probe returned HTTP {}",
                response.status()
            )));
        }

        let parsed: QuotaResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::RefreshFailure(err.to_string()))?;

        let total: f64 = parsed
            .usage_breakdown_list
            .iter()
            .filter(|b| b.resource_type == "CREDIT")
            .map(|b| {
                let base = b.usage_limit_with_precision - b.current_usage_with_precision;
                let trial = b
                    .free_trial_info
                    .as_ref()
                    .filter(|t| t.free_trial_status == "ACTIVE")
                    .map(|t| t.usage_limit_with_precision - t.current_usage_with_precision)
                    .unwrap_or(0.0);
                base + trial
            })
            .sum();

        Ok(total.max(0.0) as i64)
    }
}
