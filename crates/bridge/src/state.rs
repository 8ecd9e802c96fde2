//! Shared gateway state: the credential pool and upstream HTTP client, constructed once and
//! handed to every handler behind an `Arc`.

use std::sync::Arc;

use config::{CredentialConfig, UpstreamConfig};

use crate::credentials::CredentialPool;
use crate::error::GatewayError;
use crate::upstream::UpstreamClient;

/// The error budget handed to every [`crate::frame::FrameDecoder`] this gateway constructs.
pub const MAX_FRAME_ERRORS: usize = 16;

/// Everything a request handler needs: the credential pool and the upstream HTTP client.
pub struct GatewayState {
    pool: Arc<CredentialPool>,
    upstream: UpstreamClient,
    model_id: String,
}

impl GatewayState {
    /// Builds the pool and upstream client from configuration and spawns the pool's sweep task.
    /// Performs no network I/O itself; credentials are refreshed lazily on first use.
    pub fn new(upstream: UpstreamConfig, credentials: Vec<CredentialConfig>) -> Result<Self, GatewayError> {
        let model_id = upstream.model_id.clone();
        let endpoint = upstream.endpoint.clone();

        let pool = Arc::new(CredentialPool::new(upstream, credentials)?);
        pool.spawn_sweep();

        Ok(Self {
            pool,
            upstream: UpstreamClient::new(endpoint),
            model_id,
        })
    }

    /// The model identifier advertised by `GET /v1/models`.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub(crate) fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub(crate) fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    /// Stops the background sweep task and releases all cached access tokens.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
