//! HTTP server configuration settings.

use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Shared secret clients must present as a bearer token or `x-api-key` header.
    pub client_secret: SecretString,
    /// Log filter passed to `env_logger`-style filtering, e.g. `info` or `gateway=debug`.
    pub log_filter: String,
}

impl ServerConfig {
    /// Whether the client secret is unset, the default state for a config that hasn't
    /// overridden it from the environment or the file.
    pub fn client_secret_is_empty(&self) -> bool {
        use secrecy::ExposeSecret;
        self.client_secret.expose_secret().is_empty()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            client_secret: SecretString::from(String::new()),
            log_filter: "info".to_string(),
        }
    }
}
