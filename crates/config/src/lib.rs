//! Gateway configuration structures mapping the gateway's TOML configuration file.

#![deny(missing_docs)]

mod credentials;
mod error;
mod loader;
mod server;
mod upstream;

use serde::Deserialize;

pub use credentials::CredentialConfig;
pub use error::Error;
pub use loader::load;
pub use server::ServerConfig;
pub use upstream::UpstreamConfig;

/// Top-level gateway configuration, deserialized from the TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server settings: listen address, client auth secret, log filter.
    pub server: ServerConfig,
    /// Where converted requests are sent and where credentials are refreshed and probed.
    pub upstream: UpstreamConfig,
    /// The pool of refresh-token-backed identities the gateway rotates through.
    pub credentials: Vec<CredentialConfig>,
}

impl Config {
    /// Validates cross-field invariants that a plain `Deserialize` cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.credentials.is_empty() && self.credentials.iter().all(|c| c.disabled()) {
            return Err(Error::Validation(
                "at least one credential pool entry must be enabled".to_string(),
            ));
        }

        if self.server.client_secret_is_empty() {
            return Err(Error::Validation("server.client_secret must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_credentials() {
        let config = Config::default();
        assert!(config.credentials.is_empty());
    }

    #[test]
    fn validate_rejects_all_disabled_credentials() {
        let toml = indoc::indoc! {r#"
            [server]
            client_secret = "s3cr3t"

            [[credentials]]
            auth = "Social"
            refreshToken = "rt"
            disabled = true
        "#};

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_one_enabled_credential() {
        let toml = indoc::indoc! {r#"
            [server]
            client_secret = "s3cr3t"

            [[credentials]]
            auth = "Social"
            refreshToken = "rt"
        "#};

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
    }
}
