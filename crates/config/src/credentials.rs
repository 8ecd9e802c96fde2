//! Credential pool configuration: a list of refresh-token-backed upstream identities the
//! gateway rotates through.

use secrecy::SecretString;
use serde::Deserialize;

/// A single entry in the credential pool, as read from the `[[credentials]]` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "auth", deny_unknown_fields)]
pub enum CredentialConfig {
    /// Consumer ("Social") refresh flow: only a refresh token is required.
    Social {
        /// The long-lived refresh token.
        #[serde(rename = "refreshToken")]
        refresh_token: SecretString,
        /// Human-readable label shown in logs, never in error responses.
        #[serde(default)]
        description: Option<String>,
        /// When true, this entry is skipped by the pool entirely.
        #[serde(default)]
        disabled: bool,
    },
    /// Identity Center ("IdC") refresh flow: requires a client id/secret pair in addition to
    /// the refresh token.
    IdC {
        /// The long-lived refresh token.
        #[serde(rename = "refreshToken")]
        refresh_token: SecretString,
        /// OAuth client id issued alongside the refresh token.
        #[serde(rename = "clientId")]
        client_id: String,
        /// OAuth client secret issued alongside the refresh token.
        #[serde(rename = "clientSecret")]
        client_secret: SecretString,
        /// Human-readable label shown in logs, never in error responses.
        #[serde(default)]
        description: Option<String>,
        /// When true, this entry is skipped by the pool entirely.
        #[serde(default)]
        disabled: bool,
    },
}

impl CredentialConfig {
    /// Whether this entry has been administratively disabled.
    pub fn disabled(&self) -> bool {
        match self {
            CredentialConfig::Social { disabled, .. } => *disabled,
            CredentialConfig::IdC { disabled, .. } => *disabled,
        }
    }

    /// The human-readable label, if any.
    pub fn description(&self) -> Option<&str> {
        match self {
            CredentialConfig::Social { description, .. } => description.as_deref(),
            CredentialConfig::IdC { description, .. } => description.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        credentials: Vec<CredentialConfig>,
    }

    #[test]
    fn parses_social_entry() {
        let toml = indoc! {r#"
            [[credentials]]
            auth = "Social"
            refreshToken = "rt-abc123"
            description = "primary"
        "#};

        let parsed: Wrapper = toml::from_str(toml).unwrap();
        assert_eq!(parsed.credentials.len(), 1);
        assert_eq!(parsed.credentials[0].description(), Some("primary"));
        assert!(!parsed.credentials[0].disabled());
    }

    #[test]
    fn parses_idc_entry() {
        let toml = indoc! {r#"
            [[credentials]]
            auth = "IdC"
            refreshToken = "rt-xyz"
            clientId = "client-1"
            clientSecret = "shh"
            disabled = true
        "#};

        let parsed: Wrapper = toml::from_str(toml).unwrap();
        assert!(parsed.credentials[0].disabled());
        assert_eq!(parsed.credentials[0].description(), None);
    }

    #[test]
    fn rejects_unknown_fields() {
        let toml = indoc! {r#"
            [[credentials]]
            auth = "Social"
            refreshToken = "rt-abc123"
            bogus = "nope"
        "#};

        let result: Result<Wrapper, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
