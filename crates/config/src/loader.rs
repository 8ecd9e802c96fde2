use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::{Config, Error};

/// Loads and validates the gateway configuration from a TOML file, expanding any
/// `{{ env.VAR_NAME }}` placeholders found in string values against the process environment.
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut raw: Value = toml::from_str(&content)?;

    expand_dynamic_strings(&mut Vec::new(), &mut raw)?;

    let config = Config::deserialize(raw)?;
    config.validate()?;

    Ok(config)
}

fn expand_dynamic_strings(path: &mut Vec<String>, value: &mut Value) -> Result<(), Error> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => {
                *s = out.into_inner();
                Ok(())
            }
            Err(err) => Err(Error::EnvVarSubstitution {
                path: path.join("."),
                reason: err.to_string(),
            }),
        },
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                path.push(i.to_string());
                expand_dynamic_strings(path, item)?;
                path.pop();
            }
            Ok(())
        }
        Value::Table(table) => {
            for (key, item) in table.iter_mut() {
                path.push(key.clone());
                expand_dynamic_strings(path, item)?;
                path.pop();
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn expands_env_placeholder() {
        temp_env::with_var("GATEWAY_TEST_TOKEN", Some("rt-secret"), || {
            let mut value = Value::String("{{ env.GATEWAY_TEST_TOKEN }}".to_string());
            expand_dynamic_strings(&mut Vec::new(), &mut value).unwrap();
            assert_eq!(value, Value::String("rt-secret".to_string()));
        });
    }

    #[test]
    fn missing_env_var_is_an_error() {
        temp_env::with_var_unset("GATEWAY_TEST_MISSING", || {
            let mut value = Value::String("{{ env.GATEWAY_TEST_MISSING }}".to_string());
            assert!(expand_dynamic_strings(&mut Vec::new(), &mut value).is_err());
        });
    }

    #[test]
    fn plain_string_is_untouched() {
        let mut value = Value::String("no placeholder here".to_string());
        expand_dynamic_strings(&mut Vec::new(), &mut value).unwrap();
        assert_eq!(value, Value::String("no placeholder here".to_string()));
    }

    #[test]
    fn loads_full_config_with_env_expansion() {
        temp_env::with_var("GATEWAY_TEST_RT", Some("rt-from-env"), || {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("gateway.toml");

            std::fs::write(
                &path,
                indoc! {r#"
                    [server]
                    client_secret = "s3cr3t"

                    [[credentials]]
                    auth = "Social"
                    refreshToken = "{{ env.GATEWAY_TEST_RT }}"
                "#},
            )
            .unwrap();

            let config = load(&path).unwrap();
            assert_eq!(config.credentials.len(), 1);
        });
    }
}
