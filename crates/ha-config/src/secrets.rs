//! `secrets.yaml` lookup for the `!secret` tag

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const SECRETS_FILE: &str = "secrets.yaml";

/// Flat key/value secrets. Scalar values are stored in their string form.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
}

impl Secrets {
    /// Load `secrets.yaml` from `config_dir`; a missing file yields no secrets
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join(SECRETS_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No secrets file");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;
        let raw: HashMap<String, Value> =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
                path: path.clone(),
                source,
            })?;

        let values: HashMap<String, String> = raw
            .into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    _ => return None,
                };
                Some((key, text))
            })
            .collect();

        debug!(count = values.len(), "Loaded secrets");
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> ConfigResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::SecretNotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scalars_become_strings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(SECRETS_FILE),
            "host: gateway.lan\nport: 1234\nflag: true\nnested: [1]\n",
        )
        .unwrap();

        let secrets = Secrets::load(dir.path()).unwrap();
        assert_eq!(secrets.get("host").unwrap(), "gateway.lan");
        assert_eq!(secrets.get("port").unwrap(), "1234");
        assert_eq!(secrets.get("flag").unwrap(), "true");
        // non-scalar entries are not usable as secrets
        assert!(secrets.get("nested").is_err());
        assert_eq!(secrets.values.len(), 3);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(Secrets::load(dir.path()).unwrap().values.is_empty());
    }
}
