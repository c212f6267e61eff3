//! Typed access to the loaded host configuration

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::path::Path;
use tracing::debug;

/// Name of the root configuration file inside the config directory
pub const CONFIG_FILE: &str = "configuration.yaml";

/// The fully processed `configuration.yaml`
#[derive(Debug, Clone)]
pub struct HostConfig {
    root: Value,
}

impl HostConfig {
    /// Load `configuration.yaml` from `config_dir`
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let mut loader = YamlLoader::new(config_dir.as_ref())?;
        let root = loader.load_file(CONFIG_FILE)?;
        Ok(Self::from_value(root))
    }

    /// Wrap an already-processed document. A null document (empty file) is
    /// treated as an empty mapping.
    pub fn from_value(root: Value) -> Self {
        let root = match root {
            Value::Null => Value::Mapping(Default::default()),
            other => other,
        };
        Self { root }
    }

    /// Deserialize a top-level domain block such as `rflink:`.
    ///
    /// Returns `Ok(None)` when the key is absent. An empty block (`rflink:`
    /// with nothing under it) deserializes from an empty mapping so that all
    /// defaults apply.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<Option<T>> {
        let Some(value) = self.root.get(key) else {
            return Ok(None);
        };
        let value = match value {
            Value::Null => Value::Mapping(Default::default()),
            other => other.clone(),
        };
        serde_yaml::from_value(value)
            .map(Some)
            .map_err(|source| ConfigError::InvalidSection {
                section: key.to_string(),
                source,
            })
    }

    /// Deserialize every entry of `domain` whose `platform` equals `platform`.
    ///
    /// Accepts both the list form (`light: [{platform: rflink}]`) and a single
    /// mapping (`light: {platform: rflink}`). Keys such as `light 2:` that
    /// extend the same domain are included too, in document order.
    pub fn platforms<T: DeserializeOwned>(
        &self,
        domain: &str,
        platform: &str,
    ) -> ConfigResult<Vec<T>> {
        let Some(map) = self.root.as_mapping() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for (key, value) in map {
            let Some(key) = key.as_str() else { continue };
            if !is_domain_key(key, domain) {
                continue;
            }

            let entries: Vec<&Value> = match value {
                Value::Sequence(seq) => seq.iter().collect(),
                Value::Mapping(_) => vec![value],
                _ => continue,
            };

            for entry in entries {
                if entry.get("platform").and_then(Value::as_str) != Some(platform) {
                    continue;
                }
                let parsed = serde_yaml::from_value(entry.clone()).map_err(|source| {
                    ConfigError::InvalidSection {
                        section: format!("{key}.{platform}"),
                        source,
                    }
                })?;
                out.push(parsed);
            }
        }

        debug!(domain, platform, count = out.len(), "Collected platform entries");
        Ok(out)
    }
}

/// `light` matches `light` and `light <label>`
fn is_domain_key(key: &str, domain: &str) -> bool {
    match key.strip_prefix(domain) {
        Some("") => true,
        Some(rest) => rest.starts_with(' '),
        None => false,
    }
}
