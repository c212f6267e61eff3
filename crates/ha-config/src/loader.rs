//! YAML loader with custom tag support
//!
//! Tags resolved while loading:
//! - `!include path` - replaced by the parsed content of another file,
//!   relative to the including file
//! - `!secret key` - replaced by the value from `secrets.yaml`
//! - `!env_var VAR` - replaced by an environment variable
//!
//! Unknown tags are kept, with their inner value still processed.

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader rooted at a configuration directory
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, innermost last
    include_stack: Vec<PathBuf>,
}

impl YamlLoader {
    /// Create a loader, reading `secrets.yaml` from `config_dir` if present
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_stack: Vec::new(),
        }
    }

    /// Load and process a YAML file. Relative paths resolve against the
    /// configuration directory.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = match path.as_ref() {
            p if p.is_absolute() => p.to_path_buf(),
            p => self.config_dir.join(p),
        };
        debug!(path = %path.display(), "Loading YAML file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_stack.push(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.pop();
        result
    }

    /// Load and process YAML text; `source_path` anchors relative includes
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.process(value, source_path)
    }

    fn process(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    let k = self.process(k, source_path)?;
                    let v = self.process(v, source_path)?;
                    out.insert(k, v);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.process(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn process_tagged(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(%tag, "Processing tagged value");

        match tag.as_str() {
            "!include" => {
                let arg = tag_argument(&tag, &tagged.value)?;
                if arg.is_empty() {
                    return Err(ConfigError::InvalidIncludePath {
                        path: arg.to_string(),
                        reason: "path is empty".to_string(),
                    });
                }
                let base = source_path.parent().unwrap_or(&self.config_dir);
                let target = base.join(arg);
                self.load_file(target)
            }
            "!secret" => {
                let key = tag_argument(&tag, &tagged.value)?;
                Ok(Value::String(self.secrets.get(key)?.to_string()))
            }
            "!env_var" => {
                let var = tag_argument(&tag, &tagged.value)?;
                std::env::var(var)
                    .map(Value::String)
                    .map_err(|_| ConfigError::EnvVarNotFound {
                        var: var.to_string(),
                    })
            }
            _ => {
                let value = self.process(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }
}

fn tag_argument<'a>(tag: &str, value: &'a Value) -> ConfigResult<&'a str> {
    value.as_str().ok_or_else(|| ConfigError::InvalidValue {
        key: tag.to_string(),
        reason: "argument must be a string".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load_yaml(config_dir: &Path, file: &str) -> ConfigResult<Value> {
        YamlLoader::new(config_dir)?.load_file(file)
    }

    fn load_yaml_string(config_dir: &Path, content: &str, source_name: &str) -> ConfigResult<Value> {
        YamlLoader::new(config_dir)?.load_string(content, &config_dir.join(source_name))
    }

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn get<'a>(value: &'a Value, key: &str) -> &'a Value {
        value.get(key).unwrap_or_else(|| panic!("missing key {key}"))
    }

    #[test]
    fn test_plain_document() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "configuration.yaml",
            "rflink:\n  port: /dev/ttyACM0\n  wait_for_ack: false\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let rflink = get(&value, "rflink");
        assert_eq!(get(rflink, "port").as_str(), Some("/dev/ttyACM0"));
        assert_eq!(get(rflink, "wait_for_ack").as_bool(), Some(false));
    }

    #[test]
    fn test_include_relative_to_including_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "platforms/lights.yaml", "- platform: rflink\n  devices: {}\n");
        write(
            dir.path(),
            "configuration.yaml",
            "light: !include platforms/lights.yaml\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let lights = get(&value, "light").as_sequence().unwrap();
        assert_eq!(lights.len(), 1);
        assert_eq!(get(&lights[0], "platform").as_str(), Some("rflink"));
    }

    #[test]
    fn test_circular_include() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn test_secret_and_missing_secret() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "secrets.yaml", "rflink_host: 10.0.0.5\n");
        write(dir.path(), "ok.yaml", "host: !secret rflink_host\n");
        write(dir.path(), "bad.yaml", "host: !secret nope\n");

        let value = load_yaml(dir.path(), "ok.yaml").unwrap();
        assert_eq!(get(&value, "host").as_str(), Some("10.0.0.5"));

        let result = load_yaml(dir.path(), "bad.yaml");
        assert!(matches!(result, Err(ConfigError::SecretNotFound { key }) if key == "nope"));
    }

    #[test]
    fn test_env_var() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("HA_CONFIG_TEST_RFLINK_PORT", "/dev/ttyUSB1");
        let value = load_yaml_string(
            dir.path(),
            "port: !env_var HA_CONFIG_TEST_RFLINK_PORT\n",
            "inline.yaml",
        )
        .unwrap();
        std::env::remove_var("HA_CONFIG_TEST_RFLINK_PORT");

        assert_eq!(get(&value, "port").as_str(), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn test_tag_argument_must_be_string() {
        let dir = TempDir::new().unwrap();
        let result = load_yaml_string(dir.path(), "x: !secret [1, 2]\n", "inline.yaml");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let dir = TempDir::new().unwrap();
        let value = load_yaml_string(dir.path(), "x: !custom value\n", "inline.yaml").unwrap();
        assert!(matches!(get(&value, "x"), Value::Tagged(_)));
    }
}
