//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("secret '{key}' not found in secrets.yaml")]
    SecretNotFound { key: String },

    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    /// A section did not match the shape its integration expects
    #[error("invalid configuration for '{section}': {source}")]
    InvalidSection {
        section: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}
