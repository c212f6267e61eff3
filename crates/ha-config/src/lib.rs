//! YAML configuration loading
//!
//! Loads `configuration.yaml` with the custom tags users expect:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! The loaded document is wrapped in [`HostConfig`], which hands typed
//! sections to integrations: a top-level domain block (`rflink:`) or the
//! `platform:` entries an integration owns inside another domain's list
//! (`light: [{platform: rflink, ...}]`).
//!
//! # Example
//!
//! ```ignore
//! use ha_config::HostConfig;
//!
//! let config = HostConfig::load("/config")?;
//! let rflink: Option<MySection> = config.section("rflink")?;
//! let lights: Vec<MyPlatform> = config.platforms("light", "rflink")?;
//! ```

mod error;
mod host;
mod loader;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use host::{HostConfig, CONFIG_FILE};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
