//! Integration configuration
//!
//! ```yaml
//! rflink:
//!   port: /dev/ttyACM0          # or a TCP port number together with `host`
//!   host: 192.168.1.20
//!   wait_for_ack: true
//!   reconnect_interval: 10
//!   tcp_keepalive_idle_timer: 3600
//!   automatic_add: true
//!   ignore_devices: ["digitech_*"]
//!
//! light:
//!   - platform: rflink
//!     automatic_add: false
//!     device_defaults:
//!       fire_event: true
//!       signal_repetitions: 2
//!     devices:
//!       newkaku_0000c6c2_1:
//!         name: Living room
//!         type: hybrid
//!         aliases: [newkaku_0000c6c2_2]
//! ```

use crate::error::{Result, RflinkError};
use crate::protocol::Endpoint;
use glob::Pattern;
use ha_config::{ConfigError, HostConfig};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{error, warn};

pub const DOMAIN: &str = "rflink";

pub const DEFAULT_RECONNECT_INTERVAL: i64 = 10;
pub const DEFAULT_TCP_KEEPALIVE_IDLE_TIMER: i64 = 3600;
pub const DEFAULT_SIGNAL_REPETITIONS: u32 = 1;

/// Keepalive idle timers at or below this are accepted with a warning
const MIN_SANE_KEEPALIVE: i64 = 30;

fn default_true() -> bool {
    true
}

fn default_reconnect_interval() -> i64 {
    DEFAULT_RECONNECT_INTERVAL
}

fn default_keepalive() -> i64 {
    DEFAULT_TCP_KEEPALIVE_IDLE_TIMER
}

fn default_signal_repetitions() -> u32 {
    DEFAULT_SIGNAL_REPETITIONS
}

/// Serial device path, or TCP port when `host` is set
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortSetting {
    Number(u16),
    Path(String),
}

/// The `rflink:` section
#[derive(Debug, Clone, Deserialize)]
pub struct RflinkConfig {
    pub port: PortSetting,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_true")]
    pub wait_for_ack: bool,
    /// Seconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: i64,
    /// Seconds
    #[serde(default = "default_keepalive")]
    pub tcp_keepalive_idle_timer: i64,
    #[serde(default = "default_true")]
    pub automatic_add: bool,
    #[serde(default)]
    pub ignore_devices: Vec<String>,
}

/// Validated, ready-to-use form of [`RflinkConfig`]
#[derive(Debug, Clone)]
pub struct RflinkSettings {
    pub endpoint: Endpoint,
    pub wait_for_ack: bool,
    pub reconnect_interval: Duration,
    pub automatic_add: bool,
    pub ignore: IgnoreList,
}

impl RflinkConfig {
    pub fn validate(&self) -> Result<RflinkSettings> {
        if self.reconnect_interval < 0 {
            return Err(RflinkError::Config(format!(
                "reconnect_interval must not be negative, got {}",
                self.reconnect_interval
            )));
        }

        let endpoint = match (&self.host, &self.port) {
            (Some(host), port) => {
                let port = match port {
                    PortSetting::Number(n) => *n,
                    PortSetting::Path(p) => p.trim().parse::<u16>().map_err(|_| {
                        RflinkError::Config(format!("port must be a TCP port number, got '{p}'"))
                    })?,
                };
                Endpoint::Tcp {
                    host: host.clone(),
                    port,
                    keepalive: self.keepalive(),
                }
            }
            (None, PortSetting::Path(path)) if !path.trim().is_empty() => {
                Endpoint::Serial { path: path.clone() }
            }
            (None, port) => {
                return Err(RflinkError::Config(format!(
                    "port must be a serial device path when no host is set, got {port:?}"
                )))
            }
        };

        Ok(RflinkSettings {
            endpoint,
            wait_for_ack: self.wait_for_ack,
            reconnect_interval: Duration::from_secs(self.reconnect_interval.unsigned_abs()),
            automatic_add: self.automatic_add,
            ignore: IgnoreList::new(&self.ignore_devices)?,
        })
    }

    /// Keepalive idle timer for TCP mode; `None` disables keepalive
    fn keepalive(&self) -> Option<Duration> {
        match self.tcp_keepalive_idle_timer {
            t if t < 0 => {
                error!(
                    value = t,
                    "A bogus TCP keepalive idle timer was provided, keepalive disabled"
                );
                None
            }
            0 => None,
            t => {
                if t <= MIN_SANE_KEEPALIVE {
                    warn!(
                        value = t,
                        "A very short TCP keepalive idle timer was provided, \
                         this may flood the gateway with keepalive probes"
                    );
                }
                Some(Duration::from_secs(t.unsigned_abs()))
            }
        }
    }
}

/// Glob patterns of device ids that are dropped before dispatch
///
/// Matching ignores case, like device id lookup does.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<Pattern>,
}

impl IgnoreList {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(&p.to_lowercase())
                    .map_err(|e| RflinkError::Config(format!("bad ignore_devices pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, device_id: &str) -> bool {
        let device_id = device_id.to_lowercase();
        self.patterns.iter().any(|p| p.matches(&device_id))
    }
}

/// `device_defaults` of a platform entry
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDefaults {
    #[serde(default)]
    pub fire_event: bool,
    #[serde(
        default = "default_signal_repetitions",
        deserialize_with = "signal_repetitions"
    )]
    pub signal_repetitions: u32,
}

impl Default for DeviceDefaults {
    fn default() -> Self {
        Self {
            fire_event: false,
            signal_repetitions: DEFAULT_SIGNAL_REPETITIONS,
        }
    }
}

/// Options shared by every device kind
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceOptions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub group_aliases: Vec<String>,
    #[serde(default)]
    pub nogroup_aliases: Vec<String>,
    /// Whether the device reacts to `allon`/`alloff` under its own id
    #[serde(default = "default_true")]
    pub group: bool,
    #[serde(default)]
    pub fire_event: Option<bool>,
    #[serde(default, deserialize_with = "optional_signal_repetitions")]
    pub signal_repetitions: Option<u32>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            name: None,
            aliases: Vec::new(),
            group_aliases: Vec::new(),
            nogroup_aliases: Vec::new(),
            group: true,
            fire_event: None,
            signal_repetitions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightType {
    Hybrid,
    Switchable,
    Dimmable,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverType {
    Standard,
    Inverted,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LightDeviceConfig {
    #[serde(flatten)]
    pub options: DeviceOptions,
    #[serde(default, rename = "type")]
    pub light_type: Option<LightType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchDeviceConfig {
    #[serde(flatten)]
    pub options: DeviceOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoverDeviceConfig {
    #[serde(flatten)]
    pub options: DeviceOptions,
    #[serde(default, rename = "type")]
    pub cover_type: Option<CoverType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BinarySensorDeviceConfig {
    #[serde(flatten)]
    pub options: DeviceOptions,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub force_update: bool,
    /// Seconds after an `on` before the sensor falls back to `off`
    #[serde(default)]
    pub off_delay: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SensorDeviceConfig {
    #[serde(flatten)]
    pub options: DeviceOptions,
    #[serde(default)]
    pub sensor_type: String,
    #[serde(default)]
    pub unit_of_measurement: Option<String>,
}

/// One `platform: rflink` entry under a domain
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "D: Deserialize<'de> + Default"))]
pub struct PlatformConfig<D> {
    #[serde(default, deserialize_with = "devices_map")]
    pub devices: IndexMap<String, D>,
    #[serde(default)]
    pub device_defaults: DeviceDefaults,
    /// Overrides the integration-wide `automatic_add`
    #[serde(default)]
    pub automatic_add: Option<bool>,
}

impl<D> Default for PlatformConfig<D> {
    fn default() -> Self {
        Self {
            devices: IndexMap::new(),
            device_defaults: DeviceDefaults::default(),
            automatic_add: None,
        }
    }
}

fn signal_repetitions<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let repetitions = u32::deserialize(deserializer)?;
    if repetitions == 0 {
        return Err(serde::de::Error::custom("signal_repetitions must be at least 1"));
    }
    Ok(repetitions)
}

fn optional_signal_repetitions<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    signal_repetitions(deserializer).map(Some)
}

/// A device listed with no options (`newkaku_0_1:`) gets all defaults
fn devices_map<'de, D, T>(deserializer: D) -> std::result::Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let raw: IndexMap<String, Option<T>> = IndexMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(id, device)| (id, device.unwrap_or_default()))
        .collect())
}

/// Resolved per-device options after applying platform defaults
#[derive(Debug, Clone)]
pub struct EntityOptions {
    pub fire_event: bool,
    pub signal_repetitions: u32,
}

impl DeviceOptions {
    pub fn resolve(&self, defaults: &DeviceDefaults) -> Result<EntityOptions> {
        let signal_repetitions = self
            .signal_repetitions
            .unwrap_or(defaults.signal_repetitions);
        if signal_repetitions == 0 {
            return Err(RflinkError::Config(
                "signal_repetitions must be at least 1".to_string(),
            ));
        }
        Ok(EntityOptions {
            fire_event: self.fire_event.unwrap_or(defaults.fire_event),
            signal_repetitions,
        })
    }
}

/// Every `platform: rflink` entry found in the host configuration
#[derive(Debug, Clone, Default)]
pub struct PlatformConfigs {
    pub lights: Vec<PlatformConfig<LightDeviceConfig>>,
    pub switches: Vec<PlatformConfig<SwitchDeviceConfig>>,
    pub covers: Vec<PlatformConfig<CoverDeviceConfig>>,
    pub binary_sensors: Vec<PlatformConfig<BinarySensorDeviceConfig>>,
    pub sensors: Vec<PlatformConfig<SensorDeviceConfig>>,
}

impl PlatformConfigs {
    pub fn from_host_config(config: &HostConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            lights: config.platforms("light", DOMAIN)?,
            switches: config.platforms("switch", DOMAIN)?,
            covers: config.platforms("cover", DOMAIN)?,
            binary_sensors: config.platforms("binary_sensor", DOMAIN)?,
            sensors: config.platforms("sensor", DOMAIN)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rflink(yaml: &str) -> RflinkConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_serial_defaults() {
        let settings = rflink("port: /dev/ttyACM0").validate().unwrap();
        assert_eq!(
            settings.endpoint,
            Endpoint::Serial {
                path: "/dev/ttyACM0".into()
            }
        );
        assert!(settings.wait_for_ack);
        assert!(settings.automatic_add);
        assert_eq!(settings.reconnect_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_tcp_with_keepalive() {
        let settings = rflink("port: 1234\nhost: 10.0.0.5\ntcp_keepalive_idle_timer: 600")
            .validate()
            .unwrap();
        assert_eq!(
            settings.endpoint,
            Endpoint::Tcp {
                host: "10.0.0.5".into(),
                port: 1234,
                keepalive: Some(Duration::from_secs(600)),
            }
        );

        let quoted = rflink("port: '1234'\nhost: gw").validate().unwrap();
        assert!(matches!(quoted.endpoint, Endpoint::Tcp { port: 1234, keepalive: Some(_), .. }));
    }

    #[test]
    fn test_keepalive_rules() {
        for (value, expected) in [
            (-5, None),
            (0, None),
            (20, Some(Duration::from_secs(20))),
            (3600, Some(Duration::from_secs(3600))),
        ] {
            let config = rflink(&format!(
                "port: 1234\nhost: gw\ntcp_keepalive_idle_timer: {value}"
            ));
            let settings = config.validate().unwrap();
            assert!(
                matches!(settings.endpoint, Endpoint::Tcp { keepalive, .. } if keepalive == expected),
                "keepalive {value}"
            );
        }
    }

    #[test]
    fn test_invalid_settings() {
        assert!(rflink("port: 1234").validate().is_err());
        assert!(rflink("port: abc\nhost: gw").validate().is_err());
        assert!(rflink("port: /dev/ttyACM0\nreconnect_interval: -1")
            .validate()
            .is_err());
        assert!(rflink("port: /dev/ttyACM0\nignore_devices: ['[']")
            .validate()
            .is_err());
        assert!(serde_yaml::from_str::<RflinkConfig>("host: gw").is_err());
    }

    #[test]
    fn test_ignore_list() {
        let ignore = IgnoreList::new(&["digitech_*".into(), "kaku_1_?".into()]).unwrap();
        assert!(ignore.matches("digitech_0a4d"));
        assert!(ignore.matches("kaku_1_a"));
        assert!(!ignore.matches("kaku_1_ab"));
        assert!(!ignore.matches("newkaku_0_1"));
    }

    #[test]
    fn test_ignore_list_ignores_case() {
        let ignore = IgnoreList::new(&["NewKaku_00*".into()]).unwrap();
        assert!(ignore.matches("newkaku_0000c6c2_1"));
        assert!(ignore.matches("NEWKAKU_0000C6C2_1"));
        assert!(!ignore.matches("kaku_0000c6c2_1"));
    }

    #[test]
    fn test_platform_entry() {
        let entry: PlatformConfig<LightDeviceConfig> = serde_yaml::from_str(
            r#"
platform: rflink
device_defaults:
  signal_repetitions: 3
devices:
  newkaku_0000c6c2_1:
    name: Living room
    type: dimmable
    group: false
    aliases: [alias_0_0]
  protocol_0_0:
"#,
        )
        .unwrap();

        let ids: Vec<_> = entry.devices.keys().cloned().collect();
        assert_eq!(ids, vec!["newkaku_0000c6c2_1", "protocol_0_0"]);

        let living = &entry.devices["newkaku_0000c6c2_1"];
        assert_eq!(living.light_type, Some(LightType::Dimmable));
        assert!(!living.options.group);
        assert_eq!(living.options.aliases, vec!["alias_0_0"]);

        let bare = &entry.devices["protocol_0_0"];
        assert!(bare.options.group);
        let resolved = bare.options.resolve(&entry.device_defaults).unwrap();
        assert_eq!(resolved.signal_repetitions, 3);
        assert!(!resolved.fire_event);
    }

    #[test]
    fn test_unknown_light_type_rejected() {
        let result = serde_yaml::from_str::<PlatformConfig<LightDeviceConfig>>(
            "devices:\n  a_b:\n    type: disco\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_repetitions_rejected() {
        let options = DeviceOptions {
            signal_repetitions: Some(0),
            ..Default::default()
        };
        assert!(options.resolve(&DeviceDefaults::default()).is_err());
    }

    #[test]
    fn test_zero_repetitions_rejected_at_load() {
        let defaults = serde_yaml::from_str::<PlatformConfig<LightDeviceConfig>>(
            "device_defaults:\n  signal_repetitions: 0\n",
        );
        assert!(defaults.is_err());
        let device = serde_yaml::from_str::<PlatformConfig<SwitchDeviceConfig>>(
            "devices:\n  kaku_1_a:\n    signal_repetitions: 0\n",
        );
        assert!(device.is_err());

        let host = HostConfig::from_value(
            serde_yaml::from_str(
                "light:\n  - platform: rflink\n    automatic_add: true\n    device_defaults:\n      signal_repetitions: 0\n",
            )
            .unwrap(),
        );
        assert!(PlatformConfigs::from_host_config(&host).is_err());

        let ok = serde_yaml::from_str::<PlatformConfig<LightDeviceConfig>>(
            "device_defaults:\n  signal_repetitions: 4\n",
        )
        .unwrap();
        assert_eq!(ok.device_defaults.signal_repetitions, 4);
    }

    #[test]
    fn test_platforms_from_host_config() {
        let host = HostConfig::from_value(
            serde_yaml::from_str(
                r#"
light:
  - platform: rflink
    devices:
      protocol_0_0: {name: test}
switch:
  - platform: template
cover:
  platform: rflink
  devices:
    rts_0f0f_0: {}
"#,
            )
            .unwrap(),
        );
        let platforms = PlatformConfigs::from_host_config(&host).unwrap();
        assert_eq!(platforms.lights.len(), 1);
        assert!(platforms.switches.is_empty());
        assert_eq!(platforms.covers[0].devices.len(), 1);
    }
}
