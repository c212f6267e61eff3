//! Events decoded from the gateway
//!
//! An event names a device id and carries either a command (a remote
//! button, a switch state) or a sensor reading. Events are also synthesized
//! locally after a raw `send_command`, so the shape is kept close to what
//! travels on the wire rather than split into a closed enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Commands that address a whole broadcast group rather than one receiver
pub const GROUP_COMMANDS: [&str; 2] = ["allon", "alloff"];

/// How an event is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Command,
    Sensor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RflinkEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl RflinkEvent {
    pub fn command(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn sensor(
        id: impl Into<String>,
        sensor: impl Into<String>,
        value: Value,
        unit: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sensor: Some(sensor.into()),
            value: Some(value),
            unit,
            ..Default::default()
        }
    }

    /// `None` for events that are neither a command nor a sensor reading
    pub fn kind(&self) -> Option<EventKind> {
        if self.command.is_some() {
            Some(EventKind::Command)
        } else if self.sensor.is_some() {
            Some(EventKind::Sensor)
        } else {
            None
        }
    }

    /// Whether this is an `allon`/`alloff` broadcast
    pub fn is_group_command(&self) -> bool {
        self.command
            .as_deref()
            .map(|c| GROUP_COMMANDS.contains(&c))
            .unwrap_or(false)
    }
}
