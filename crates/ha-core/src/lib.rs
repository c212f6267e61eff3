//! Core host types
//!
//! The primitives every other crate in the workspace speaks: entity ids,
//! entity states, bus events, the context that links a service call to the
//! state changes it caused, and the service call itself.

mod context;
mod entity_id;
mod event;
mod service_call;
mod state;

pub use context::Context;
pub use entity_id::{slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use service_call::ServiceCall;
pub use state::State;

/// State string of an entity that is switched on
pub const STATE_ON: &str = "on";

/// State string of an entity that is switched off
pub const STATE_OFF: &str = "off";

/// State string of an open cover
pub const STATE_OPEN: &str = "open";

/// State string of a closed cover
pub const STATE_CLOSED: &str = "closed";

/// State string of an entity whose value has never been reported
pub const STATE_UNKNOWN: &str = "unknown";

/// State string of an entity whose backing device cannot be reached
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Maximum length for a state value
pub const MAX_STATE_LENGTH: usize = 255;

/// Well-known attribute keys
pub mod attrs {
    pub const ASSUMED_STATE: &str = "assumed_state";
    pub const BRIGHTNESS: &str = "brightness";
    pub const DEVICE_CLASS: &str = "device_class";
    pub const ENTITY_ID: &str = "entity_id";
    pub const FRIENDLY_NAME: &str = "friendly_name";
    pub const UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
}

/// Standard event types fired on the bus
pub mod events {
    use super::*;

    /// Fired by the state table whenever an entity state is written
    pub const STATE_CHANGED: &str = "state_changed";

    /// Fired by the host when it begins shutting down
    pub const HOMEASSISTANT_STOP: &str = "homeassistant_stop";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }
}
