//! Entity base shared by every platform
//!
//! [`EntityBase`] holds identity, options and the runtime state common to
//! all RFLink entities: last known on/off value, availability, whether any
//! event has confirmed the value yet, and the token of the entity's pending
//! repetition chain. Platforms wrap it and implement [`RflinkEntity`] for
//! their own command and event mapping.

use crate::command::CommandEngine;
use crate::config::EntityOptions;
use crate::error::{Result, RflinkError};
use crate::event::{EventKind, RflinkEvent};
use async_trait::async_trait;
use ha_core::{attrs, Context, EntityId, State, STATE_OFF, STATE_ON, STATE_UNAVAILABLE, STATE_UNKNOWN};
use ha_event_bus::SharedEventBus;
use ha_state_machine::SharedStateMachine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bus event fired for entities with `fire_event` set
pub const EVENT_BUTTON_PRESSED: &str = "button_pressed";

/// Host-level actions an entity can be asked to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityCommand {
    TurnOn { brightness: Option<u8> },
    TurnOff,
    OpenCover,
    CloseCover,
    StopCover,
    SetCoverPosition(u8),
}

impl EntityCommand {
    pub fn name(&self) -> &'static str {
        match self {
            EntityCommand::TurnOn { .. } => "turn_on",
            EntityCommand::TurnOff => "turn_off",
            EntityCommand::OpenCover => "open_cover",
            EntityCommand::CloseCover => "close_cover",
            EntityCommand::StopCover => "stop_cover",
            EntityCommand::SetCoverPosition(_) => "set_cover_position",
        }
    }
}

/// Host handles every entity writes through
#[derive(Clone)]
pub struct EntityHost {
    pub bus: SharedEventBus,
    pub states: SharedStateMachine,
    pub engine: Arc<CommandEngine>,
}

struct Runtime {
    is_on: Option<bool>,
    available: bool,
    /// Set by the first inbound event
    confirmed: bool,
    chain: CancellationToken,
}

pub struct EntityBase {
    entity_id: EntityId,
    device_id: String,
    name: String,
    options: EntityOptions,
    force_update: bool,
    host: EntityHost,
    runtime: Mutex<Runtime>,
}

impl EntityBase {
    pub fn new(
        entity_id: EntityId,
        device_id: impl Into<String>,
        name: impl Into<String>,
        options: EntityOptions,
        host: EntityHost,
    ) -> Self {
        let chain = host.engine.new_chain();
        Self {
            entity_id,
            device_id: device_id.into(),
            name: name.into(),
            options,
            force_update: false,
            host,
            runtime: Mutex::new(Runtime {
                is_on: None,
                available: false,
                confirmed: false,
                chain,
            }),
        }
    }

    /// Write every update to the state table, even when nothing changed
    pub fn with_force_update(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signal_repetitions(&self) -> u32 {
        self.options.signal_repetitions
    }

    pub fn host(&self) -> &EntityHost {
        &self.host
    }

    pub fn is_on(&self) -> Option<bool> {
        self.runtime.lock().is_on
    }

    pub fn set_is_on(&self, is_on: Option<bool>) {
        self.runtime.lock().is_on = is_on;
    }

    pub fn is_available(&self) -> bool {
        self.runtime.lock().available
    }

    /// Only the registry calls this, following the connection lifecycle
    pub(crate) fn set_available(&self, available: bool) {
        self.runtime.lock().available = available;
    }

    /// True until an inbound event has confirmed the value
    pub fn assumed_state(&self) -> bool {
        !self.runtime.lock().confirmed
    }

    fn confirm(&self) {
        self.runtime.lock().confirmed = true;
    }

    /// Stop whatever repetitions are still queued for this entity
    pub fn cancel_repetitions(&self) {
        self.runtime.lock().chain.cancel();
    }

    /// Send a wire command for this device, replacing any pending chain
    pub async fn send_command(&self, command: &str) -> Result<()> {
        let chain = {
            let mut runtime = self.runtime.lock();
            runtime.chain.cancel();
            runtime.chain = self.host.engine.new_chain();
            runtime.chain.clone()
        };
        debug!(entity_id = %self.entity_id, command, "Sending command");
        self.host
            .engine
            .execute(
                &self.device_id,
                command,
                self.options.signal_repetitions,
                chain,
            )
            .await
    }
}

/// `on`/`off`/`unknown` for an optional boolean
pub fn on_off(is_on: Option<bool>) -> &'static str {
    match is_on {
        Some(true) => STATE_ON,
        Some(false) => STATE_OFF,
        None => STATE_UNKNOWN,
    }
}

#[async_trait]
pub trait RflinkEntity: Send + Sync {
    fn base(&self) -> &EntityBase;

    /// Update local state from an inbound event
    fn apply_event(&self, event: &RflinkEvent);

    /// State value while available
    fn state(&self) -> String {
        on_off(self.base().is_on()).to_string()
    }

    /// Platform attributes while available
    fn attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// Seed local state from the value persisted before a restart
    fn restore(&self, last: &State) {
        match last.state.as_str() {
            STATE_ON => self.base().set_is_on(Some(true)),
            STATE_OFF => self.base().set_is_on(Some(false)),
            _ => {}
        }
    }

    async fn handle_command(&self, command: EntityCommand) -> Result<()> {
        Err(RflinkError::Unsupported {
            entity: self.base().entity_id().to_string(),
            command: command.name().to_string(),
        })
    }
}

/// Apply an inbound event and publish the result
pub fn handle_event(entity: &dyn RflinkEntity, event: &RflinkEvent) {
    let base = entity.base();
    debug!(entity_id = %base.entity_id, ?event, "State update");

    base.cancel_repetitions();
    entity.apply_event(event);
    base.confirm();
    write_state(entity);

    if base.options.fire_event && event.kind() == Some(EventKind::Command) {
        if let Some(command) = &event.command {
            base.host.bus.fire_json(
                EVENT_BUTTON_PRESSED,
                json!({
                    attrs::ENTITY_ID: base.entity_id.to_string(),
                    "state": command,
                }),
                Context::new(),
            );
            debug!(entity_id = %base.entity_id, %command, "Fired bus event");
        }
    }
}

/// Write the entity's current state to the state table
pub fn write_state(entity: &dyn RflinkEntity) {
    let base = entity.base();
    let (state, mut attributes) = if base.is_available() {
        (entity.state(), entity.attributes())
    } else {
        (STATE_UNAVAILABLE.to_string(), HashMap::new())
    };

    attributes.insert(attrs::FRIENDLY_NAME.to_string(), json!(base.name));
    if base.is_available() && base.assumed_state() {
        attributes.insert(attrs::ASSUMED_STATE.to_string(), json!(true));
    }

    let key = base.entity_id.to_string();
    if !base.force_update {
        if let Some(current) = base.host.states.get(&key) {
            if current.state == state && current.attributes == attributes {
                return;
            }
        }
    }

    base.host
        .states
        .set(base.entity_id.clone(), state, attributes, Context::new());
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::connection::testing::RecordingProtocol;
    use crate::connection::ConnectionHandle;
    use ha_event_bus::EventBus;
    use ha_state_machine::StateMachine;

    pub struct TestHost {
        pub host: EntityHost,
        pub protocol: Arc<RecordingProtocol>,
        pub shutdown: CancellationToken,
    }

    /// Host with a bound recording protocol and a running repetition queue
    pub fn test_host() -> TestHost {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let connection = Arc::new(ConnectionHandle::new(true));
        let protocol = Arc::new(RecordingProtocol::default());
        connection.bind(protocol.clone());
        let shutdown = CancellationToken::new();
        let engine = Arc::new(CommandEngine::new(connection, shutdown.clone()));
        tokio::spawn(engine.clone().run());
        TestHost {
            host: EntityHost { bus, states, engine },
            protocol,
            shutdown,
        }
    }

    pub fn options(signal_repetitions: u32, fire_event: bool) -> EntityOptions {
        EntityOptions {
            fire_event,
            signal_repetitions,
        }
    }

    pub fn entity_id(s: &str) -> EntityId {
        s.parse().unwrap()
    }
}
