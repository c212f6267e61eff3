//! Host handles the integration is set up against

use ha_event_bus::{EventBus, SharedEventBus};
use ha_restore_state::RestoreStateStore;
use ha_service_registry::{ServiceRegistry, SharedServiceRegistry};
use ha_state_machine::{SharedStateMachine, StateMachine};
use std::sync::Arc;

#[derive(Clone)]
pub struct Host {
    pub bus: SharedEventBus,
    pub states: SharedStateMachine,
    pub services: SharedServiceRegistry,
    /// Last known states from before the restart
    pub restore: Option<Arc<RestoreStateStore>>,
}

impl Host {
    /// Fresh bus, state table and service registry without restore data
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        Self {
            bus,
            states,
            services: Arc::new(ServiceRegistry::new()),
            restore: None,
        }
    }

    pub fn with_restore(mut self, store: Arc<RestoreStateStore>) -> Self {
        self.restore = Some(store);
        self
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}
