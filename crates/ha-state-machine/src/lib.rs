//! Entity state table with domain indexing
//!
//! The StateMachine holds the last written state of every entity. Entities
//! write through [`StateMachine::set`]; readers (services, tests, the restore
//! store) query by entity id or by domain. Every write fires a
//! `state_changed` event on the bus.

use dashmap::DashMap;
use ha_core::events::StateChangedData;
use ha_core::{Context, EntityId, State};
use ha_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct StateMachine {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain
    domain_index: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Write the state of an entity
    ///
    /// `last_changed` only moves when the value differs from the stored one.
    /// Fires STATE_CHANGED with the old and new state.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let key = entity_id.to_string();
        let old_state = self.states.get(&key).map(|s| s.clone());

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map(|s| s.state != new_state.state).unwrap_or(true),
            "Setting entity state"
        );

        self.states.insert(key.clone(), new_state.clone());
        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(key);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// The state value, or None if the entity was never written
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Entity ids of a domain, in first-write order
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|r| r.value().clone()).collect()
    }
}

/// Thread-safe wrapper for StateMachine
pub type SharedStateMachine = Arc<StateMachine>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_test_setup() -> (Arc<EventBus>, StateMachine) {
        let event_bus = Arc::new(EventBus::new());
        let state_machine = StateMachine::new(event_bus.clone());
        (event_bus, state_machine)
    }

    #[test]
    fn test_set_and_get_state() {
        let (_, sm) = make_test_setup();

        let entity_id = EntityId::new("light", "test").unwrap();
        let attrs = HashMap::from([("assumed_state".to_string(), json!(true))]);
        let state = sm.set(entity_id, "unknown", attrs.clone(), Context::new());

        assert_eq!(state.attributes, attrs);
        assert!(sm.is_state("light.test", "unknown"));
        assert_eq!(sm.get_state("light.ghost_1"), None);
    }

    #[test]
    fn test_domain_indexing() {
        let (_, sm) = make_test_setup();

        for (domain, object) in [("light", "a"), ("light", "b"), ("sensor", "temp")] {
            sm.set(
                EntityId::new(domain, object).unwrap(),
                "on",
                HashMap::new(),
                Context::new(),
            );
        }
        // Rewriting an existing entity does not duplicate it in the index
        sm.set(
            EntityId::new("light", "a").unwrap(),
            "off",
            HashMap::new(),
            Context::new(),
        );

        assert_eq!(sm.entity_ids("light"), vec!["light.a", "light.b"]);
        assert_eq!(sm.entity_ids("sensor"), vec!["sensor.temp"]);
        assert_eq!(sm.all().len(), 3);
    }

    #[tokio::test]
    async fn test_state_changed_event_fired() {
        let (bus, sm) = make_test_setup();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        let entity_id = EntityId::new("switch", "heater").unwrap();
        sm.set(entity_id.clone(), "off", HashMap::new(), Context::new());
        sm.set(entity_id, "on", HashMap::new(), Context::new());

        let first = rx.recv().await.unwrap();
        assert!(first.data.old_state.is_none());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.data.old_state.unwrap().state, "off");
        assert_eq!(second.data.new_state.unwrap().state, "on");
    }
}
