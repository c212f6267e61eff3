//! Last-known state of every entity, persisted on shutdown

use crate::storage::{Storage, StorageResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::{EntityId, State};
use ha_state_machine::StateMachine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const RESTORE_STATE_KEY: &str = "core.restore_state";
const STORAGE_VERSION: u32 = 1;

/// A state as it was last seen by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    pub state: State,
    pub last_seen: DateTime<Utc>,
}

pub struct RestoreStateStore {
    storage: Storage,
    last_states: DashMap<String, StoredState>,
}

impl RestoreStateStore {
    /// Read `.storage/core.restore_state` from `config_dir`
    pub async fn load(config_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let store = Self::empty(config_dir);
        let stored: Vec<StoredState> = store
            .storage
            .load(RESTORE_STATE_KEY, STORAGE_VERSION)
            .await?
            .unwrap_or_default();

        for entry in stored {
            store
                .last_states
                .insert(entry.state.entity_id.to_string(), entry);
        }
        info!(count = store.last_states.len(), "Loaded restore state");
        Ok(store)
    }

    /// A store that starts with nothing to restore
    pub fn empty(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage: Storage::new(config_dir),
            last_states: DashMap::new(),
        }
    }

    /// The state an entity had when the host last stopped
    pub fn last_state(&self, entity_id: &EntityId) -> Option<State> {
        self.last_states
            .get(&entity_id.to_string())
            .map(|s| s.state.clone())
    }

    /// Record a state as last seen now
    pub fn remember(&self, state: State) {
        self.last_states.insert(
            state.entity_id.to_string(),
            StoredState {
                state,
                last_seen: Utc::now(),
            },
        );
    }

    /// Capture the state table and write the store to disk.
    ///
    /// An entity that is currently unavailable keeps whatever was stored for
    /// it before, so a restart during a gateway outage does not erase its
    /// last real value. Returns the number of stored states.
    pub async fn dump(&self, states: &StateMachine) -> StorageResult<usize> {
        for state in states.all() {
            if state.is_unavailable() {
                continue;
            }
            self.remember(state);
        }

        let mut entries: Vec<StoredState> =
            self.last_states.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.state.entity_id.cmp(&b.state.entity_id));
        let count = entries.len();

        self.storage
            .save(RESTORE_STATE_KEY, STORAGE_VERSION, entries)
            .await?;
        debug!(count, "Dumped restore state");
        Ok(count)
    }
}
