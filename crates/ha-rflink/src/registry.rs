//! Registered entities and their shared availability
//!
//! Availability is an integration-wide flag: the lifecycle manager flips it
//! on connect and disconnect and the registry fans the change out to every
//! entity. Entities added later inherit the current value.

use crate::entity::{write_state, RflinkEntity};
use crate::error::{Result, RflinkError};
use dashmap::DashMap;
use ha_core::EntityId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct EntityRegistry {
    entities: DashMap<String, Arc<dyn RflinkEntity>>,
    /// Ids handed out by [`EntityRegistry::allocate_entity_id`]
    reserved: Mutex<HashSet<EntityId>>,
    available: Mutex<bool>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            reserved: Mutex::new(HashSet::new()),
            available: Mutex::new(false),
        }
    }

    /// Reserve `<domain>.<slug(name)>`, suffixed `_2`, `_3`… when taken
    pub fn allocate_entity_id(&self, domain: &str, name: &str) -> Result<EntityId> {
        let base = EntityId::from_name(domain, name)
            .map_err(|e| RflinkError::Config(format!("cannot name entity '{name}': {e}")))?;

        let mut reserved = self.reserved.lock();
        let mut candidate = base.clone();
        let mut n = 2;
        while reserved.contains(&candidate) {
            candidate = base.with_suffix(n);
            n += 1;
        }
        reserved.insert(candidate.clone());
        Ok(candidate)
    }

    /// Track an entity and publish its first state
    #[instrument(skip(self, entity), fields(entity_id = %entity.base().entity_id()))]
    pub fn add(&self, entity: Arc<dyn RflinkEntity>) {
        {
            let available = self.available.lock();
            entity.base().set_available(*available);
            self.reserved
                .lock()
                .insert(entity.base().entity_id().clone());
            self.entities
                .insert(entity.base().entity_id().to_string(), entity.clone());
        }
        debug!("Entity added");
        write_state(entity.as_ref());
    }

    pub fn get(&self, entity_id: &str) -> Option<Arc<dyn RflinkEntity>> {
        self.entities.get(entity_id).map(|e| e.clone())
    }

    pub fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_available(&self) -> bool {
        *self.available.lock()
    }

    /// Flip availability of every entity and rewrite their states
    pub fn set_available(&self, available: bool) {
        let entities: Vec<Arc<dyn RflinkEntity>> = {
            let mut flag = self.available.lock();
            *flag = available;
            self.entities.iter().map(|e| e.value().clone()).collect()
        };
        debug!(available, count = entities.len(), "Availability changed");

        for entity in entities {
            entity.base().set_available(available);
            write_state(entity.as_ref());
        }
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
