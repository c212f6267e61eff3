//! Device id and alias routing
//!
//! Every event kind has two lookup tables. The normal table serves ordinary
//! commands and sensor readings; the group table serves `allon`/`alloff`
//! broadcasts only. Which table a key lands in depends on how it was
//! declared:
//!
//! | key | normal | group |
//! |---|---|---|
//! | primary id | yes | when `group: true` |
//! | `aliases` | yes | yes |
//! | `group_aliases` | no | yes |
//! | `nogroup_aliases` | yes | no |
//!
//! Unknown ids may spawn an entity through a per-kind [`DeviceFactory`]. A
//! placeholder is put under the id before the factory runs, so a burst of
//! events for a new device creates one entity, not several.

use crate::config::{DeviceOptions, IgnoreList};
use crate::entity::{handle_event, RflinkEntity};
use crate::error::Result;
use crate::event::{EventKind, RflinkEvent};
use crate::registry::EntityRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Keys an entity answers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub device_id: String,
    pub aliases: Vec<String>,
    pub group_aliases: Vec<String>,
    pub nogroup_aliases: Vec<String>,
    pub group: bool,
}

impl Registration {
    /// Primary id only, taking part in group broadcasts
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            aliases: Vec::new(),
            group_aliases: Vec::new(),
            nogroup_aliases: Vec::new(),
            group: true,
        }
    }

    pub fn from_options(device_id: impl Into<String>, options: &DeviceOptions) -> Self {
        Self {
            device_id: device_id.into(),
            aliases: options.aliases.clone(),
            group_aliases: options.group_aliases.clone(),
            nogroup_aliases: options.nogroup_aliases.clone(),
            group: options.group,
        }
    }
}

/// An entity built for an unknown device id
pub struct NewDevice {
    pub entity: Arc<dyn RflinkEntity>,
    pub registration: Registration,
}

/// Builds an entity for the first event of an unknown device
pub type DeviceFactory = Arc<dyn Fn(&RflinkEvent) -> Result<NewDevice> + Send + Sync>;

#[derive(Clone)]
enum Target {
    Entity(Arc<dyn RflinkEntity>),
    Placeholder,
}

#[derive(Default)]
struct LookupTables {
    normal: HashMap<String, Vec<Target>>,
    group: HashMap<String, Vec<Target>>,
}

/// What happened to a dispatched event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Neither a command nor a sensor reading
    Unclassified,
    /// Device id matched `ignore_devices`
    Ignored,
    /// Delivered to this many entities
    Delivered(usize),
    /// Only a placeholder is registered; the entity is still being created
    Pending,
    /// No receiver and no automatic add
    Dropped,
    /// A new entity is being created
    AutoAdd,
}

fn same_entity(a: &Arc<dyn RflinkEntity>, b: &Arc<dyn RflinkEntity>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn insert(table: &mut HashMap<String, Vec<Target>>, key: &str, entity: &Arc<dyn RflinkEntity>) {
    let targets = table.entry(key.to_lowercase()).or_default();
    targets.retain(|t| matches!(t, Target::Entity(_)));
    let known = targets
        .iter()
        .any(|t| matches!(t, Target::Entity(e) if same_entity(e, entity)));
    if !known {
        targets.push(Target::Entity(entity.clone()));
    }
}

pub struct Dispatcher {
    tables: RwLock<HashMap<EventKind, LookupTables>>,
    factories: RwLock<HashMap<EventKind, DeviceFactory>>,
    ignore: IgnoreList,
    registry: Arc<EntityRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<EntityRegistry>, ignore: IgnoreList) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            ignore,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Enable automatic add for one event kind
    pub fn set_factory(&self, kind: EventKind, factory: DeviceFactory) {
        self.factories.write().insert(kind, factory);
    }

    pub fn automatic_add(&self, kind: EventKind) -> bool {
        self.factories.read().contains_key(&kind)
    }

    /// Route events for the registration's keys to `entity`
    ///
    /// Registering the same entity twice changes nothing. Any placeholder
    /// under one of the keys is replaced.
    pub fn register(&self, kind: EventKind, entity: Arc<dyn RflinkEntity>, registration: &Registration) {
        {
            let mut tables = self.tables.write();
            let tables = tables.entry(kind).or_default();

            insert(&mut tables.normal, &registration.device_id, &entity);
            if registration.group {
                insert(&mut tables.group, &registration.device_id, &entity);
            }
            for alias in &registration.aliases {
                insert(&mut tables.normal, alias, &entity);
                insert(&mut tables.group, alias, &entity);
            }
            for alias in &registration.group_aliases {
                insert(&mut tables.group, alias, &entity);
            }
            for alias in &registration.nogroup_aliases {
                insert(&mut tables.normal, alias, &entity);
            }
        }
        debug!(
            device_id = %registration.device_id,
            entity_id = %entity.base().entity_id(),
            "Registered device"
        );
        self.registry.add(entity);
    }

    fn lookup(&self, kind: EventKind, key: &str, group: bool) -> Vec<Target> {
        let tables = self.tables.read();
        tables
            .get(&kind)
            .and_then(|t| if group { t.group.get(key) } else { t.normal.get(key) })
            .cloned()
            .unwrap_or_default()
    }

    /// Route one event
    ///
    /// Callers must dispatch from a single task so events for one device are
    /// applied in arrival order. No lock is held while entities run.
    pub fn dispatch(self: &Arc<Self>, event: &RflinkEvent) -> DispatchOutcome {
        let Some(kind) = event.kind().filter(|_| !event.id.is_empty()) else {
            debug!(?event, "Dropping unclassified event");
            return DispatchOutcome::Unclassified;
        };
        if self.ignore.matches(&event.id) {
            debug!(device_id = %event.id, "Ignoring event for ignored device");
            return DispatchOutcome::Ignored;
        }

        let key = event.id.to_lowercase();
        let group = event.is_group_command();
        let targets = self.lookup(kind, &key, group);

        if !targets.is_empty() {
            let entities: Vec<_> = targets
                .into_iter()
                .filter_map(|t| match t {
                    Target::Entity(e) => Some(e),
                    Target::Placeholder => None,
                })
                .collect();
            if entities.is_empty() {
                debug!(device_id = %event.id, "Device is still being added, dropping event");
                return DispatchOutcome::Pending;
            }
            for entity in &entities {
                handle_event(entity.as_ref(), event);
            }
            return DispatchOutcome::Delivered(entities.len());
        }

        if group {
            debug!(device_id = %event.id, "No group receivers for broadcast");
            return DispatchOutcome::Dropped;
        }
        let Some(factory) = self.factories.read().get(&kind).cloned() else {
            debug!(device_id = %event.id, ?kind, "Unknown device and automatic add disabled");
            return DispatchOutcome::Dropped;
        };

        {
            let mut tables = self.tables.write();
            let normal = &mut tables.entry(kind).or_default().normal;
            if normal.get(&key).is_some_and(|t| !t.is_empty()) {
                drop(tables);
                return self.dispatch(event);
            }
            normal.insert(key.clone(), vec![Target::Placeholder]);
        }

        info!(device_id = %event.id, ?kind, "Adding new device");
        let this = self.clone();
        let event = event.clone();
        tokio::spawn(async move {
            this.add_device(kind, &key, factory, &event);
        });
        DispatchOutcome::AutoAdd
    }

    fn add_device(&self, kind: EventKind, key: &str, factory: DeviceFactory, event: &RflinkEvent) {
        match factory(event) {
            Ok(NewDevice { entity, registration }) => {
                self.register(kind, entity.clone(), &registration);
                self.remove_placeholder(kind, key);
                handle_event(entity.as_ref(), event);
            }
            Err(e) => {
                error!(device_id = %event.id, error = %e, "Failed to add device");
                self.remove_placeholder(kind, key);
            }
        }
    }

    fn remove_placeholder(&self, kind: EventKind, key: &str) {
        let mut tables = self.tables.write();
        if let Some(tables) = tables.get_mut(&kind) {
            if let Some(targets) = tables.normal.get_mut(key) {
                targets.retain(|t| matches!(t, Target::Entity(_)));
                if targets.is_empty() {
                    tables.normal.remove(key);
                }
            }
        }
    }
}
