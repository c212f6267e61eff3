//! Entity platforms
//!
//! Each platform maps RFLink commands onto one host domain. Configured
//! devices are built at setup; lights and sensors can also be created on
//! the fly for unknown device ids.

pub mod binary_sensor;
pub mod cover;
pub mod light;
pub mod sensor;
pub mod switch;

use crate::config::{DeviceDefaults, DeviceOptions, PlatformConfigs};
use crate::dispatcher::{Dispatcher, Registration};
use crate::entity::{EntityBase, EntityHost, RflinkEntity};
use crate::error::Result;
use crate::event::EventKind;
use ha_restore_state::RestoreStateStore;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What a platform needs to build and register entities
#[derive(Clone)]
pub struct PlatformContext {
    pub host: EntityHost,
    pub dispatcher: Arc<Dispatcher>,
    pub restore: Option<Arc<RestoreStateStore>>,
}

impl PlatformContext {
    /// Base for a device, named after `name` or else the device id
    pub(crate) fn base(
        &self,
        domain: &str,
        device_id: &str,
        options: &DeviceOptions,
        defaults: &DeviceDefaults,
    ) -> Result<EntityBase> {
        let resolved = options.resolve(defaults)?;
        let name = options.name.clone().unwrap_or_else(|| device_id.to_string());
        let entity_id = self
            .dispatcher
            .registry()
            .allocate_entity_id(domain, &name)?;
        Ok(EntityBase::new(
            entity_id,
            device_id,
            name,
            resolved,
            self.host.clone(),
        ))
    }

    /// Seed the entity from the last stored state, if any
    pub(crate) fn restore(&self, entity: &dyn RflinkEntity) {
        let Some(store) = &self.restore else {
            return;
        };
        if let Some(last) = store.last_state(entity.base().entity_id()) {
            debug!(entity_id = %last.entity_id, state = %last.state, "Restoring state");
            entity.restore(&last);
        }
    }

    /// Build and register one configured device
    ///
    /// A device that cannot be built is logged and skipped; the rest of the
    /// platform entry is still set up.
    pub(crate) fn setup_device<F>(&self, domain: &str, device_id: &str, build: F) -> bool
    where
        F: FnOnce() -> Result<()>,
    {
        match build() {
            Ok(()) => true,
            Err(e) => {
                error!(domain, device_id, error = %e, "Skipping device");
                false
            }
        }
    }

    /// Restore, then register under every key of `registration`
    pub(crate) fn add(
        &self,
        kind: EventKind,
        entity: Arc<dyn RflinkEntity>,
        registration: &Registration,
    ) {
        self.restore(entity.as_ref());
        self.dispatcher.register(kind, entity, registration);
    }
}

/// Build every configured entity and install the automatic add factories
///
/// `automatic_add` is the integration-wide default; a platform entry can
/// override it. The first light entry with automatic add enabled supplies
/// the defaults for new lights, likewise for sensors.
pub fn setup_platforms(
    ctx: &PlatformContext,
    configs: &PlatformConfigs,
    automatic_add: bool,
) -> usize {
    for config in &configs.lights {
        light::setup(ctx, config);
        if config.automatic_add.unwrap_or(automatic_add)
            && !ctx.dispatcher.automatic_add(EventKind::Command)
        {
            ctx.dispatcher.set_factory(
                EventKind::Command,
                light::factory(ctx.clone(), config.device_defaults.clone()),
            );
        }
    }
    for config in &configs.switches {
        switch::setup(ctx, config);
    }
    for config in &configs.covers {
        cover::setup(ctx, config);
    }
    for config in &configs.binary_sensors {
        binary_sensor::setup(ctx, config);
    }
    for config in &configs.sensors {
        sensor::setup(ctx, config);
        if config.automatic_add.unwrap_or(automatic_add)
            && !ctx.dispatcher.automatic_add(EventKind::Sensor)
        {
            ctx.dispatcher.set_factory(
                EventKind::Sensor,
                sensor::factory(ctx.clone(), config.device_defaults.clone()),
            );
        }
    }

    let count = ctx.dispatcher.registry().len();
    info!(
        entities = count,
        automatic_add_lights = ctx.dispatcher.automatic_add(EventKind::Command),
        automatic_add_sensors = ctx.dispatcher.automatic_add(EventKind::Sensor),
        "Platforms set up"
    );
    count
}
