//! Sensors
//!
//! One entity per sensor event id (`<device id>_<reading>`). The state is
//! the last reported value.

use super::PlatformContext;
use crate::config::{DeviceDefaults, DeviceOptions, PlatformConfig, SensorDeviceConfig};
use crate::dispatcher::{DeviceFactory, NewDevice, Registration};
use crate::entity::{EntityBase, RflinkEntity};
use crate::error::Result;
use crate::event::{EventKind, RflinkEvent};
use async_trait::async_trait;
use ha_core::{attrs, State, STATE_UNKNOWN};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const DOMAIN: &str = "sensor";

pub struct RflinkSensor {
    base: EntityBase,
    sensor_type: Mutex<Option<String>>,
    unit: Mutex<Option<String>>,
    value: Mutex<Option<Value>>,
}

impl RflinkSensor {
    pub fn new(base: EntityBase, sensor_type: Option<String>, unit: Option<String>) -> Self {
        Self {
            base,
            sensor_type: Mutex::new(sensor_type),
            unit: Mutex::new(unit),
            value: Mutex::new(None),
        }
    }

    pub fn sensor_type(&self) -> Option<String> {
        self.sensor_type.lock().clone()
    }

    pub fn unit(&self) -> Option<String> {
        self.unit.lock().clone()
    }
}

#[async_trait]
impl RflinkEntity for RflinkSensor {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn apply_event(&self, event: &RflinkEvent) {
        if let Some(value) = &event.value {
            *self.value.lock() = Some(value.clone());
        }
        {
            let mut sensor_type = self.sensor_type.lock();
            if sensor_type.is_none() {
                *sensor_type = event.sensor.clone();
            }
        }
        let mut unit = self.unit.lock();
        if unit.is_none() {
            *unit = event.unit.clone();
        }
    }

    fn state(&self) -> String {
        match &*self.value.lock() {
            None | Some(Value::Null) => STATE_UNKNOWN.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    fn attributes(&self) -> HashMap<String, Value> {
        let mut attributes = HashMap::new();
        if let Some(unit) = self.unit() {
            attributes.insert(attrs::UNIT_OF_MEASUREMENT.to_string(), json!(unit));
        }
        attributes
    }

    fn restore(&self, last: &State) {
        if !last.is_unknown() && !last.is_unavailable() {
            *self.value.lock() = Some(Value::String(last.state.clone()));
        }
    }
}

fn build(
    ctx: &PlatformContext,
    sensor_id: &str,
    options: &DeviceOptions,
    defaults: &DeviceDefaults,
    sensor_type: Option<String>,
    unit: Option<String>,
) -> Result<Arc<RflinkSensor>> {
    let base = ctx.base(DOMAIN, sensor_id, options, defaults)?;
    Ok(Arc::new(RflinkSensor::new(base, sensor_type, unit)))
}

pub fn setup(ctx: &PlatformContext, config: &PlatformConfig<SensorDeviceConfig>) {
    for (sensor_id, device) in &config.devices {
        ctx.setup_device(DOMAIN, sensor_id, || {
            let sensor_type = Some(device.sensor_type.clone()).filter(|t| !t.is_empty());
            let sensor = build(
                ctx,
                sensor_id,
                &device.options,
                &config.device_defaults,
                sensor_type,
                device.unit_of_measurement.clone(),
            )?;
            let mut registration = Registration::from_options(sensor_id, &device.options);
            registration.group = false;
            ctx.add(EventKind::Sensor, sensor, &registration);
            Ok(())
        });
    }
}

/// Creates sensors for unknown sensor events, with the event's unit
pub fn factory(ctx: PlatformContext, defaults: DeviceDefaults) -> DeviceFactory {
    Arc::new(move |event: &RflinkEvent| {
        let sensor = build(
            &ctx,
            &event.id,
            &DeviceOptions::default(),
            &defaults,
            event.sensor.clone(),
            event.unit.clone(),
        )?;
        ctx.restore(sensor.as_ref());
        let mut registration = Registration::new(&event.id);
        registration.group = false;
        Ok(NewDevice {
            entity: sensor,
            registration,
        })
    })
}
