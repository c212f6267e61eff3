//! Binary sensors
//!
//! With `off_delay` set, every `on` (re)arms a timer that switches the
//! sensor back off; an `off` disarms it. A restored `on` is never trusted
//! for such sensors since the timer that would have cleared it is gone.

use super::PlatformContext;
use crate::config::{BinarySensorDeviceConfig, PlatformConfig};
use crate::dispatcher::Registration;
use crate::entity::{write_state, EntityBase, RflinkEntity};
use crate::event::{EventKind, RflinkEvent};
use async_trait::async_trait;
use ha_core::{attrs, State, STATE_OFF, STATE_ON};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DOMAIN: &str = "binary_sensor";

pub struct RflinkBinarySensor {
    base: EntityBase,
    device_class: Option<String>,
    off_delay: Option<Duration>,
    timer: Mutex<Option<CancellationToken>>,
    me: Weak<RflinkBinarySensor>,
}

impl RflinkBinarySensor {
    pub fn new(
        base: EntityBase,
        device_class: Option<String>,
        off_delay: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            base,
            device_class,
            off_delay,
            timer: Mutex::new(None),
            me: me.clone(),
        })
    }

    fn disarm(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.cancel();
        }
    }

    fn arm(&self, delay: Duration) {
        let token = CancellationToken::new();
        if let Some(previous) = self.timer.lock().replace(token.clone()) {
            previous.cancel();
        }

        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let Some(sensor) = me.upgrade() else {
                        return;
                    };
                    {
                        let mut timer = sensor.timer.lock();
                        if token.is_cancelled() {
                            return;
                        }
                        *timer = None;
                    }
                    debug!(entity_id = %sensor.base.entity_id(), "Off delay elapsed");
                    sensor.base.set_is_on(Some(false));
                    write_state(sensor.as_ref());
                }
            }
        });
    }
}

#[async_trait]
impl RflinkEntity for RflinkBinarySensor {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn apply_event(&self, event: &RflinkEvent) {
        match event.command.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("on" | "allon") => {
                self.base.set_is_on(Some(true));
                if let Some(delay) = self.off_delay {
                    self.arm(delay);
                }
            }
            Some("off" | "alloff") => {
                self.base.set_is_on(Some(false));
                self.disarm();
            }
            _ => {}
        }
    }

    fn attributes(&self) -> HashMap<String, Value> {
        let mut attributes = HashMap::new();
        if let Some(class) = &self.device_class {
            attributes.insert(attrs::DEVICE_CLASS.to_string(), json!(class));
        }
        attributes
    }

    fn restore(&self, last: &State) {
        match last.state.as_str() {
            STATE_ON if self.off_delay.is_some() => self.base.set_is_on(Some(false)),
            STATE_ON => self.base.set_is_on(Some(true)),
            STATE_OFF => self.base.set_is_on(Some(false)),
            _ => {}
        }
    }
}

pub fn setup(ctx: &PlatformContext, config: &PlatformConfig<BinarySensorDeviceConfig>) {
    for (device_id, device) in &config.devices {
        ctx.setup_device(DOMAIN, device_id, || {
            let base = ctx
                .base(DOMAIN, device_id, &device.options, &config.device_defaults)?
                .with_force_update(device.force_update);
            let sensor = RflinkBinarySensor::new(
                base,
                device.device_class.clone(),
                device.off_delay.map(Duration::from_secs),
            );
            ctx.add(
                EventKind::Command,
                sensor,
                &Registration::from_options(device_id, &device.options),
            );
            Ok(())
        });
    }
}
