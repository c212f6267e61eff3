//! Lights
//!
//! | type | turn on | turn off |
//! |---|---|---|
//! | switchable | `on` | `off` |
//! | dimmable | dim level of the stored brightness | `off` |
//! | hybrid | dim level, then `on` at full brightness | `off` |
//! | toggle | `on`, flips state | `on`, flips state |

use super::PlatformContext;
use crate::command::{brightness_for_level, dim_level};
use crate::config::{DeviceDefaults, LightDeviceConfig, LightType, PlatformConfig};
use crate::dispatcher::{DeviceFactory, NewDevice, Registration};
use crate::entity::{write_state, EntityBase, EntityCommand, RflinkEntity};
use crate::error::{Result, RflinkError};
use crate::event::{EventKind, RflinkEvent};
use async_trait::async_trait;
use ha_core::{attrs, State};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const DOMAIN: &str = "light";

const MAX_BRIGHTNESS: u8 = 255;

/// Type used when the configuration does not name one
pub fn default_light_type(device_id: &str) -> LightType {
    if device_id.starts_with("newkaku") {
        LightType::Hybrid
    } else {
        LightType::Switchable
    }
}

/// Parse `set_level=N` with N in 0..=15
fn set_level(command: &str) -> Option<u8> {
    let (key, level) = command.split_once('=')?;
    if !key.eq_ignore_ascii_case("set_level") || level.is_empty() || level.len() > 2 {
        return None;
    }
    level.parse::<u8>().ok().filter(|l| *l <= 15)
}

pub struct RflinkLight {
    base: EntityBase,
    light_type: LightType,
    brightness: Mutex<u8>,
}

impl RflinkLight {
    pub fn new(base: EntityBase, light_type: LightType) -> Self {
        Self {
            base,
            light_type,
            brightness: Mutex::new(MAX_BRIGHTNESS),
        }
    }

    pub fn light_type(&self) -> LightType {
        self.light_type
    }

    pub fn brightness(&self) -> u8 {
        *self.brightness.lock()
    }

    fn dimmable(&self) -> bool {
        matches!(self.light_type, LightType::Dimmable | LightType::Hybrid)
    }

    /// Optimistically set the state, publish it, then send
    async fn send(&self, is_on: bool, command: &str) -> Result<()> {
        self.base.set_is_on(Some(is_on));
        write_state(self);
        self.base.send_command(command).await
    }

    async fn toggle(&self) -> Result<()> {
        let is_on = !self.base.is_on().unwrap_or(false);
        self.send(is_on, "on").await
    }

    async fn turn_on(&self, brightness: Option<u8>) -> Result<()> {
        match self.light_type {
            LightType::Switchable => self.send(true, "on").await,
            LightType::Toggle => self.toggle().await,
            LightType::Dimmable | LightType::Hybrid => {
                if let Some(b) = brightness {
                    *self.brightness.lock() = brightness_for_level(dim_level(b));
                }
                let brightness = self.brightness();
                self.send(true, &dim_level(brightness).to_string()).await?;
                // receivers without dimming support only understand `on`
                if self.light_type == LightType::Hybrid && brightness == MAX_BRIGHTNESS {
                    self.send(true, "on").await?;
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RflinkEntity for RflinkLight {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn apply_event(&self, event: &RflinkEvent) {
        let Some(command) = event.command.as_deref() else {
            return;
        };
        let command = command.to_ascii_lowercase();

        if self.light_type == LightType::Toggle {
            if command == "on" {
                self.base.set_is_on(Some(!self.base.is_on().unwrap_or(false)));
            }
            return;
        }

        match command.as_str() {
            "on" | "allon" => self.base.set_is_on(Some(true)),
            "off" | "alloff" => self.base.set_is_on(Some(false)),
            other => {
                if let Some(level) = set_level(other) {
                    *self.brightness.lock() = brightness_for_level(level);
                    self.base.set_is_on(Some(true));
                } else {
                    debug!(entity_id = %self.base.entity_id(), command = other, "Ignoring command");
                }
            }
        }
    }

    fn attributes(&self) -> HashMap<String, Value> {
        let mut attributes = HashMap::new();
        if self.dimmable() && self.base.is_on() == Some(true) {
            attributes.insert(attrs::BRIGHTNESS.to_string(), json!(self.brightness()));
        }
        attributes
    }

    fn restore(&self, last: &State) {
        match last.state.as_str() {
            ha_core::STATE_ON => self.base.set_is_on(Some(true)),
            ha_core::STATE_OFF => self.base.set_is_on(Some(false)),
            _ => {}
        }
        if let Some(brightness) = last.attribute::<u8>(attrs::BRIGHTNESS) {
            *self.brightness.lock() = brightness;
        }
    }

    async fn handle_command(&self, command: EntityCommand) -> Result<()> {
        match command {
            EntityCommand::TurnOn { brightness } => self.turn_on(brightness).await,
            EntityCommand::TurnOff if self.light_type == LightType::Toggle => self.toggle().await,
            EntityCommand::TurnOff => self.send(false, "off").await,
            other => Err(RflinkError::Unsupported {
                entity: self.base.entity_id().to_string(),
                command: other.name().to_string(),
            }),
        }
    }
}

fn build(
    ctx: &PlatformContext,
    device_id: &str,
    device: &LightDeviceConfig,
    defaults: &DeviceDefaults,
) -> Result<Arc<RflinkLight>> {
    let base = ctx.base(DOMAIN, device_id, &device.options, defaults)?;
    let light_type = device
        .light_type
        .unwrap_or_else(|| default_light_type(device_id));
    Ok(Arc::new(RflinkLight::new(base, light_type)))
}

/// Register the configured lights of one platform entry
pub fn setup(ctx: &PlatformContext, config: &PlatformConfig<LightDeviceConfig>) {
    for (device_id, device) in &config.devices {
        ctx.setup_device(DOMAIN, device_id, || {
            let light = build(ctx, device_id, device, &config.device_defaults)?;
            ctx.add(
                EventKind::Command,
                light,
                &Registration::from_options(device_id, &device.options),
            );
            Ok(())
        });
    }
}

/// Creates lights for unknown command events
pub fn factory(ctx: PlatformContext, defaults: DeviceDefaults) -> DeviceFactory {
    Arc::new(move |event: &RflinkEvent| {
        let light = build(&ctx, &event.id, &LightDeviceConfig::default(), &defaults)?;
        ctx.restore(light.as_ref());
        Ok(NewDevice {
            entity: light,
            registration: Registration::new(&event.id),
        })
    })
}
