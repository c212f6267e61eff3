//! Switches: `on`/`off` both ways, broadcasts included

use super::PlatformContext;
use crate::config::{PlatformConfig, SwitchDeviceConfig};
use crate::dispatcher::Registration;
use crate::entity::{write_state, EntityBase, EntityCommand, RflinkEntity};
use crate::error::{Result, RflinkError};
use crate::event::{EventKind, RflinkEvent};
use async_trait::async_trait;
use std::sync::Arc;

pub const DOMAIN: &str = "switch";

pub struct RflinkSwitch {
    base: EntityBase,
}

impl RflinkSwitch {
    pub fn new(base: EntityBase) -> Self {
        Self { base }
    }

    async fn send(&self, is_on: bool) -> Result<()> {
        self.base.set_is_on(Some(is_on));
        write_state(self);
        self.base.send_command(if is_on { "on" } else { "off" }).await
    }
}

#[async_trait]
impl RflinkEntity for RflinkSwitch {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn apply_event(&self, event: &RflinkEvent) {
        match event.command.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("on" | "allon") => self.base.set_is_on(Some(true)),
            Some("off" | "alloff") => self.base.set_is_on(Some(false)),
            _ => {}
        }
    }

    async fn handle_command(&self, command: EntityCommand) -> Result<()> {
        match command {
            EntityCommand::TurnOn { .. } => self.send(true).await,
            EntityCommand::TurnOff => self.send(false).await,
            other => Err(RflinkError::Unsupported {
                entity: self.base.entity_id().to_string(),
                command: other.name().to_string(),
            }),
        }
    }
}

pub fn setup(ctx: &PlatformContext, config: &PlatformConfig<SwitchDeviceConfig>) {
    for (device_id, device) in &config.devices {
        ctx.setup_device(DOMAIN, device_id, || {
            let base = ctx.base(DOMAIN, device_id, &device.options, &config.device_defaults)?;
            ctx.add(
                EventKind::Command,
                Arc::new(RflinkSwitch::new(base)),
                &Registration::from_options(device_id, &device.options),
            );
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceOptions;
    use crate::dispatcher::DispatchOutcome;
    use crate::platform::testing::platform;
    use ha_core::{STATE_OFF, STATE_ON};

    fn config(yaml: &str) -> PlatformConfig<SwitchDeviceConfig> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_configured_switch() {
        let p = platform(None);
        setup(
            &p.ctx,
            &config("devices:\n  protocol_0_0:\n    name: test\n    aliases: [test_alias_0_0]\n"),
        );

        let dispatcher = &p.ctx.dispatcher;
        dispatcher.dispatch(&RflinkEvent::command("protocol_0_0", "on"));
        assert!(p.test.host.states.is_state("switch.test", STATE_ON));

        dispatcher.dispatch(&RflinkEvent::command("test_alias_0_0", "alloff"));
        assert!(p.test.host.states.is_state("switch.test", STATE_OFF));
    }

    #[tokio::test]
    async fn test_commands_are_sent() {
        let p = platform(None);
        setup(&p.ctx, &config("devices:\n  protocol_0_1:\n"));
        let switch = p.ctx.dispatcher.registry().get("switch.protocol_0_1").unwrap();

        switch.handle_command(EntityCommand::TurnOn { brightness: None }).await.unwrap();
        assert!(p.test.host.states.is_state("switch.protocol_0_1", STATE_ON));
        switch.handle_command(EntityCommand::TurnOff).await.unwrap();

        assert_eq!(p.test.protocol.commands(), vec!["on", "off"]);
        assert!(switch.handle_command(EntityCommand::StopCover).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_device_is_skipped() {
        let p = platform(None);
        let mut config = config("devices:\n  protocol_0_1:\n    name: good\n");
        config.devices.insert(
            "protocol_0_2".to_string(),
            SwitchDeviceConfig {
                options: DeviceOptions {
                    name: Some("bad".to_string()),
                    signal_repetitions: Some(0),
                    ..Default::default()
                },
            },
        );
        config.devices.insert(
            "protocol_0_3".to_string(),
            SwitchDeviceConfig::default(),
        );
        setup(&p.ctx, &config);

        let registry = p.ctx.dispatcher.registry();
        assert_eq!(
            registry.entity_ids(),
            vec!["switch.good".to_string(), "switch.protocol_0_3".to_string()]
        );
        assert_eq!(
            p.ctx.dispatcher.dispatch(&RflinkEvent::command("protocol_0_2", "on")),
            DispatchOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn test_switches_are_never_auto_added() {
        let p = platform(None);
        setup(&p.ctx, &config("devices: {}\n"));
        assert_eq!(
            p.ctx.dispatcher.dispatch(&RflinkEvent::command("unknown_0_1", "on")),
            DispatchOutcome::Dropped
        );
    }
}
