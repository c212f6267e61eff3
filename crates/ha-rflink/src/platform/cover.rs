//! Covers
//!
//! Open sends `UP`, close `DOWN`, stop `STOP`. Inverted covers swap `UP` and
//! `DOWN` on the wire; inbound events are interpreted as received. There is
//! no position feedback, so only fully open and fully closed positions can
//! be requested.

use super::PlatformContext;
use crate::config::{CoverDeviceConfig, CoverType, PlatformConfig};
use crate::dispatcher::Registration;
use crate::entity::{write_state, EntityBase, EntityCommand, RflinkEntity};
use crate::error::{Result, RflinkError};
use crate::event::{EventKind, RflinkEvent};
use async_trait::async_trait;
use ha_core::{State, STATE_CLOSED, STATE_OPEN, STATE_UNKNOWN};
use std::sync::Arc;

pub const DOMAIN: &str = "cover";

pub fn default_cover_type(device_id: &str) -> CoverType {
    if device_id.starts_with("newkaku") {
        CoverType::Inverted
    } else {
        CoverType::Standard
    }
}

pub struct RflinkCover {
    base: EntityBase,
    cover_type: CoverType,
}

impl RflinkCover {
    pub fn new(base: EntityBase, cover_type: CoverType) -> Self {
        Self { base, cover_type }
    }

    pub fn cover_type(&self) -> CoverType {
        self.cover_type
    }

    fn wire_token(&self, open: bool) -> &'static str {
        match (self.cover_type, open) {
            (CoverType::Standard, true) | (CoverType::Inverted, false) => "UP",
            (CoverType::Standard, false) | (CoverType::Inverted, true) => "DOWN",
        }
    }

    async fn send(&self, is_open: bool, command: &str) -> Result<()> {
        self.base.set_is_on(Some(is_open));
        write_state(self);
        self.base.send_command(command).await
    }
}

#[async_trait]
impl RflinkEntity for RflinkCover {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn apply_event(&self, event: &RflinkEvent) {
        match event.command.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("on" | "allon" | "up") => self.base.set_is_on(Some(true)),
            Some("off" | "alloff" | "down") => self.base.set_is_on(Some(false)),
            _ => {}
        }
    }

    fn state(&self) -> String {
        match self.base.is_on() {
            Some(true) => STATE_OPEN,
            Some(false) => STATE_CLOSED,
            None => STATE_UNKNOWN,
        }
        .to_string()
    }

    fn restore(&self, last: &State) {
        match last.state.as_str() {
            STATE_OPEN => self.base.set_is_on(Some(true)),
            STATE_CLOSED => self.base.set_is_on(Some(false)),
            _ => {}
        }
    }

    async fn handle_command(&self, command: EntityCommand) -> Result<()> {
        match command {
            EntityCommand::OpenCover => self.send(true, self.wire_token(true)).await,
            EntityCommand::CloseCover => self.send(false, self.wire_token(false)).await,
            EntityCommand::StopCover => self.send(true, "STOP").await,
            EntityCommand::SetCoverPosition(100) => self.send(true, self.wire_token(true)).await,
            EntityCommand::SetCoverPosition(0) => self.send(false, self.wire_token(false)).await,
            EntityCommand::SetCoverPosition(position) => Err(RflinkError::InvalidCommand(format!(
                "cover position must be 0 or 100, got {position}"
            ))),
            other => Err(RflinkError::Unsupported {
                entity: self.base.entity_id().to_string(),
                command: other.name().to_string(),
            }),
        }
    }
}

pub fn setup(ctx: &PlatformContext, config: &PlatformConfig<CoverDeviceConfig>) {
    for (device_id, device) in &config.devices {
        ctx.setup_device(DOMAIN, device_id, || {
            let base = ctx.base(DOMAIN, device_id, &device.options, &config.device_defaults)?;
            let cover_type = device
                .cover_type
                .unwrap_or_else(|| default_cover_type(device_id));
            ctx.add(
                EventKind::Command,
                Arc::new(RflinkCover::new(base, cover_type)),
                &Registration::from_options(device_id, &device.options),
            );
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::platform;

    fn config(yaml: &str) -> PlatformConfig<CoverDeviceConfig> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_default_type() {
        assert_eq!(default_cover_type("newkaku_0_1"), CoverType::Inverted);
        assert_eq!(default_cover_type("brel_0_1"), CoverType::Standard);
    }

    #[tokio::test]
    async fn test_standard_and_inverted_tokens() {
        let p = platform(None);
        setup(
            &p.ctx,
            &config("devices:\n  brel_0_1:\n    name: shade\n  newkaku_0_1:\n    name: blind\n"),
        );
        let registry = p.ctx.dispatcher.registry();
        let shade = registry.get("cover.shade").unwrap();
        let blind = registry.get("cover.blind").unwrap();

        shade.handle_command(EntityCommand::OpenCover).await.unwrap();
        shade.handle_command(EntityCommand::CloseCover).await.unwrap();
        blind.handle_command(EntityCommand::OpenCover).await.unwrap();
        blind.handle_command(EntityCommand::StopCover).await.unwrap();

        assert_eq!(p.test.protocol.commands(), vec!["UP", "DOWN", "DOWN", "STOP"]);
        assert!(p.test.host.states.is_state("cover.shade", STATE_CLOSED));
        assert!(p.test.host.states.is_state("cover.blind", STATE_OPEN));
    }

    #[tokio::test]
    async fn test_inbound_events() {
        let p = platform(None);
        setup(&p.ctx, &config("devices:\n  brel_0_1:\n    name: shade\n"));

        for (command, expected) in [
            ("up", STATE_OPEN),
            ("down", STATE_CLOSED),
            ("allon", STATE_OPEN),
            ("alloff", STATE_CLOSED),
            ("on", STATE_OPEN),
            ("off", STATE_CLOSED),
        ] {
            p.ctx.dispatcher.dispatch(&RflinkEvent::command("brel_0_1", command));
            assert!(p.test.host.states.is_state("cover.shade", expected), "{command}");
        }
    }

    #[tokio::test]
    async fn test_position_only_accepts_endpoints() {
        let p = platform(None);
        setup(&p.ctx, &config("devices:\n  brel_0_1:\n    type: inverted\n"));
        let cover = p.ctx.dispatcher.registry().get("cover.brel_0_1").unwrap();

        cover.handle_command(EntityCommand::SetCoverPosition(100)).await.unwrap();
        cover.handle_command(EntityCommand::SetCoverPosition(0)).await.unwrap();
        let result = cover.handle_command(EntityCommand::SetCoverPosition(40)).await;

        assert!(matches!(result, Err(RflinkError::InvalidCommand(_))));
        assert_eq!(p.test.protocol.commands(), vec!["DOWN", "UP"]);
    }
}
