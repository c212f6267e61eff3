//! Host services
//!
//! Entity services (`light.turn_on`, `cover.close_cover`, …) translate a
//! call into an [`EntityCommand`] for every targeted RFLink entity of the
//! service's domain. `rflink.send_command` transmits a raw command for any
//! device id, registered or not, and feeds the same command back through
//! dispatch so matching entities follow what was sent.

use crate::config::DOMAIN;
use crate::connection::ConnectionHandle;
use crate::entity::EntityCommand;
use crate::event::RflinkEvent;
use crate::platform::{cover, light, switch};
use crate::registry::EntityRegistry;
use ha_core::ServiceCall;
use ha_service_registry::{ServiceDescription, ServiceError, ServiceRegistry};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};

pub const SERVICE_SEND_COMMAND: &str = "send_command";

/// Commands accepted by `rflink.send_command`
const VALID_SEND_COMMAND: &str =
    r"(?i)^(on|off|allon|alloff|up|down|stop|pair|unpair|bright|color|disco\+|disco-|mode[0-8]|set_level=\d{1,2}|\d{1,2})$";

fn describe(domain: &str, service: &str, description: &str, schema: Value) -> ServiceDescription {
    ServiceDescription {
        domain: domain.to_string(),
        service: service.to_string(),
        description: Some(description.to_string()),
        schema: Some(schema),
    }
}

fn entity_schema(extra: Value) -> Value {
    let mut properties = json!({
        "entity_id": {
            "oneOf": [
                {"type": "string"},
                {"type": "array", "items": {"type": "string"}}
            ]
        }
    });
    if let (Some(properties), Value::Object(extra)) = (properties.as_object_mut(), extra) {
        properties.extend(extra);
    }
    json!({"type": "object", "properties": properties})
}

/// Maps a call and the entity's current on/off value to a command
type ToCommand = fn(&ServiceCall, Option<bool>) -> Result<EntityCommand, ServiceError>;

fn register_entity_service(
    services: &ServiceRegistry,
    registry: &Arc<EntityRegistry>,
    domain: &'static str,
    service: &'static str,
    description: &str,
    schema: Value,
    to_command: ToCommand,
) -> Result<(), ServiceError> {
    let registry = registry.clone();
    services.register(
        describe(domain, service, description, schema),
        move |call: ServiceCall| {
            let registry = registry.clone();
            async move {
                for entity_id in call.entity_ids() {
                    let Some(entity) = registry
                        .get(&entity_id)
                        .filter(|e| e.base().entity_id().domain() == domain)
                    else {
                        warn!(%entity_id, service = %call.service_id(), "No such entity");
                        continue;
                    };
                    let command = to_command(&call, entity.base().is_on())?;
                    entity.handle_command(command).await.map_err(|e| {
                        error!(%entity_id, service = %call.service_id(), error = %e, "Command failed");
                        ServiceError::from(e)
                    })?;
                }
                Ok(())
            }
        },
    )
}

fn turn_on(call: &ServiceCall, _: Option<bool>) -> Result<EntityCommand, ServiceError> {
    Ok(EntityCommand::TurnOn {
        brightness: call.get::<u8>("brightness"),
    })
}

fn turn_off(_: &ServiceCall, _: Option<bool>) -> Result<EntityCommand, ServiceError> {
    Ok(EntityCommand::TurnOff)
}

fn toggle(_: &ServiceCall, is_on: Option<bool>) -> Result<EntityCommand, ServiceError> {
    Ok(if is_on == Some(true) {
        EntityCommand::TurnOff
    } else {
        EntityCommand::TurnOn { brightness: None }
    })
}

fn open_cover(_: &ServiceCall, _: Option<bool>) -> Result<EntityCommand, ServiceError> {
    Ok(EntityCommand::OpenCover)
}

fn close_cover(_: &ServiceCall, _: Option<bool>) -> Result<EntityCommand, ServiceError> {
    Ok(EntityCommand::CloseCover)
}

fn stop_cover(_: &ServiceCall, _: Option<bool>) -> Result<EntityCommand, ServiceError> {
    Ok(EntityCommand::StopCover)
}

fn set_cover_position(call: &ServiceCall, _: Option<bool>) -> Result<EntityCommand, ServiceError> {
    call.get::<u8>("position")
        .map(EntityCommand::SetCoverPosition)
        .ok_or_else(|| ServiceError::InvalidData("position is required".to_string()))
}

/// Register the entity services of every platform and `rflink.send_command`
pub fn register_services(
    services: &ServiceRegistry,
    registry: &Arc<EntityRegistry>,
    connection: Arc<ConnectionHandle>,
    events: mpsc::UnboundedSender<RflinkEvent>,
) -> Result<(), ServiceError> {
    let brightness = entity_schema(json!({
        "brightness": {"type": "integer", "minimum": 0, "maximum": 255}
    }));
    let plain = entity_schema(json!({}));
    let position = entity_schema(json!({
        "position": {"type": "integer", "minimum": 0, "maximum": 100}
    }));

    let table: [(&'static str, &'static str, &str, &Value, ToCommand); 10] = [
        (light::DOMAIN, "turn_on", "Turn a light on", &brightness, turn_on),
        (light::DOMAIN, "turn_off", "Turn a light off", &plain, turn_off),
        (light::DOMAIN, "toggle", "Toggle a light", &plain, toggle),
        (switch::DOMAIN, "turn_on", "Turn a switch on", &plain, turn_on),
        (switch::DOMAIN, "turn_off", "Turn a switch off", &plain, turn_off),
        (switch::DOMAIN, "toggle", "Toggle a switch", &plain, toggle),
        (cover::DOMAIN, "open_cover", "Open a cover", &plain, open_cover),
        (cover::DOMAIN, "close_cover", "Close a cover", &plain, close_cover),
        (cover::DOMAIN, "stop_cover", "Stop a cover", &plain, stop_cover),
        (
            cover::DOMAIN,
            "set_cover_position",
            "Fully open (100) or close (0) a cover",
            &position,
            set_cover_position,
        ),
    ];
    for (domain, service, description, schema, to_command) in table {
        register_entity_service(
            services,
            registry,
            domain,
            service,
            description,
            schema.clone(),
            to_command,
        )?;
    }

    register_send_command(services, connection, events)
}

fn register_send_command(
    services: &ServiceRegistry,
    connection: Arc<ConnectionHandle>,
    events: mpsc::UnboundedSender<RflinkEvent>,
) -> Result<(), ServiceError> {
    let valid = Regex::new(VALID_SEND_COMMAND).map_err(|e| ServiceError::InvalidSchema {
        service: format!("{DOMAIN}.{SERVICE_SEND_COMMAND}"),
        reason: e.to_string(),
    })?;
    let schema = json!({
        "type": "object",
        "required": ["device_id", "command"],
        "properties": {
            "device_id": {"type": "string", "minLength": 1},
            "command": {"type": "string", "minLength": 1}
        }
    });

    services.register(
        describe(
            DOMAIN,
            SERVICE_SEND_COMMAND,
            "Send a raw command to a device",
            schema,
        ),
        move |call: ServiceCall| {
            let connection = connection.clone();
            let events = events.clone();
            let valid = valid.clone();
            async move {
                let (Some(device_id), Some(command)) =
                    (call.get::<String>("device_id"), call.get::<String>("command"))
                else {
                    return Err(ServiceError::InvalidData(
                        "device_id and command are required".to_string(),
                    ));
                };
                if !valid.is_match(&command) {
                    return Err(ServiceError::InvalidData(format!(
                        "unsupported command '{command}'"
                    )));
                }

                connection.send(&device_id, &command).await.map_err(|e| {
                    error!(%device_id, %command, error = %e, "Failed RFLink command");
                    ServiceError::from(e)
                })?;

                // a closed channel only means dispatch has stopped
                let _ = events.send(RflinkEvent::command(device_id, command.to_lowercase()));
                Ok(())
            }
        },
    )
}
