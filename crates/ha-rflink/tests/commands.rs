mod common;

use common::{settle, start, MockConnector};
use ha_core::{Context, STATE_CLOSED, STATE_OFF, STATE_ON};
use ha_service_registry::ServiceError;
use serde_json::json;

const SWITCHES: &str = r#"
rflink:
  port: /dev/ttyACM0
switch:
  - platform: rflink
    device_defaults:
      signal_repetitions: 3
    devices:
      protocol_0_0:
        name: test
      protocol_0_1:
        name: test1
      protocol_0_2:
        name: once
        signal_repetitions: 1
"#;

#[tokio::test(start_paused = true)]
async fn turn_off_is_repeated() {
    let gateway = MockConnector::new(&[]);
    let (host, _rflink) = start(SWITCHES, &gateway).await;

    host.services
        .call("switch", "turn_off", json!({"entity_id": "switch.test"}), Context::new())
        .await
        .unwrap();
    settle().await;

    assert_eq!(gateway.commands(), vec!["off", "off", "off"]);
    assert!(host.states.is_state("switch.test", STATE_OFF));
}

#[tokio::test(start_paused = true)]
async fn repetition_override_per_device() {
    let gateway = MockConnector::new(&[]);
    let (host, _rflink) = start(SWITCHES, &gateway).await;

    host.services
        .call("switch", "turn_on", json!({"entity_id": "switch.once"}), Context::new())
        .await
        .unwrap();
    settle().await;

    assert_eq!(gateway.commands(), vec!["on"]);
}

#[tokio::test(start_paused = true)]
async fn new_command_cancels_stale_repetitions() {
    let gateway = MockConnector::new(&[]);
    let (host, _rflink) = start(SWITCHES, &gateway).await;

    host.services
        .call("switch", "turn_off", json!({"entity_id": "switch.test"}), Context::new())
        .await
        .unwrap();
    host.services
        .call("switch", "turn_on", json!({"entity_id": "switch.test"}), Context::new())
        .await
        .unwrap();
    settle().await;

    assert_eq!(gateway.commands(), vec!["off", "on", "on", "on"]);
    assert!(host.states.is_state("switch.test", STATE_ON));
}

#[tokio::test(start_paused = true)]
async fn repetitions_of_different_entities_alternate() {
    let gateway = MockConnector::new(&[]);
    let (host, _rflink) = start(SWITCHES, &gateway).await;

    host.services
        .call(
            "switch",
            "turn_off",
            json!({"entity_id": ["switch.test", "switch.test1"]}),
            Context::new(),
        )
        .await
        .unwrap();
    settle().await;

    let devices: Vec<String> = gateway.sent().into_iter().map(|(id, _)| id).collect();
    assert_eq!(
        devices,
        vec![
            "protocol_0_0",
            "protocol_0_1",
            "protocol_0_0",
            "protocol_0_1",
            "protocol_0_0",
            "protocol_0_1",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn commands_fail_while_disconnected() {
    let gateway = MockConnector::new(&[]);
    let config = r#"
rflink:
  port: /dev/ttyACM0
  reconnect_interval: 60
switch:
  - platform: rflink
    devices:
      protocol_0_0:
        name: test
"#;
    let (host, _rflink) = start(config, &gateway).await;
    gateway.set_failures(&[true]);
    gateway.disconnect();
    settle().await;

    let result = host
        .services
        .call("switch", "turn_on", json!({"entity_id": "switch.test"}), Context::new())
        .await;
    assert!(matches!(result, Err(ServiceError::CallFailed(_))));

    let raw = host
        .services
        .call(
            "rflink",
            "send_command",
            json!({"device_id": "protocol_0_0", "command": "on"}),
            Context::new(),
        )
        .await;
    assert!(matches!(raw, Err(ServiceError::CallFailed(_))));
    assert!(gateway.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn raw_command_updates_matching_entity() {
    let gateway = MockConnector::new(&[]);
    let (host, _rflink) = start(SWITCHES, &gateway).await;

    host.services
        .call(
            "rflink",
            "send_command",
            json!({"device_id": "protocol_0_0", "command": "on"}),
            Context::new(),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(gateway.commands(), vec!["on"]);
    assert!(host.states.is_state("switch.test", STATE_ON));

    let invalid = host
        .services
        .call(
            "rflink",
            "send_command",
            json!({"device_id": "protocol_0_0", "command": "self_destruct"}),
            Context::new(),
        )
        .await;
    assert!(matches!(invalid, Err(ServiceError::InvalidData(_))));
}

#[tokio::test(start_paused = true)]
async fn toggle_and_cover_services() {
    let gateway = MockConnector::new(&[]);
    let config = r#"
rflink:
  port: /dev/ttyACM0
light:
  - platform: rflink
    devices:
      kaku_41_1:
        name: lamp
cover:
  - platform: rflink
    devices:
      brel_0_1:
        name: shade
"#;
    let (host, _rflink) = start(config, &gateway).await;
    let lamp = json!({"entity_id": "light.lamp"});

    host.services.call("light", "toggle", lamp.clone(), Context::new()).await.unwrap();
    assert!(host.states.is_state("light.lamp", STATE_ON));
    host.services.call("light", "toggle", lamp, Context::new()).await.unwrap();
    assert!(host.states.is_state("light.lamp", STATE_OFF));

    host.services
        .call(
            "cover",
            "set_cover_position",
            json!({"entity_id": "cover.shade", "position": 0}),
            Context::new(),
        )
        .await
        .unwrap();
    assert!(host.states.is_state("cover.shade", STATE_CLOSED));

    let halfway = host
        .services
        .call(
            "cover",
            "set_cover_position",
            json!({"entity_id": "cover.shade", "position": 50}),
            Context::new(),
        )
        .await;
    assert!(matches!(halfway, Err(ServiceError::InvalidData(_))));

    // wrong domain for the entity: skipped
    host.services
        .call("switch", "turn_on", json!({"entity_id": "light.lamp"}), Context::new())
        .await
        .unwrap();

    assert_eq!(gateway.commands(), vec!["on", "off", "DOWN"]);
}
