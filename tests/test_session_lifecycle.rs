//! Integration tests for session lifecycle and message flow
//!
//! Runs the link client against an in-process WebSocket controller:
//! - connect/disconnect state sequences and idempotence
//! - command round trips and peer-reported failures
//! - heartbeat emission and the no-echo rule
//! - health-check detection of a silent controller
//! - protocol-error isolation (malformed inbound frames)


use devlink::config::LinkSection;
use devlink::protocol::{Envelope, MessageType};
use devlink::transport::ws::{ConnectionState, LinkEvent, WsClient};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use ws_harness::{ControllerHarness, ResponderMode};

fn test_config(url: String) -> LinkSection {
    LinkSection {
        url,
        reconnect_attempts: 5,
        reconnect_delay_ms: 50,
        max_reconnect_delay_ms: 200,
        ..Default::default()
    }
}

#[tokio::test]
async fn connect_then_disconnect() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();
    let mut events = client.events();

    client.connect().await.expect("connect should succeed");
    assert!(client.is_connected());

    // State sequence: disconnected -> connecting -> connected
    match events.recv().await.unwrap() {
        LinkEvent::StateChanged { previous, current } => {
            assert_eq!(previous, ConnectionState::Disconnected);
            assert_eq!(current, ConnectionState::Connecting);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match events.recv().await.unwrap() {
        LinkEvent::StateChanged { current, .. } => {
            assert_eq!(current, ConnectionState::Connected);
        }
        other => panic!("unexpected event {other:?}"),
    }

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_is_idempotent_while_connected() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();

    client.connect().await.unwrap();
    client.connect().await.expect("second connect is a no-op");
    client.connect().await.expect("third connect is a no-op");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        harness.connection_count(),
        1,
        "repeated connect() must not open extra transports"
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn command_round_trip() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();
    client.connect().await.unwrap();

    let result = client
        .send_command("park", json!({}), Some("mount-1"))
        .await
        .expect("acknowledged command should resolve");
    assert_eq!(result, json!({ "action": "park" }));

    // The controller saw exactly one command, addressed to the device
    let commands = harness.received_of_type(MessageType::ControlCommand).await;
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].peer_id.as_deref(), Some("mount-1"));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn peer_reported_failure_rejects_only_that_command() {
    let harness = ControllerHarness::start(ResponderMode::Fail).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();
    client.connect().await.unwrap();

    let result = client.send_command("goto", json!({"ra": 1.0}), None).await;
    match result {
        Err(devlink::LinkError::CommandFailed { message }) => {
            assert!(message.contains("goto"));
        }
        other => panic!("expected CommandFailed, got {other:?}"),
    }

    // A failed command never tears down the session
    assert!(client.is_connected());
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn status_updates_are_delivered_as_events() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();
    let mut events = client.events();
    client.connect().await.unwrap();

    let update = Envelope::new(
        MessageType::StatusUpdate,
        Some("mount-1".to_string()),
        json!({"tracking": true}),
    );
    harness.send_to_clients(&update);

    let received = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let LinkEvent::Message(envelope) = events.recv().await.unwrap() {
                if envelope.message_type == MessageType::StatusUpdate {
                    return envelope;
                }
            }
        }
    })
    .await
    .expect("status update should arrive");

    assert_eq!(received.peer_id.as_deref(), Some("mount-1"));
    assert_eq!(received.payload, json!({"tracking": true}));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn malformed_inbound_frames_are_dropped_without_side_effects() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();
    client.connect().await.unwrap();

    harness.send_raw_to_clients("this is not json");
    harness.send_raw_to_clients(r#"{"id": 42, "type": "nonsense"}"#);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Connection state untouched, and the session still works end to end
    assert!(client.is_connected());
    let result = client.send_command("stop", json!({}), None).await;
    assert!(result.is_ok());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn heartbeats_are_sent_periodically() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let config = LinkSection {
        heartbeat_interval_ms: 100,
        ..test_config(harness.url())
    };
    let client = WsClient::new(config).await.unwrap();
    client.connect().await.unwrap();

    assert!(
        harness
            .wait_for_messages(MessageType::Heartbeat, 2, Duration::from_secs(3))
            .await,
        "client should emit heartbeats at the configured interval"
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn inbound_heartbeats_are_never_echoed() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let config = LinkSection {
        // Park the outbound heartbeat far away so any heartbeat the
        // controller receives would have to be an echo
        heartbeat_interval_ms: 3_600_000,
        ..test_config(harness.url())
    };
    let client = WsClient::new(config).await.unwrap();
    client.connect().await.unwrap();

    for _ in 0..3 {
        harness.send_to_clients(&Envelope::heartbeat());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let echoed = harness.received_of_type(MessageType::Heartbeat).await;
    assert!(
        echoed.is_empty(),
        "heartbeats must not be echoed back, got {}",
        echoed.len()
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn silent_controller_trips_health_check_once_per_outage() {
    let harness = ControllerHarness::start(ResponderMode::Silent).await;
    let config = LinkSection {
        heartbeat_interval_ms: 3_600_000,
        health_check_interval_ms: 100,
        message_timeout_ms: 250,
        ..test_config(harness.url())
    };
    let client = WsClient::new(config).await.unwrap();
    let mut events = client.events();
    client.connect().await.unwrap();

    // Collect events until the forced reconnection completes
    let mut health_failures = 0;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                LinkEvent::HealthCheckFailed { reason } => {
                    assert!(reason.contains("no inbound message"));
                    health_failures += 1;
                }
                LinkEvent::Reconnected => break,
                _ => {}
            }
        }
    })
    .await
    .expect("health check should force a reconnection");

    assert_eq!(
        health_failures, 1,
        "staleness must trigger exactly one forced reconnection per outage"
    );
    assert!(
        harness
            .wait_for_connections(2, Duration::from_secs(2))
            .await,
        "a second transport should have been opened"
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn disconnect_rejects_pending_commands() {
    let harness = ControllerHarness::start(ResponderMode::Silent).await;
    let client = Arc::new(WsClient::new(test_config(harness.url())).await.unwrap());
    client.connect().await.unwrap();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.send_command("park", json!({}), None).await })
    };

    // Let the command reach the controller before tearing down
    assert!(
        harness
            .wait_for_messages(MessageType::ControlCommand, 1, Duration::from_secs(2))
            .await
    );
    client.disconnect().await.unwrap();

    let result = pending.await.unwrap();
    assert!(
        matches!(result, Err(devlink::LinkError::ConnectionClosed)),
        "pending commands must be rejected with ConnectionClosed, got {result:?}"
    );
}
