//! Integration tests for reconnection behavior
//!
//! - automatic recovery after an unclean close, with the documented state
//!   sequence `connecting, connected, reconnecting`
//! - subscription replay: the same keys, in insertion order, no duplicates
//! - FIFO flush of envelopes queued during the outage
//! - terminal failure after the configured attempt budget
//! - disconnect() cancelling a pending backoff timer


use devlink::config::LinkSection;
use devlink::protocol::{MessageType, SubscriptionPayload};
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

async fn wait_for_state<F>(client: &WsClient, predicate: F, timeout: Duration) -> bool
where
    F: Fn(&ConnectionState) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate(&client.state()) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn unclean_close_triggers_automatic_reconnection() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();
    let mut events = client.events();

    client.connect().await.unwrap();
    harness.kill_connections();

    // Observed sequence after the kill: reconnecting, then connected again
    let mut states = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                LinkEvent::StateChanged { current, .. } => {
                    states.push(current.clone());
                    if current == ConnectionState::Connected && states.len() > 2 {
                        break;
                    }
                }
                LinkEvent::Reconnected => {}
                _ => {}
            }
        }
    })
    .await
    .expect("client should reconnect after an unclean close");

    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting(1),
            ConnectionState::Connected,
        ]
    );
    assert_eq!(harness.connection_count(), 2);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn reconnected_event_follows_successful_recovery() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();
    let mut events = client.events();

    client.connect().await.unwrap();
    harness.kill_connections();

    let saw_reconnected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if matches!(events.recv().await.unwrap(), LinkEvent::Reconnected) {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);

    assert!(saw_reconnected);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn subscriptions_are_replayed_in_insertion_order() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let client = WsClient::new(test_config(harness.url())).await.unwrap();
    client.connect().await.unwrap();

    client
        .subscribe(vec!["position".to_string(), "tracking".to_string()], None)
        .await
        .unwrap();
    client
        .subscribe(vec!["temperature".to_string()], Some("mount-1"))
        .await
        .unwrap();
    // Duplicate key: must not produce a third replayed subscription
    client
        .subscribe(vec!["tracking".to_string(), "position".to_string()], None)
        .await
        .unwrap();

    assert!(
        harness
            .wait_for_messages(MessageType::Subscribe, 2, Duration::from_secs(2))
            .await
    );
    let before = harness.received_of_type(MessageType::Subscribe).await;
    assert_eq!(before.len(), 2, "duplicate subscribe must not re-send");

    harness.kill_connections();
    assert!(
        harness
            .wait_for_messages(MessageType::Subscribe, 4, Duration::from_secs(5))
            .await,
        "the full subscription set should be replayed after reconnect"
    );

    let all = harness.received_of_type(MessageType::Subscribe).await;
    assert_eq!(all.len(), 4, "replay must neither drop nor duplicate keys");

    let keys: Vec<(Option<String>, Vec<String>)> = all
        .iter()
        .map(|envelope| {
            let payload: SubscriptionPayload =
                serde_json::from_value(envelope.payload.clone()).unwrap();
            (envelope.peer_id.clone(), payload.topics)
        })
        .collect();

    // Replayed keys (last two) match the originals (first two), in order
    assert_eq!(keys[2], keys[0]);
    assert_eq!(keys[3], keys[1]);
    assert_eq!(
        keys[0],
        (
            None,
            vec!["position".to_string(), "tracking".to_string()]
        )
    );
    assert_eq!(
        keys[1],
        (Some("mount-1".to_string()), vec!["temperature".to_string()])
    );

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn commands_queued_during_outage_flush_in_fifo_order() {
    let harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let config = LinkSection {
        reconnect_delay_ms: 300,
        max_reconnect_delay_ms: 300,
        ..test_config(harness.url())
    };
    let client = Arc::new(WsClient::new(config).await.unwrap());
    client.connect().await.unwrap();

    harness.kill_connections();
    assert!(
        wait_for_state(
            &client,
            |state| matches!(state, ConnectionState::Reconnecting(_)),
            Duration::from_secs(2)
        )
        .await
    );

    // Issue commands into the outage window; they buffer in FIFO order
    let mut handles = Vec::new();
    for action in ["park", "goto", "stop"] {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client.send_command(action, json!({}), None).await
        }));
        // Small stagger so submission order is deterministic
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok(), "queued command should resolve after drain: {result:?}");
    }

    let commands = harness.received_of_type(MessageType::ControlCommand).await;
    let actions: Vec<String> = commands
        .iter()
        .map(|envelope| envelope.payload["action"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(actions, vec!["park", "goto", "stop"]);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn exhausted_attempts_end_in_terminal_error() {
    let mut harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let config = LinkSection {
        reconnect_attempts: 2,
        reconnect_delay_ms: 30,
        max_reconnect_delay_ms: 60,
        ..test_config(harness.url())
    };
    let client = WsClient::new(config).await.unwrap();
    let mut events = client.events();

    client.connect().await.unwrap();

    // Take the controller away for good
    harness.stop_accepting();
    harness.kill_connections();

    let attempts = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let LinkEvent::ReconnectFailed { attempts } = events.recv().await.unwrap() {
                return attempts;
            }
        }
    })
    .await
    .expect("reconnection should give up after the attempt budget");

    assert_eq!(attempts, 2);
    assert!(matches!(client.state(), ConnectionState::Error(_)));

    // Terminal state: no queuing, sends fail immediately
    let result = client.send_command("park", json!({}), None).await;
    assert!(matches!(result, Err(devlink::LinkError::NotConnected { .. })));
}

#[tokio::test]
async fn disconnect_cancels_pending_backoff() {
    let mut harness = ControllerHarness::start(ResponderMode::Acknowledge).await;
    let config = LinkSection {
        reconnect_attempts: 5,
        reconnect_delay_ms: 60_000, // park the cycle in its backoff wait
        max_reconnect_delay_ms: 60_000,
        ..test_config(harness.url())
    };
    let client = WsClient::new(config).await.unwrap();

    client.connect().await.unwrap();
    let connections_before = harness.connection_count();

    harness.stop_accepting();
    harness.kill_connections();
    assert!(
        wait_for_state(
            &client,
            |state| matches!(state, ConnectionState::Reconnecting(_)),
            Duration::from_secs(2)
        )
        .await
    );

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // No reconnection may happen after an explicit disconnect
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(harness.connection_count(), connections_before);
}
