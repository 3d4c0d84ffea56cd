//! End-to-end tests over real WebSocket connections

use serde_json::json;
use std::time::Duration;
use vision_test_utils::{TestRelay, DEFAULT_TIMEOUT};

const MOVEMENT: &str = "vision/sudoers/movement";
const HEARTBEAT: &str = "vision/sudoers/heartbeat";

#[tokio::test]
async fn test_welcome_relay_and_ping() {
    let relay = TestRelay::start().await;
    let mut client = relay.connect().await;

    let welcome = client.recv_json(DEFAULT_TIMEOUT).await.expect("welcome");
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["team_id"], "sudoers");
    assert!(welcome["client_id"].as_str().unwrap().starts_with("client-"));
    assert!(welcome["timestamp"].is_number());

    relay
        .relay()
        .ingest()
        .on_event(MOVEMENT, br#"{"status":"MOVING","servo_angle":42}"#)
        .await
        .unwrap();

    let msg = client
        .recv_type("mqtt_message", DEFAULT_TIMEOUT)
        .await
        .expect("relayed message");
    assert_eq!(msg["topic"], MOVEMENT);
    assert_eq!(msg["data"]["status"], "MOVING");
    assert_eq!(msg["data"]["servo_angle"], 42);
    assert!(msg["data"]["timestamp"].is_number());

    client.send_json(&json!({"type": "ping"})).await.unwrap();
    let pong = client.recv_type("pong", DEFAULT_TIMEOUT).await.expect("pong");
    assert!(pong["timestamp"].is_number());
}

#[tokio::test]
async fn test_late_joiner_gets_cached_state() {
    let relay = TestRelay::start().await;
    let ingest = relay.relay().ingest();

    ingest
        .on_event(MOVEMENT, br#"{"status":"IDLE","servo_angle":90,"timestamp":10}"#)
        .await
        .unwrap();
    ingest
        .on_event(HEARTBEAT, br#"{"node":"pi","status":"ONLINE","timestamp":11}"#)
        .await
        .unwrap();

    let mut client = relay.connect().await;
    let welcome = client.recv_json(DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(welcome["type"], "welcome");

    let movement = client.recv_json(DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(
        movement,
        json!({
            "type": "mqtt_message",
            "topic": MOVEMENT,
            "data": {"status": "IDLE", "servo_angle": 90, "timestamp": 10},
        })
    );

    let heartbeat = client.recv_json(DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(heartbeat["topic"], HEARTBEAT);
    assert_eq!(heartbeat["data"]["pi"]["node"], "pi");
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let relay = TestRelay::start().await;
    let mut a = relay.connect().await;
    let mut b = relay.connect().await;
    assert!(relay.wait_for_clients(2).await);

    relay
        .relay()
        .ingest()
        .on_event(HEARTBEAT, br#"{"node":"laptop","status":"ONLINE"}"#)
        .await
        .unwrap();

    for client in [&mut a, &mut b] {
        let msg = client
            .recv_type("mqtt_message", DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(msg["data"]["node"], "laptop");
    }
}

#[tokio::test]
async fn test_invalid_json_keeps_connection_open() {
    let relay = TestRelay::start().await;
    let mut client = relay.connect().await;
    client.recv_type("welcome", DEFAULT_TIMEOUT).await.unwrap();

    client.send_text("{definitely not json").await.unwrap();
    client.send_json(&json!({"type": "ping"})).await.unwrap();

    assert!(client.recv_type("pong", DEFAULT_TIMEOUT).await.is_some());
    assert_eq!(relay.relay().client_count(), 1);
}

#[tokio::test]
async fn test_disconnect_deregisters_client() {
    let relay = TestRelay::start().await;
    let client = relay.connect().await;
    assert!(relay.wait_for_clients(1).await);

    client.close().await;
    assert!(relay.wait_for_clients(0).await);
}

#[tokio::test]
async fn test_stop_closes_open_connections() {
    let relay = TestRelay::start().await;
    let mut client = relay.connect().await;
    client.recv_type("welcome", DEFAULT_TIMEOUT).await.unwrap();

    relay.relay().stop();
    assert!(client.wait_closed(Duration::from_secs(3)).await);
    assert!(relay.wait_for_clients(0).await);
}
