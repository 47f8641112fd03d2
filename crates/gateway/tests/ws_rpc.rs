// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket end-to-end tests: RPC, connection reversal, subscription
//! fan-out, and forced-disconnect recovery, all against an in-process
//! gateway over real sockets.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use thingbus::connection::ReplyTo;
use thingbus::envelope::{NotificationEnvelope, Op, RequestEnvelope};
use thingbus::transport::ws_client::{WsClient, WsClientConfig};
use thingbusd::test_support::{login, spawn_gateway, TestGateway};

const SETTLE: Duration = Duration::from_millis(100);

async fn connected_client(
    gateway: &TestGateway,
    client_id: &str,
    password: &str,
) -> anyhow::Result<WsClient> {
    let token = login(&gateway.base_url(), client_id, password).await?;
    let client = WsClient::new(WsClientConfig::new(&gateway.base_url(), &token));
    client.connect().await.map_err(|e| anyhow::anyhow!("connect: {e}"))?;
    Ok(client)
}

/// Attach an echo handler, as a minimal Thing-hosting agent.
fn serve_echo(agent: &WsClient) {
    agent.set_request_handler(Some(Arc::new(|request: RequestEnvelope, reply: ReplyTo| {
        reply(request.create_response(request.input.clone()));
        Ok(())
    })));
}

#[tokio::test]
async fn ping_round_trips_within_a_second() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1")]).await?;
    let client = connected_client(&gateway, "consumer1", "pass1").await?;
    client.set_timeout(Duration::from_secs(1));

    client.ping().await.map_err(|e| anyhow::anyhow!("ping: {e}"))?;
    assert_eq!(gateway.state.server.manager.connection_count(), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_token_is_rejected_at_upgrade() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1")]).await?;
    let client = WsClient::new(WsClientConfig::new(&gateway.base_url(), "bogus"));
    let out = client.connect().await;
    assert_eq!(out.map_err(|e| e.kind), Err(thingbus::error::ErrorKind::Unauthorized));
    Ok(())
}

#[tokio::test]
async fn rpc_reverses_to_the_agent_connection() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1"), ("agent1", "pass1")]).await?;
    let agent = connected_client(&gateway, "agent1", "pass1").await?;
    serve_echo(&agent);

    let consumer = connected_client(&gateway, "consumer1", "pass1").await?;
    let response = consumer
        .invoke(RequestEnvelope::new(Op::InvokeAction, "agent1:thing1", "action1", json!("rpc test")))
        .await
        .map_err(|e| anyhow::anyhow!("invoke: {e}"))?;

    assert_eq!(response.ok().map(Value::clone), Ok(json!("rpc test")));
    // The reply carries the agent's authenticated identity.
    assert_eq!(response.sender_id, "agent1");
    Ok(())
}

#[tokio::test]
async fn agent_errors_come_back_as_problem_details() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1")]).await?;
    let consumer = connected_client(&gateway, "consumer1", "pass1").await?;

    // No agent connected: the reverse route fails and the transport turns
    // the error into a response envelope.
    let response = consumer
        .invoke(RequestEnvelope::new(Op::InvokeAction, "agent9:thing1", "go", json!(1)))
        .await
        .map_err(|e| anyhow::anyhow!("invoke: {e}"))?;
    let err = response.ok().map(Value::clone);
    assert_eq!(err.map_err(|e| e.kind), Err(thingbus::error::ErrorKind::NoRoute));
    Ok(())
}

#[tokio::test]
async fn subscription_gates_event_fan_out() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1"), ("agent1", "pass1")]).await?;
    let agent = connected_client(&gateway, "agent1", "pass1").await?;

    let consumer = connected_client(&gateway, "consumer1", "pass1").await?;
    let seen: Arc<Mutex<Vec<NotificationEnvelope>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        consumer.set_notification_handler(Some(Arc::new(move |n| seen.lock().push(n))));
    }
    consumer.subscribe("thing1", "overheated").await.map_err(|e| anyhow::anyhow!("{e}"))?;

    // Matching event reaches the subscriber; a different thing does not.
    agent.send_notification(NotificationEnvelope::event("thing1", "overheated", json!(true)))?;
    agent.send_notification(NotificationEnvelope::event("thing2", "overheated", json!(true)))?;
    tokio::time::sleep(SETTLE).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1, "exactly the subscribed event is delivered");
    assert_eq!(seen[0].thing_id, "thing1");
    assert_eq!(seen[0].sender_id, "agent1");
    assert!(!seen[0].correlation_id.is_empty(), "echoes the subscribe correlation id");
    Ok(())
}

#[tokio::test]
async fn history_records_agent_events() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1"), ("agent1", "pass1")]).await?;
    let agent = connected_client(&gateway, "agent1", "pass1").await?;

    for i in 0..3 {
        agent.send_notification(NotificationEnvelope::event("thing1", "count", json!(i)))?;
    }
    tokio::time::sleep(SETTLE).await;

    let consumer = connected_client(&gateway, "consumer1", "pass1").await?;
    let response = consumer
        .invoke(RequestEnvelope::new(
            Op::InvokeAction,
            "history",
            "readHistory",
            json!({"thingID": "thing1", "name": "count", "limit": 10}),
        ))
        .await
        .map_err(|e| anyhow::anyhow!("invoke: {e}"))?;
    let values: Vec<Value> = response.decode_value().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(values.len(), 3);
    assert_eq!(values[0]["data"], json!(2), "newest first");
    Ok(())
}

#[tokio::test]
async fn forced_disconnect_then_rpc_succeeds_after_reconnect() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1"), ("agent1", "pass1")]).await?;
    let agent = connected_client(&gateway, "agent1", "pass1").await?;
    serve_echo(&agent);

    let consumer = connected_client(&gateway, "consumer1", "pass1").await?;
    let transitions: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let transitions = Arc::clone(&transitions);
        consumer.set_connect_handler(Some(Arc::new(move |up| transitions.lock().push(up))));
    }

    gateway.state.server.manager.close_all();

    // Both clients auto-reconnect with the same connection ids.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if consumer.is_connected() && agent.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(consumer.is_connected(), "consumer did not reconnect");
    assert!(agent.is_connected(), "agent did not reconnect");
    assert_eq!(transitions.lock().as_slice(), [false, true]);

    let response = consumer
        .invoke(RequestEnvelope::new(Op::InvokeAction, "agent1:thing1", "action1", json!("rpc test")))
        .await
        .map_err(|e| anyhow::anyhow!("invoke after reconnect: {e}"))?;
    assert_eq!(response.ok().map(Value::clone), Ok(json!("rpc test")));
    Ok(())
}

#[tokio::test]
async fn wot_profile_negotiates_and_round_trips() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1"), ("agent1", "pass1")]).await?;
    let agent = connected_client(&gateway, "agent1", "pass1").await?;
    serve_echo(&agent);

    let token = login(&gateway.base_url(), "consumer1", "pass1").await?;
    let mut config = WsClientConfig::new(&gateway.base_url(), &token);
    config.wot_profile = true;
    let consumer = WsClient::new(config);
    consumer.connect().await.map_err(|e| anyhow::anyhow!("connect: {e}"))?;

    consumer.ping().await.map_err(|e| anyhow::anyhow!("ping: {e}"))?;

    // Cross-profile RPC: the WoT consumer reaches a native-profile agent.
    let response = consumer
        .invoke(RequestEnvelope::new(Op::InvokeAction, "agent1:thing1", "action1", json!("mixed")))
        .await
        .map_err(|e| anyhow::anyhow!("invoke: {e}"))?;
    assert_eq!(response.ok().map(Value::clone), Ok(json!("mixed")));
    Ok(())
}

#[tokio::test]
async fn duplicate_connection_id_replaces_the_session() -> anyhow::Result<()> {
    let gateway = spawn_gateway(&[("consumer1", "pass1")]).await?;
    let first = connected_client(&gateway, "consumer1", "pass1").await?;
    tokio::time::sleep(SETTLE).await;

    // A second upgrade with the same (clientID, cid) force-closes the old
    // connection server-side.
    let token = login(&gateway.base_url(), "consumer1", "pass1").await?;
    let addr = gateway.base_url().replacen("http://", "ws://", 1);
    let url = format!("{addr}/ws?token={token}&cid={}", first.connection_id());
    let (_stream, _) = tokio_tungstenite::connect_async(&url).await?;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(gateway.state.server.manager.connection_count(), 1);
    Ok(())
}
