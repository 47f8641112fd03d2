// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level smoke tests: raw HTTP and websocket frames against a running
//! gateway, pinning the protocol surface independent of the client types.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use thingbus_specs::GatewayProcess;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

/// Send a JSON message over the WebSocket.
async fn ws_send(stream: &mut WsTx, value: &Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    stream.send(WsMessage::Text(text.into())).await.map_err(|e| anyhow::anyhow!("ws send: {e}"))?;
    Ok(())
}

/// Receive a JSON message from the WebSocket with timeout.
async fn ws_recv(stream: &mut WsRx, timeout: Duration) -> anyhow::Result<Value> {
    let msg = tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
        .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;

    match msg {
        WsMessage::Text(text) => Ok(serde_json::from_str(&text)?),
        other => anyhow::bail!("expected Text message, got {other:?}"),
    }
}

async fn ws_connect(gateway: &GatewayProcess, query: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let url = format!("{}/ws?{query}", gateway.ws_url());
    let (stream, _) =
        tokio_tungstenite::connect_async(&url).await.map_err(|e| anyhow::anyhow!("connect: {e}"))?;
    Ok(stream.split())
}

// ── HTTP ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn http_ping() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start(&[]).await?;
    let body = reqwest::get(format!("{}/ping", gateway.base_url)).await?.text().await?;
    assert_eq!(body, "pong");
    Ok(())
}

#[tokio::test]
async fn http_login_and_generic_request() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start(&[("consumer1", "pass1")]).await?;
    let token = gateway.login("consumer1", "pass1").await?;

    let client = reqwest::Client::new();
    let value: Value = client
        .post(format!("{}/readproperty/directory/thingCount", gateway.base_url))
        .bearer_auth(&token)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(value, json!(0));
    Ok(())
}

#[tokio::test]
async fn http_error_body_is_a_problem_detail() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start(&[("consumer1", "pass1")]).await?;
    let token = gateway.login("consumer1", "pass1").await?;

    let response = reqwest::Client::new()
        .post(format!("{}/readproperty/directory/nothere", gateway.base_url))
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], json!(404));
    assert_eq!(body["type"], "property-not-found");
    assert!(body["detail"].as_str().map(|d| d.contains("nothere")).unwrap_or(false));
    Ok(())
}

// ── WebSocket wire format ─────────────────────────────────────────────

#[tokio::test]
async fn ws_ping_frame_round_trip() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start(&[("consumer1", "pass1")]).await?;
    let token = gateway.login("consumer1", "pass1").await?;
    let (mut tx, mut rx) = ws_connect(&gateway, &format!("token={token}")).await?;

    ws_send(
        &mut tx,
        &json!({
            "messageType": "request",
            "operation": "ping",
            "correlationID": "ping-1",
        }),
    )
    .await?;

    let reply = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(reply["messageType"], "response");
    assert_eq!(reply["correlationID"], "ping-1");
    assert_eq!(reply["value"], "pong");
    Ok(())
}

#[tokio::test]
async fn ws_rejects_a_bad_token() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start(&[("consumer1", "pass1")]).await?;
    let result = tokio_tungstenite::connect_async(format!("{}/ws?token=bogus", gateway.ws_url())).await;
    assert!(result.is_err(), "upgrade must be refused");
    Ok(())
}

#[tokio::test]
async fn ws_subscribe_then_event_notification_carries_the_correlation_id() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start(&[("consumer1", "pass1"), ("agent1", "pass1")]).await?;

    let consumer_token = gateway.login("consumer1", "pass1").await?;
    let (mut consumer_tx, mut consumer_rx) =
        ws_connect(&gateway, &format!("token={consumer_token}")).await?;
    ws_send(
        &mut consumer_tx,
        &json!({
            "messageType": "request",
            "operation": "subscribeevent",
            "thingID": "thing1",
            "name": "overheated",
            "correlationID": "sub-1",
        }),
    )
    .await?;
    let ack = ws_recv(&mut consumer_rx, RECV_TIMEOUT).await?;
    assert_eq!(ack["messageType"], "response");
    assert_eq!(ack["correlationID"], "sub-1");

    let agent_token = gateway.login("agent1", "pass1").await?;
    let (mut agent_tx, _agent_rx) = ws_connect(&gateway, &format!("token={agent_token}")).await?;
    ws_send(
        &mut agent_tx,
        &json!({
            "messageType": "notification",
            "operation": "subscribeevent",
            "thingID": "thing1",
            "name": "overheated",
            "affordanceType": "event",
            "value": true,
        }),
    )
    .await?;

    let push = ws_recv(&mut consumer_rx, RECV_TIMEOUT).await?;
    assert_eq!(push["messageType"], "notification");
    assert_eq!(push["thingID"], "thing1");
    assert_eq!(push["correlationID"], "sub-1");
    // The server stamps the authoritative sender.
    assert_eq!(push["senderID"], "agent1");
    Ok(())
}

#[tokio::test]
async fn connection_count_reflects_live_sockets() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start(&[("consumer1", "pass1")]).await?;
    let token = gateway.login("consumer1", "pass1").await?;

    let (mut tx, mut rx) = ws_connect(&gateway, &format!("token={token}&cid=s1")).await?;
    ws_send(&mut tx, &json!({"messageType": "request", "operation": "ping"})).await?;
    let _ = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(gateway.connection_count(), 1);

    drop(tx);
    drop(rx);
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while gateway.connection_count() != 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(gateway.connection_count(), 0);
    Ok(())
}
