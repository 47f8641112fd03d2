// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket binding, server side.
//!
//! A single full-duplex connection carries all three envelope kinds as text
//! frames. Outbound writes funnel through one writer task per connection, so
//! frames are never interleaved.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::authn::ClientSession;
use crate::connection::{ConnectionBase, ReplyTo, ServerConnection};
use crate::envelope::{
    short_id, AnyEnvelope, NotificationEnvelope, Op, RequestEnvelope, ResponseEnvelope,
};
use crate::error::{BusError, ErrorKind};
use crate::rnr::RnrChannel;
use crate::transport::auth::bearer_token;
use crate::transport::converter::{
    converter_for, MessageConverter, SUBPROTOCOL_NATIVE, SUBPROTOCOL_WOT,
};
use crate::transport::BusServer;

/// Query parameters accepted on the upgrade request, for clients that
/// cannot set headers.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub cid: Option<String>,
}

/// A server-held websocket connection.
pub struct WsServerConnection {
    base: ConnectionBase,
    tx: mpsc::UnboundedSender<Message>,
    rnr: RnrChannel,
    converter: &'static dyn MessageConverter,
}

impl WsServerConnection {
    fn push_envelope(&self, envelope: &AnyEnvelope) -> Result<(), BusError> {
        if !self.base.is_connected() {
            return Err(BusError::new(ErrorKind::NotConnected, "connection is closed"));
        }
        let text = self.converter.encode(envelope)?;
        let _ = self.tx.send(Message::Text(text.into()));
        Ok(())
    }

    pub fn base(&self) -> &ConnectionBase {
        &self.base
    }
}

impl ServerConnection for WsServerConnection {
    fn client_id(&self) -> &str {
        self.base.client_id()
    }

    fn connection_id(&self) -> &str {
        self.base.connection_id()
    }

    fn is_connected(&self) -> bool {
        self.base.is_connected()
    }

    fn close(&self) {
        if self.base.mark_disconnected() {
            self.base.cancel_token().cancel();
        }
    }

    fn send_notification(&self, notification: &NotificationEnvelope) {
        let Some(correlation_id) = self.base.subscription_for(notification) else {
            return;
        };
        let mut n = notification.clone();
        n.correlation_id = correlation_id;
        if let Err(e) = self.push_envelope(&AnyEnvelope::Notification(n)) {
            debug!(clcid = %self.base.clcid(), err = %e, "notification push failed");
        }
    }

    fn send_request(&self, mut request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        if request.correlation_id.is_empty() {
            request.correlation_id = short_id();
        }
        // The response arrives as an inbound frame and resolves via RnR.
        self.rnr.open(&request.correlation_id)?;
        self.rnr.wait_with_callback(
            &request.correlation_id,
            move |response| reply_to(response),
            Duration::ZERO,
        );
        self.push_envelope(&AnyEnvelope::Request(request))
    }

    fn send_response(&self, response: ResponseEnvelope) -> Result<(), BusError> {
        self.push_envelope(&AnyEnvelope::Response(response))
    }

    fn update_subscription(&self, request: &RequestEnvelope) {
        self.base.update_subscription(request);
    }

    fn last_active_ms(&self) -> u64 {
        self.base.last_active_ms()
    }
}

/// `GET /ws` — upgrade handler. Requires a valid token in the Authorization
/// header or the `token` query parameter.
pub async fn ws_handler(
    State(server): State<Arc<BusServer>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = bearer_token(&headers).map(str::to_owned).or(query.token);
    let session = match token
        .ok_or_else(|| BusError::new(ErrorKind::Unauthorized, "missing token"))
        .and_then(|t| server.authenticator.validate_token(&t))
    {
        Ok(session) => session,
        Err(err) => return err.into_response(),
    };
    let connection_id = query.cid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    ws.protocols([SUBPROTOCOL_NATIVE, SUBPROTOCOL_WOT])
        .on_upgrade(move |socket| handle_connection(server, session, connection_id, socket))
        .into_response()
}

/// Per-connection loop: one writer, one reader, torn down together.
async fn handle_connection(
    server: Arc<BusServer>,
    session: ClientSession,
    connection_id: String,
    socket: WebSocket,
) {
    let converter = converter_for(socket.protocol().and_then(|p| p.to_str().ok()));
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection = Arc::new(WsServerConnection {
        base: ConnectionBase::new(&session.client_id, &connection_id, ""),
        tx,
        rnr: server.rnr.clone(),
        converter,
    });
    let dyn_connection: Arc<dyn ServerConnection> = connection.clone();
    server.manager.add_connection(Arc::clone(&dyn_connection));
    debug!(client_id = %session.client_id, %connection_id, "websocket connected");

    loop {
        tokio::select! {
            _ = connection.base.cancel_token().cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                if ws_tx.send(message).await.is_err() {
                    break;
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&server, &connection, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(client_id = %session.client_id, err = %e, "websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    connection.close();
    server.manager.remove_connection(&dyn_connection);
    debug!(client_id = %session.client_id, %connection_id, "websocket disconnected");
}

/// Decode one inbound frame and dispatch it.
fn handle_frame(server: &Arc<BusServer>, connection: &Arc<WsServerConnection>, text: &str) {
    let envelope = match connection.converter.decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(err = %e, "dropping undecodable frame");
            return;
        }
    };
    connection.base.touch();
    let client_id = connection.base.client_id().to_owned();

    match envelope {
        AnyEnvelope::Request(mut request) => {
            request.sender_id = client_id;
            if request.correlation_id.is_empty() {
                request.correlation_id = short_id();
            }
            if request.operation == Op::Ping {
                let _ = connection.send_response(request.create_response(json!("pong")));
                return;
            }
            if request.operation.is_subscription_change() {
                connection.update_subscription(&request);
                let _ = connection.send_response(request.create_response(serde_json::Value::Null));
                return;
            }
            let reply_connection = Arc::clone(connection);
            let reply: ReplyTo = Arc::new(move |response| {
                if let Err(e) = reply_connection.send_response(response) {
                    debug!(err = %e, "websocket response push failed");
                }
            });
            let fallback = request.clone();
            if let Err(err) = server.manager.forward_request(request, reply) {
                let _ = connection.send_response(fallback.create_error_response(&err));
            }
        }
        AnyEnvelope::Response(mut response) => {
            response.sender_id = client_id;
            if !server.rnr.handle_response(response) {
                // Responses only exist for server-initiated requests here; an
                // unmatched one is a protocol violation.
                warn!("unmatched websocket response dropped");
            }
        }
        AnyEnvelope::Notification(mut notification) => {
            notification.sender_id = client_id;
            server.manager.forward_notification(notification);
        }
    }
}
