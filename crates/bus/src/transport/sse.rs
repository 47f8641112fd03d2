// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE binding, server side.
//!
//! Asymmetric transport: requests, responses, and notifications travel as
//! HTTP POST bodies in either direction while the server-to-client push
//! channel is a long-lived SSE GET. The first frame on a fresh channel is a
//! `ping` event, giving clients a reliable connected-signal; `ping` stays a
//! valid heartbeat frame afterwards.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::{Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::authn::ClientSession;
use crate::connection::{ConnectionBase, ReplyTo, ServerConnection};
use crate::envelope::{
    short_id, AnyEnvelope, NotificationEnvelope, Op, RequestEnvelope, ResponseEnvelope,
};
use crate::error::{BusError, ErrorKind};
use crate::rnr::RnrChannel;
use crate::server::ConnectionManager;
use crate::transport::http::{header_str, HEADER_CONNECTION_ID};
use crate::transport::BusServer;

/// Event name of the heartbeat / connected-signal frame.
pub const EVENT_PING: &str = "ping";
pub const EVENT_REQUEST: &str = "request";
pub const EVENT_RESPONSE: &str = "response";
pub const EVENT_NOTIFICATION: &str = "notification";

enum SseFrame {
    Event { event: &'static str, data: String },
    Close,
}

/// A server-held SSE return channel for one `(clientID, connectionID)`.
pub struct SseConnection {
    base: ConnectionBase,
    tx: mpsc::UnboundedSender<SseFrame>,
    rnr: RnrChannel,
    max_frame_size: usize,
}

impl SseConnection {
    fn push(&self, event: &'static str, data: String) {
        if !self.base.is_connected() {
            // Writes after close are harmless.
            return;
        }
        if data.len() > self.max_frame_size {
            warn!(
                clcid = %self.base.clcid(),
                size = data.len(),
                "dropping oversized SSE frame"
            );
            return;
        }
        let _ = self.tx.send(SseFrame::Event { event, data });
    }

    fn push_envelope(&self, event: &'static str, envelope: &AnyEnvelope) -> Result<(), BusError> {
        self.push(event, envelope.to_json()?);
        Ok(())
    }

    pub fn base(&self) -> &ConnectionBase {
        &self.base
    }
}

impl ServerConnection for SseConnection {
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
            let _ = self.tx.send(SseFrame::Close);
            self.base.cancel_token().cancel();
        }
    }

    fn send_notification(&self, notification: &NotificationEnvelope) {
        let Some(correlation_id) = self.base.subscription_for(notification) else {
            return;
        };
        let mut n = notification.clone();
        n.correlation_id = correlation_id;
        if let Err(e) = self.push_envelope(EVENT_NOTIFICATION, &AnyEnvelope::Notification(n)) {
            warn!(clcid = %self.base.clcid(), err = %e, "notification encode failed");
        }
    }

    fn send_request(&self, mut request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        if !self.base.is_connected() {
            return Err(BusError::new(ErrorKind::NotConnected, "connection is closed"));
        }
        if request.correlation_id.is_empty() {
            request.correlation_id = short_id();
        }
        // The response comes back decoupled, via POST /bus/response.
        self.rnr.open(&request.correlation_id)?;
        self.rnr.wait_with_callback(
            &request.correlation_id,
            move |response| reply_to(response),
            Duration::ZERO,
        );
        self.push_envelope(EVENT_REQUEST, &AnyEnvelope::Request(request))
    }

    fn send_response(&self, response: ResponseEnvelope) -> Result<(), BusError> {
        self.push_envelope(EVENT_RESPONSE, &AnyEnvelope::Response(response))
    }

    fn update_subscription(&self, request: &RequestEnvelope) {
        self.base.update_subscription(request);
    }

    fn last_active_ms(&self) -> u64 {
        self.base.last_active_ms()
    }
}

/// Removes the connection from the registry when the response stream drops.
struct ConnectionGuard {
    manager: Arc<ConnectionManager>,
    connection: Arc<dyn ServerConnection>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connection.close();
        self.manager.remove_connection(&self.connection);
    }
}

/// `GET /bus/sse` — open the return channel.
pub async fn sse_handler(
    State(server): State<Arc<BusServer>>,
    Extension(session): Extension<ClientSession>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connection_id = header_str(&headers, HEADER_CONNECTION_ID)
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let remote = header_str(&headers, "x-forwarded-for").unwrap_or_default();

    let (tx, rx) = mpsc::unbounded_channel();
    let connection = Arc::new(SseConnection {
        base: ConnectionBase::new(&session.client_id, &connection_id, remote),
        tx,
        rnr: server.rnr.clone(),
        max_frame_size: server.config.max_frame_size,
    });
    let dyn_connection: Arc<dyn ServerConnection> = connection.clone();
    server.manager.add_connection(Arc::clone(&dyn_connection));
    debug!(client_id = %session.client_id, %connection_id, "sse channel opened");

    // Connected-signal: queued before the stream is handed to axum, so it is
    // the first frame the client sees.
    connection.push(EVENT_PING, String::new());

    let guard = ConnectionGuard { manager: Arc::clone(&server.manager), connection: dyn_connection };
    let stream = UnboundedReceiverStream::new(rx)
        .take_while(|frame| std::future::ready(!matches!(frame, SseFrame::Close)))
        .filter_map(move |frame| {
            let _hold = &guard;
            std::future::ready(match frame {
                SseFrame::Event { event, data } => {
                    Some(Ok(Event::default().event(event).data(data)))
                }
                SseFrame::Close => None,
            })
        });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(server.config.keep_alive).text(EVENT_PING))
}

/// `POST /bus/request` — consumer posts a request; the response returns over
/// the SSE channel named by the `cid` header.
pub async fn post_request(
    State(server): State<Arc<BusServer>>,
    Extension(session): Extension<ClientSession>,
    headers: HeaderMap,
    Json(mut request): Json<RequestEnvelope>,
) -> Response {
    request.sender_id = session.client_id.clone();
    if request.correlation_id.is_empty() {
        request.correlation_id = short_id();
    }

    let Some(connection_id) = header_str(&headers, HEADER_CONNECTION_ID) else {
        return BusError::new(ErrorKind::NoSseChannel, "missing cid header").into_response();
    };
    let Some(connection) =
        server.manager.get_connection_by_connection_id(&session.client_id, connection_id)
    else {
        return BusError::new(
            ErrorKind::NoSseChannel,
            "open the sse channel before posting requests",
        )
        .into_response();
    };

    if request.operation.is_subscription_change() {
        connection.update_subscription(&request);
        return StatusCode::OK.into_response();
    }
    if request.operation == Op::Ping {
        let _ = connection.send_response(request.create_response(json!("pong")));
        return StatusCode::OK.into_response();
    }

    let reply_connection = Arc::clone(&connection);
    let reply: ReplyTo = Arc::new(move |response| {
        if let Err(e) = reply_connection.send_response(response) {
            warn!(err = %e, "sse response push failed");
        }
    });
    let fallback = request.clone();
    match server.manager.forward_request(request, reply) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            let _ = connection.send_response(fallback.create_error_response(&err));
            err.into_response()
        }
    }
}

/// `POST /bus/response` — agent return path (connection reversal).
pub async fn post_response(
    State(server): State<Arc<BusServer>>,
    Extension(session): Extension<ClientSession>,
    Json(mut response): Json<ResponseEnvelope>,
) -> Response {
    response.sender_id = session.client_id.clone();
    if !server.rnr.handle_response(response.clone()) {
        // No waiter: surface it upstream instead of dropping silently.
        debug!(
            correlation_id = %response.correlation_id,
            "unmatched response, forwarding as notification"
        );
        server.manager.forward_notification(NotificationEnvelope::from_response(&response));
    }
    StatusCode::OK.into_response()
}

/// `POST /bus/notification` — agent push path.
pub async fn post_notification(
    State(server): State<Arc<BusServer>>,
    Extension(session): Extension<ClientSession>,
    Json(mut notification): Json<NotificationEnvelope>,
) -> Response {
    notification.sender_id = session.client_id.clone();
    server.manager.forward_notification(notification);
    StatusCode::OK.into_response()
}
