// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket binding, client side.
//!
//! Keeps a stable connection id for its lifetime and reconnects with
//! exponential backoff after a dropped connection, presenting the same
//! token and id so the server treats it as the same logical session. An
//! authentication failure is terminal; cancellation stops cleanly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{ConnectHandler, NotificationSink, ReplyTo, RequestSink};
use crate::envelope::{
    short_id, AnyEnvelope, NotificationEnvelope, Op, RequestEnvelope, ResponseEnvelope,
};
use crate::error::{BusError, ErrorKind};
use crate::module::Module;
use crate::rnr::RnrChannel;
use crate::slot::CallbackSlot;
use crate::transport::converter::{MessageConverter, PassthroughConverter, WotWssConverter};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings for [`WsClient`].
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Server base URL, `http://` or `https://`.
    pub base_url: String,
    pub token: String,
    /// Module id this client reports in a pipeline.
    pub module_id: String,
    /// Negotiate the WoT subprotocol instead of the native profile.
    pub wot_profile: bool,
    pub request_timeout: Duration,
    pub max_backoff: Duration,
}

impl WsClientConfig {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.to_owned(),
            token: token.to_owned(),
            module_id: "ws-client".to_owned(),
            wot_profile: false,
            request_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(5),
        }
    }
}

struct ClientState {
    config: WsClientConfig,
    connection_id: String,
    converter: &'static dyn MessageConverter,
    rnr: RnrChannel,
    connected: AtomicBool,
    request_timeout_ms: AtomicU64,
    outbound: mpsc::UnboundedSender<Message>,
    // Taken by the run loop on connect.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    connect_handler: CallbackSlot<dyn Fn(bool) + Send + Sync>,
    request_sink:
        CallbackSlot<dyn Fn(RequestEnvelope, ReplyTo) -> Result<(), BusError> + Send + Sync>,
    notification_sink: CallbackSlot<dyn Fn(NotificationEnvelope) + Send + Sync>,
    cancel: CancellationToken,
}

/// Full-duplex client for the websocket binding. Cheap to clone; clones
/// share the connection.
#[derive(Clone)]
pub struct WsClient {
    state: Arc<ClientState>,
}

impl WsClient {
    pub fn new(config: WsClientConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let converter: &'static dyn MessageConverter =
            if config.wot_profile { &WotWssConverter } else { &PassthroughConverter };
        Self {
            state: Arc::new(ClientState {
                request_timeout_ms: AtomicU64::new(config.request_timeout.as_millis() as u64),
                config,
                connection_id: uuid::Uuid::new_v4().to_string(),
                converter,
                rnr: RnrChannel::new(),
                connected: AtomicBool::new(false),
                outbound,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                connect_handler: CallbackSlot::empty(),
                request_sink: CallbackSlot::empty(),
                notification_sink: CallbackSlot::empty(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Stable for the lifetime of this client, across reconnects.
    pub fn connection_id(&self) -> &str {
        &self.state.connection_id
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    pub fn set_connect_handler(&self, handler: Option<ConnectHandler>) {
        self.state.connect_handler.set(handler);
    }

    /// Set the handler for reversed inbound requests (agent side).
    pub fn set_request_handler(&self, handler: Option<RequestSink>) {
        self.state.request_sink.set(handler);
    }

    pub fn set_notification_handler(&self, handler: Option<NotificationSink>) {
        self.state.notification_sink.set(handler);
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.state.request_timeout_ms.store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.state.request_timeout_ms.load(Ordering::Relaxed))
    }

    /// Dial the server and start the receive/reconnect loop.
    ///
    /// The first dial is awaited so an invalid token fails fast; later
    /// drops are handled by the background loop.
    pub async fn connect(&self) -> Result<(), BusError> {
        let stream = self.dial().await?;
        let Some(outbound_rx) = self.state.outbound_rx.lock().take() else {
            return Err(BusError::new(ErrorKind::BadRequest, "client already connected"));
        };
        self.set_connected(true);
        let client = self.clone();
        tokio::spawn(client.run_loop(stream, outbound_rx));
        Ok(())
    }

    /// Stop the loop and drop the connection. Terminal.
    pub fn disconnect(&self) {
        self.state.cancel.cancel();
        self.set_connected(false);
        self.state.rnr.close_all();
    }

    async fn dial(&self) -> Result<WsStream, BusError> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let url = build_ws_url(
            &self.state.config.base_url,
            &self.state.config.token,
            &self.state.connection_id,
        );
        let mut request = url
            .into_client_request()
            .map_err(|e| BusError::new(ErrorKind::BadRequest, e.to_string()))?;
        request.headers_mut().insert(
            "sec-websocket-protocol",
            tokio_tungstenite::tungstenite::http::HeaderValue::from_static(
                self.state.converter.subprotocol(),
            ),
        );
        match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _)) => Ok(stream),
            Err(WsError::Http(response)) if response.status().as_u16() == 401 => {
                Err(BusError::new(ErrorKind::Unauthorized, "token rejected"))
            }
            Err(e) => Err(BusError::new(ErrorKind::UpgradeFailed, e.to_string())),
        }
    }

    async fn run_loop(self, first: WsStream, mut outbound_rx: mpsc::UnboundedReceiver<Message>) {
        let mut stream = Some(first);
        let mut backoff = Duration::from_millis(100);

        loop {
            let ws = match stream.take() {
                Some(ws) => ws,
                None => {
                    if self.state.cancel.is_cancelled() {
                        return;
                    }
                    tokio::select! {
                        _ = self.state.cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.state.config.max_backoff);
                    match self.dial().await {
                        Ok(ws) => ws,
                        Err(e) if e.kind == ErrorKind::Unauthorized => {
                            warn!(err = %e, "reconnect rejected, giving up");
                            return;
                        }
                        Err(e) => {
                            debug!(err = %e, backoff_ms = backoff.as_millis() as u64, "reconnect failed");
                            continue;
                        }
                    }
                }
            };
            backoff = Duration::from_millis(100);
            self.set_connected(true);
            debug!(connection_id = %self.state.connection_id, "websocket connected");

            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    _ = self.state.cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    }
                    outbound = outbound_rx.recv() => {
                        let Some(message) = outbound else { return };
                        if write.send(message).await.is_err() {
                            break;
                        }
                    }
                    inbound = read.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                debug!(err = %e, "websocket read error");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            self.set_connected(false);
        }
    }

    fn handle_frame(&self, text: &str) {
        let envelope = match self.state.converter.decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(err = %e, "dropping undecodable frame");
                return;
            }
        };
        match envelope {
            AnyEnvelope::Request(request) => {
                // Connection reversal: the server forwards a consumer request
                // to us; the reply travels back as a response frame.
                let Some(sink) = self.state.request_sink.get() else {
                    warn!(operation = %request.operation, "inbound request dropped: no sink");
                    return;
                };
                let me = self.clone();
                let reply: ReplyTo = Arc::new(move |response| {
                    if let Err(e) = me.send_envelope(&AnyEnvelope::Response(response)) {
                        warn!(err = %e, "response send failed");
                    }
                });
                let fallback = request.clone();
                if let Err(err) = sink(request, reply) {
                    let _ = self
                        .send_envelope(&AnyEnvelope::Response(fallback.create_error_response(&err)));
                }
            }
            AnyEnvelope::Response(response) => {
                if !self.state.rnr.handle_response(response) {
                    debug!("unmatched response dropped");
                }
            }
            AnyEnvelope::Notification(notification) => match self.state.notification_sink.get() {
                Some(sink) => sink(notification),
                None => debug!("notification dropped: no handler"),
            },
        }
    }

    fn set_connected(&self, connected: bool) {
        let was = self.state.connected.swap(connected, Ordering::AcqRel);
        if was != connected {
            if let Some(handler) = self.state.connect_handler.get() {
                handler(connected);
            }
        }
    }

    fn send_envelope(&self, envelope: &AnyEnvelope) -> Result<(), BusError> {
        let text = self.state.converter.encode(envelope)?;
        self.state
            .outbound
            .send(Message::Text(text.into()))
            .map_err(|_| BusError::new(ErrorKind::NotConnected, "send loop is gone"))
    }

    /// Fire a request. With a reply callback, the response is matched by
    /// correlation id and delivered asynchronously.
    pub fn send_request(
        &self,
        mut request: RequestEnvelope,
        reply_to: Option<ReplyTo>,
    ) -> Result<(), BusError> {
        if request.correlation_id.is_empty() {
            request.correlation_id = short_id();
        }
        if let Some(reply_to) = reply_to {
            self.state.rnr.open(&request.correlation_id)?;
            self.state.rnr.wait_with_callback(
                &request.correlation_id,
                move |response| reply_to(response),
                self.request_timeout(),
            );
        }
        self.send_envelope(&AnyEnvelope::Request(request))
    }

    /// Push a notification to the server (agent side).
    pub fn send_notification(&self, notification: NotificationEnvelope) -> Result<(), BusError> {
        self.send_envelope(&AnyEnvelope::Notification(notification))
    }

    /// Round-trip RPC: send and wait for the matching response.
    pub async fn invoke(&self, mut request: RequestEnvelope) -> Result<ResponseEnvelope, BusError> {
        if request.correlation_id.is_empty() {
            request.correlation_id = short_id();
        }
        let correlation_id = request.correlation_id.clone();
        self.state.rnr.open(&correlation_id)?;
        if let Err(err) = self.send_envelope(&AnyEnvelope::Request(request)) {
            self.state.rnr.close(&correlation_id);
            return Err(err);
        }
        let outcome =
            self.state.rnr.wait_for_response(&correlation_id, self.request_timeout()).await;
        self.state.rnr.close(&correlation_id);
        outcome.ok_or_else(|| BusError::new(ErrorKind::Timeout, "no response within the timeout"))
    }

    /// Health RPC; resolves once the server answers `pong`.
    pub async fn ping(&self) -> Result<(), BusError> {
        let response =
            self.invoke(RequestEnvelope::new(Op::Ping, "", "", serde_json::Value::Null)).await?;
        if response.ok()? == &json!("pong") {
            Ok(())
        } else {
            Err(BusError::new(ErrorKind::Internal, "unexpected ping reply"))
        }
    }

    pub async fn subscribe(&self, thing_id: &str, name: &str) -> Result<(), BusError> {
        self.subscription_rpc(Op::SubscribeEvent, thing_id, name).await
    }

    pub async fn unsubscribe(&self, thing_id: &str, name: &str) -> Result<(), BusError> {
        self.subscription_rpc(Op::UnsubscribeEvent, thing_id, name).await
    }

    pub async fn observe(&self, thing_id: &str, name: &str) -> Result<(), BusError> {
        self.subscription_rpc(Op::ObserveProperty, thing_id, name).await
    }

    pub async fn unobserve(&self, thing_id: &str, name: &str) -> Result<(), BusError> {
        self.subscription_rpc(Op::UnobserveProperty, thing_id, name).await
    }

    async fn subscription_rpc(
        &self,
        operation: Op,
        thing_id: &str,
        name: &str,
    ) -> Result<(), BusError> {
        let request = RequestEnvelope::new(operation, thing_id, name, serde_json::Value::Null);
        let response = self.invoke(request).await?;
        response.ok().map(|_| ())
    }
}

/// A connected websocket client is the tail module of a consumer or agent
/// pipeline: requests forward over the wire, notifications push upstream,
/// and reversed inbound requests drain into the request sink.
impl Module for WsClient {
    fn module_id(&self) -> &str {
        &self.state.config.module_id
    }

    fn handle_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        self.send_request(request, Some(reply_to))
    }

    fn handle_notification(&self, notification: NotificationEnvelope) {
        if let Err(e) = self.send_notification(notification) {
            warn!(err = %e, "notification send failed");
        }
    }

    fn set_request_sink(&self, sink: Option<RequestSink>) {
        self.state.request_sink.set(sink);
    }

    fn set_notification_sink(&self, sink: Option<NotificationSink>) {
        self.state.notification_sink.set(sink);
    }
}

/// Translate the HTTP base URL into the websocket endpoint.
fn build_ws_url(base_url: &str, token: &str, connection_id: &str) -> String {
    let ws_base = if base_url.starts_with("https://") {
        base_url.replacen("https://", "wss://", 1)
    } else {
        base_url.replacen("http://", "ws://", 1)
    };
    format!("{ws_base}/ws?token={token}&cid={connection_id}")
}

#[cfg(test)]
#[path = "ws_client_tests.rs"]
mod tests;
