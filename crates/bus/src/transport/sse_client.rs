// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE binding, client side.
//!
//! The push channel is a long-lived SSE GET; requests, responses, and
//! notifications travel as HTTP POSTs. The server's initial `ping` frame is
//! the connected-signal: a connect attempt that does not see it within the
//! configured timeout fails, and a reconnect is considered settled when the
//! next `ping` arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::{Event as SseEvent, Eventsource};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{ConnectHandler, NotificationSink, ReplyTo, RequestSink};
use crate::envelope::{
    short_id, NotificationEnvelope, Op, RequestEnvelope, ResponseEnvelope,
};
use crate::error::{BusError, ErrorKind};
use crate::module::Module;
use crate::rnr::RnrChannel;
use crate::slot::CallbackSlot;
use crate::transport::sse::{EVENT_NOTIFICATION, EVENT_PING, EVENT_REQUEST, EVENT_RESPONSE};

type EventStream = BoxStream<
    'static,
    Result<SseEvent, eventsource_stream::EventStreamError<reqwest::Error>>,
>;

/// Connection settings for [`SseClient`].
#[derive(Debug, Clone)]
pub struct SseClientConfig {
    /// Server base URL, `http://` or `https://`.
    pub base_url: String,
    pub token: String,
    /// Module id this client reports in a pipeline.
    pub module_id: String,
    /// How long to wait for the connected-signal ping.
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_backoff: Duration,
}

impl SseClientConfig {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            base_url: base_url.to_owned(),
            token: token.to_owned(),
            module_id: "sse-client".to_owned(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_backoff: Duration::from_secs(5),
        }
    }
}

struct ClientState {
    config: SseClientConfig,
    connection_id: String,
    http: reqwest::Client,
    rnr: RnrChannel,
    connected: AtomicBool,
    connect_handler: CallbackSlot<dyn Fn(bool) + Send + Sync>,
    request_sink:
        CallbackSlot<dyn Fn(RequestEnvelope, ReplyTo) -> Result<(), BusError> + Send + Sync>,
    notification_sink: CallbackSlot<dyn Fn(NotificationEnvelope) + Send + Sync>,
    cancel: CancellationToken,
}

/// Client for the SSE binding. Cheap to clone; clones share the channel.
#[derive(Clone)]
pub struct SseClient {
    state: Arc<ClientState>,
}

impl SseClient {
    pub fn new(config: SseClientConfig) -> Self {
        crate::ensure_crypto();
        Self {
            state: Arc::new(ClientState {
                config,
                connection_id: uuid::Uuid::new_v4().to_string(),
                http: reqwest::Client::new(),
                rnr: RnrChannel::new(),
                connected: AtomicBool::new(false),
                connect_handler: CallbackSlot::empty(),
                request_sink: CallbackSlot::empty(),
                notification_sink: CallbackSlot::empty(),
                cancel: CancellationToken::new(),
            }),
        }
    }

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

    /// Open the SSE channel and wait for the connected-signal ping.
    ///
    /// An HTTP 401 is terminal. Later drops reconnect in the background
    /// with exponential backoff, re-announcing `connected=false` per retry.
    pub async fn connect(&self) -> Result<(), BusError> {
        let mut stream = self.open_stream().await?;

        match tokio::time::timeout(self.state.config.connect_timeout, stream.next()).await {
            Ok(Some(Ok(event))) if event.event == EVENT_PING => {}
            Ok(Some(Err(e))) => {
                return Err(BusError::new(ErrorKind::UpgradeFailed, e.to_string()));
            }
            _ => {
                return Err(BusError::new(
                    ErrorKind::UpgradeFailed,
                    "no ping frame within the connect timeout",
                ));
            }
        }
        self.set_connected(true);
        let client = self.clone();
        tokio::spawn(client.run_loop(stream));
        Ok(())
    }

    /// Stop the loop and drop the channel. Terminal.
    pub fn disconnect(&self) {
        self.state.cancel.cancel();
        self.set_connected(false);
        self.state.rnr.close_all();
    }

    async fn open_stream(&self) -> Result<EventStream, BusError> {
        let url = format!("{}/bus/sse", self.state.config.base_url);
        let response = self
            .state
            .http
            .get(&url)
            .bearer_auth(&self.state.config.token)
            .header("cid", &self.state.connection_id)
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| BusError::new(ErrorKind::UpgradeFailed, e.to_string()))?;

        if response.status().as_u16() == 401 {
            return Err(BusError::new(ErrorKind::Unauthorized, "token rejected"));
        }
        let response = response
            .error_for_status()
            .map_err(|e| BusError::new(ErrorKind::UpgradeFailed, e.to_string()))?;
        Ok(response.bytes_stream().eventsource().boxed())
    }

    async fn run_loop(self, mut stream: EventStream) {
        let mut backoff = Duration::from_millis(100);
        loop {
            loop {
                tokio::select! {
                    _ = self.state.cancel.cancelled() => return,
                    event = stream.next() => {
                        match event {
                            Some(Ok(event)) => {
                                backoff = Duration::from_millis(100);
                                self.handle_event(event);
                            }
                            Some(Err(e)) => {
                                debug!(err = %e, "sse stream error");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            self.set_connected(false);

            // Reconnect with backoff; connected state resumes on the next
            // ping frame.
            loop {
                if self.state.cancel.is_cancelled() {
                    return;
                }
                tokio::select! {
                    _ = self.state.cancel.cancelled() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(self.state.config.max_backoff);
                match self.open_stream().await {
                    Ok(next) => {
                        stream = next;
                        break;
                    }
                    Err(e) if e.kind == ErrorKind::Unauthorized => {
                        warn!(err = %e, "reconnect rejected, giving up");
                        return;
                    }
                    Err(e) => {
                        debug!(err = %e, backoff_ms = backoff.as_millis() as u64, "reconnect failed");
                        self.set_connected(false);
                    }
                }
            }
        }
    }

    fn handle_event(&self, event: SseEvent) {
        match event.event.as_str() {
            EVENT_PING => {
                // Heartbeat doubles as the (re)connected signal.
                self.set_connected(true);
            }
            EVENT_REQUEST => match serde_json::from_str::<RequestEnvelope>(&event.data) {
                Ok(request) => self.handle_inbound_request(request),
                Err(e) => debug!(err = %e, "dropping undecodable request frame"),
            },
            EVENT_RESPONSE => match serde_json::from_str::<ResponseEnvelope>(&event.data) {
                Ok(response) => {
                    if !self.state.rnr.handle_response(response) {
                        debug!("unmatched response dropped");
                    }
                }
                Err(e) => debug!(err = %e, "dropping undecodable response frame"),
            },
            EVENT_NOTIFICATION => match serde_json::from_str::<NotificationEnvelope>(&event.data) {
                Ok(notification) => self.deliver_notification(notification),
                Err(e) => debug!(err = %e, "dropping undecodable notification frame"),
            },
            other => {
                // Unknown frame types surface as generic event notifications.
                self.deliver_notification(NotificationEnvelope::event("", other, json!(event.data)));
            }
        }
    }

    fn handle_inbound_request(&self, request: RequestEnvelope) {
        // Connection reversal: a consumer request proxied to this agent; the
        // reply goes back decoupled, through POST /bus/response.
        let Some(sink) = self.state.request_sink.get() else {
            warn!(operation = %request.operation, "inbound request dropped: no sink");
            return;
        };
        let me = self.clone();
        let reply: ReplyTo = Arc::new(move |response| {
            let me = me.clone();
            tokio::spawn(async move {
                if let Err(e) = me.post_response(&response).await {
                    warn!(err = %e, "response post failed");
                }
            });
        });
        let fallback = request.clone();
        if let Err(err) = sink(request, reply) {
            let me = self.clone();
            let response = fallback.create_error_response(&err);
            tokio::spawn(async move {
                if let Err(e) = me.post_response(&response).await {
                    warn!(err = %e, "error response post failed");
                }
            });
        }
    }

    fn deliver_notification(&self, notification: NotificationEnvelope) {
        match self.state.notification_sink.get() {
            Some(sink) => sink(notification),
            None => debug!("notification dropped: no handler"),
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

    async fn post_json<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<(), BusError> {
        let url = format!("{}{}", self.state.config.base_url, path);
        let response = self
            .state
            .http
            .post(&url)
            .bearer_auth(&self.state.config.token)
            .header("cid", &self.state.connection_id)
            .json(body)
            .send()
            .await
            .map_err(|e| BusError::new(ErrorKind::NotConnected, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        // Carry the problem detail through when the server sent one.
        let detail = response.text().await.unwrap_or_default();
        let err = serde_json::from_str::<crate::envelope::ErrorValue>(&detail)
            .ok()
            .and_then(|ev| ev.as_error());
        Err(err.unwrap_or_else(|| {
            BusError::new(ErrorKind::from_status(status.as_u16()), format!("http {status}"))
        }))
    }

    async fn post_request_envelope(&self, request: &RequestEnvelope) -> Result<(), BusError> {
        self.post_json("/bus/request", request).await
    }

    async fn post_response(&self, response: &ResponseEnvelope) -> Result<(), BusError> {
        self.post_json("/bus/response", response).await
    }

    /// Push a notification to the server (agent side).
    pub async fn post_notification(
        &self,
        notification: &NotificationEnvelope,
    ) -> Result<(), BusError> {
        self.post_json("/bus/notification", notification).await
    }

    /// Fire a request. With a reply callback, the response frame is matched
    /// by correlation id; a failed POST synthesizes an error response so the
    /// callback always resolves.
    pub async fn send_request(
        &self,
        mut request: RequestEnvelope,
        reply_to: Option<ReplyTo>,
    ) -> Result<(), BusError> {
        if request.correlation_id.is_empty() {
            request.correlation_id = short_id();
        }
        let Some(reply_to) = reply_to else {
            return self.post_request_envelope(&request).await;
        };

        self.state.rnr.open(&request.correlation_id)?;
        match self.post_request_envelope(&request).await {
            Ok(()) => {
                self.state.rnr.wait_with_callback(
                    &request.correlation_id,
                    move |response| reply_to(response),
                    self.state.config.request_timeout,
                );
                Ok(())
            }
            Err(err) => {
                self.state.rnr.close(&request.correlation_id);
                reply_to(request.create_error_response(&err));
                Ok(())
            }
        }
    }

    /// Round-trip RPC: post the request and wait for its response frame.
    pub async fn invoke(&self, mut request: RequestEnvelope) -> Result<ResponseEnvelope, BusError> {
        if request.correlation_id.is_empty() {
            request.correlation_id = short_id();
        }
        let correlation_id = request.correlation_id.clone();
        self.state.rnr.open(&correlation_id)?;
        if let Err(err) = self.post_request_envelope(&request).await {
            self.state.rnr.close(&correlation_id);
            return Err(err);
        }
        let outcome = self
            .state
            .rnr
            .wait_for_response(&correlation_id, self.state.config.request_timeout)
            .await;
        self.state.rnr.close(&correlation_id);
        outcome.ok_or_else(|| BusError::new(ErrorKind::Timeout, "no response within the timeout"))
    }

    /// Health RPC; resolves once the server answers `pong` over SSE.
    pub async fn ping(&self) -> Result<(), BusError> {
        let response =
            self.invoke(RequestEnvelope::new(Op::Ping, "", "", serde_json::Value::Null)).await?;
        if response.ok()? == &json!("pong") {
            Ok(())
        } else {
            Err(BusError::new(ErrorKind::Internal, "unexpected ping reply"))
        }
    }

    /// Subscription changes are absorbed by the server-side connection and
    /// acknowledged with an empty HTTP success, not an SSE frame.
    pub async fn subscribe(&self, thing_id: &str, name: &str) -> Result<(), BusError> {
        self.post_request_envelope(&RequestEnvelope::new(
            Op::SubscribeEvent,
            thing_id,
            name,
            serde_json::Value::Null,
        ))
        .await
    }

    pub async fn unsubscribe(&self, thing_id: &str, name: &str) -> Result<(), BusError> {
        self.post_request_envelope(&RequestEnvelope::new(
            Op::UnsubscribeEvent,
            thing_id,
            name,
            serde_json::Value::Null,
        ))
        .await
    }

    pub async fn observe(&self, thing_id: &str, name: &str) -> Result<(), BusError> {
        self.post_request_envelope(&RequestEnvelope::new(
            Op::ObserveProperty,
            thing_id,
            name,
            serde_json::Value::Null,
        ))
        .await
    }

    pub async fn unobserve(&self, thing_id: &str, name: &str) -> Result<(), BusError> {
        self.post_request_envelope(&RequestEnvelope::new(
            Op::UnobserveProperty,
            thing_id,
            name,
            serde_json::Value::Null,
        ))
        .await
    }
}

/// A connected SSE client can stand as the tail module of a pipeline:
/// requests post over HTTP with the response matched on the SSE channel.
impl Module for SseClient {
    fn module_id(&self) -> &str {
        &self.state.config.module_id
    }

    fn handle_request(&self, mut request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        if request.correlation_id.is_empty() {
            request.correlation_id = short_id();
        }
        let me = self.clone();
        tokio::spawn(async move {
            if let Err(e) = me.send_request(request, Some(reply_to)).await {
                warn!(err = %e, "request post failed");
            }
        });
        Ok(())
    }

    fn handle_notification(&self, notification: NotificationEnvelope) {
        let me = self.clone();
        tokio::spawn(async move {
            if let Err(e) = me.post_notification(&notification).await {
                warn!(err = %e, "notification post failed");
            }
        });
    }

    fn set_request_sink(&self, sink: Option<RequestSink>) {
        self.state.request_sink.set(sink);
    }

    fn set_notification_sink(&self, sink: Option<NotificationSink>) {
        self.state.notification_sink.set(sink);
    }
}
