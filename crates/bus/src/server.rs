// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side connection registry and routing.
//!
//! Tracks every live consumer/agent connection under two indexes, fans out
//! notifications, routes requests to the pipeline or back out to a connected
//! agent (connection reversal), and force-closes duplicates and stale
//! sessions. Lookups hold the lock; I/O never does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, warn};

use crate::connection::{epoch_ms, NotificationSink, ReplyTo, RequestSink, ServerConnection};
use crate::envelope::{NotificationEnvelope, RequestEnvelope};
use crate::error::{BusError, ErrorKind};
use crate::slot::CallbackSlot;

/// Name of the published connection-count property.
pub const PROP_NR_CONNECTIONS: &str = "nrConnections";

/// Invoked with `(connected, clcid)` when a connection joins or leaves.
pub type ServerConnectHandler = Arc<dyn Fn(bool, &str) + Send + Sync>;

#[derive(Default)]
struct Indexes {
    // "{clientID}:{connectionID}" → connection
    by_clcid: HashMap<String, Arc<dyn ServerConnection>>,
    // clientID → connection ids, oldest first
    by_client: HashMap<String, Vec<String>>,
}

/// Registry of live connections shared by all transport bindings.
pub struct ConnectionManager {
    module_id: String,
    inner: RwLock<Indexes>,
    request_sink: CallbackSlot<dyn Fn(RequestEnvelope, ReplyTo) -> Result<(), BusError> + Send + Sync>,
    notification_sink: CallbackSlot<dyn Fn(NotificationEnvelope) + Send + Sync>,
    connect_handler: CallbackSlot<dyn Fn(bool, &str) + Send + Sync>,
}

impl ConnectionManager {
    pub fn new(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_owned(),
            inner: RwLock::new(Indexes::default()),
            request_sink: CallbackSlot::empty(),
            notification_sink: CallbackSlot::empty(),
            connect_handler: CallbackSlot::empty(),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn set_request_sink(&self, sink: Option<RequestSink>) {
        self.request_sink.set(sink);
    }

    pub fn set_notification_sink(&self, sink: Option<NotificationSink>) {
        self.notification_sink.set(sink);
    }

    pub fn set_connect_handler(&self, handler: Option<ServerConnectHandler>) {
        self.connect_handler.set(handler);
    }

    /// Register a connection. An existing connection with the same
    /// `{clientID}:{connectionID}` is force-closed and replaced.
    pub fn add_connection(&self, connection: Arc<dyn ServerConnection>) {
        let client_id = connection.client_id().to_owned();
        let connection_id = connection.connection_id().to_owned();
        let clcid = format!("{client_id}:{connection_id}");

        let displaced = {
            let mut inner = self.inner.write();
            let displaced = inner.by_clcid.insert(clcid.clone(), Arc::clone(&connection));
            let ids = inner.by_client.entry(client_id.clone()).or_default();
            if !ids.iter().any(|id| id == &connection_id) {
                ids.push(connection_id.clone());
            }
            displaced
        };
        if let Some(old) = displaced {
            warn!(%clcid, "duplicate connection, closing the previous one");
            old.close();
        }
        debug!(%clcid, "connection added");
        if let Some(handler) = self.connect_handler.get() {
            handler(true, &clcid);
        }
        self.publish_connection_count();
    }

    /// Deregister a connection. Tolerant: an entry that is already gone or
    /// was replaced by a newer connection only logs a warning.
    pub fn remove_connection(&self, connection: &Arc<dyn ServerConnection>) {
        let client_id = connection.client_id().to_owned();
        let connection_id = connection.connection_id().to_owned();
        let clcid = format!("{client_id}:{connection_id}");

        let removed = {
            let mut inner = self.inner.write();
            match inner.by_clcid.get(&clcid) {
                Some(current) if Arc::ptr_eq(current, connection) => {
                    inner.by_clcid.remove(&clcid);
                    if let Some(ids) = inner.by_client.get_mut(&client_id) {
                        ids.retain(|id| id != &connection_id);
                        if ids.is_empty() {
                            inner.by_client.remove(&client_id);
                        }
                    }
                    true
                }
                _ => false,
            }
        };
        if !removed {
            warn!(%clcid, "remove of unknown or replaced connection");
            return;
        }
        debug!(%clcid, "connection removed");
        if let Some(handler) = self.connect_handler.get() {
            handler(false, &clcid);
        }
        self.publish_connection_count();
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().by_clcid.len()
    }

    pub fn get_connection_by_connection_id(
        &self,
        client_id: &str,
        connection_id: &str,
    ) -> Option<Arc<dyn ServerConnection>> {
        self.inner.read().by_clcid.get(&format!("{client_id}:{connection_id}")).cloned()
    }

    /// First connection of the client. Agents hold exactly one.
    pub fn get_connection_by_client_id(&self, client_id: &str) -> Option<Arc<dyn ServerConnection>> {
        let inner = self.inner.read();
        let connection_id = inner.by_client.get(client_id)?.first()?;
        inner.by_clcid.get(&format!("{client_id}:{connection_id}")).cloned()
    }

    /// Snapshot-and-iterate; the handler runs outside the lock and may block.
    pub fn for_each_connection(&self, handler: impl Fn(&Arc<dyn ServerConnection>)) {
        let snapshot: Vec<Arc<dyn ServerConnection>> =
            self.inner.read().by_clcid.values().cloned().collect();
        for connection in &snapshot {
            handler(connection);
        }
    }

    /// Forcibly close every connection of one client. Used at logout.
    pub fn close_all_client_connections(&self, client_id: &str) {
        let doomed: Vec<Arc<dyn ServerConnection>> = {
            let mut inner = self.inner.write();
            let ids = inner.by_client.remove(client_id).unwrap_or_default();
            ids.iter()
                .filter_map(|id| inner.by_clcid.remove(&format!("{client_id}:{id}")))
                .collect()
        };
        for connection in &doomed {
            connection.close();
        }
        if !doomed.is_empty() {
            self.publish_connection_count();
        }
    }

    /// Close everything and clear both indexes. Closing happens on a
    /// snapshot outside the lock, so a close that triggers a re-entrant
    /// `remove_connection` cannot deadlock.
    pub fn close_all(&self) {
        let doomed: Vec<Arc<dyn ServerConnection>> = {
            let mut inner = self.inner.write();
            inner.by_client.clear();
            inner.by_clcid.drain().map(|(_, c)| c).collect()
        };
        debug!(count = doomed.len(), "closing all connections");
        for connection in &doomed {
            connection.close();
        }
        self.publish_connection_count();
    }

    /// Close and remove connections idle for longer than `max_idle`.
    /// Returns how many were dropped.
    pub fn close_stale(&self, max_idle: Duration) -> usize {
        let cutoff = epoch_ms().saturating_sub(max_idle.as_millis() as u64);
        let stale: Vec<Arc<dyn ServerConnection>> = {
            let inner = self.inner.read();
            inner
                .by_clcid
                .values()
                .filter(|c| c.last_active_ms() < cutoff)
                .cloned()
                .collect()
        };
        for connection in &stale {
            warn!(
                client_id = connection.client_id(),
                connection_id = connection.connection_id(),
                "closing stale connection"
            );
            connection.close();
            self.remove_connection(connection);
        }
        stale.len()
    }

    /// Fan a notification out to every connection; each connection gates
    /// delivery through its own subscription tables.
    pub fn send_notification(&self, notification: &NotificationEnvelope) {
        self.for_each_connection(|connection| connection.send_notification(notification));
    }

    /// Deliver a request to a connected agent.
    pub fn send_request(
        &self,
        agent_id: &str,
        request: RequestEnvelope,
        reply_to: ReplyTo,
    ) -> Result<(), BusError> {
        match self.get_connection_by_client_id(agent_id) {
            Some(connection) => connection.send_request(request, reply_to),
            None => Err(BusError::new(
                ErrorKind::AgentNotConnected,
                format!("agent {agent_id} is not connected"),
            )),
        }
    }

    /// Hand an ingress request to the domain pipeline.
    pub fn forward_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        match self.request_sink.get() {
            Some(sink) => sink(request, reply_to),
            None => Err(BusError::new(ErrorKind::NoSink, "transport has no request sink")),
        }
    }

    /// Pass a notification upstream.
    pub fn forward_notification(&self, notification: NotificationEnvelope) {
        match self.notification_sink.get() {
            Some(sink) => sink(notification),
            None => warn!(operation = %notification.operation, "notification dropped: no sink"),
        }
    }

    /// Reverse-route a request whose thing id names a connected client,
    /// either exactly or as a `{clientID}:{rest}` prefix.
    pub fn route_to_agent(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        let agent_id = {
            let inner = self.inner.read();
            if inner.by_client.contains_key(&request.thing_id) {
                Some(request.thing_id.clone())
            } else {
                request
                    .thing_id
                    .split_once(':')
                    .filter(|(prefix, _)| inner.by_client.contains_key(*prefix))
                    .map(|(prefix, _)| prefix.to_owned())
            }
        };
        match agent_id {
            Some(agent_id) => self.send_request(&agent_id, request, reply_to),
            None => Err(BusError::new(
                ErrorKind::NoRoute,
                format!("no route to thing {}", request.thing_id),
            )),
        }
    }

    /// Republish the connection count for observers of this transport.
    fn publish_connection_count(&self) {
        let count = self.connection_count();
        if let Some(sink) = self.notification_sink.get() {
            let mut n =
                NotificationEnvelope::property(&self.module_id, PROP_NR_CONNECTIONS, json!(count));
            n.sender_id = self.module_id.clone();
            sink(n);
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
