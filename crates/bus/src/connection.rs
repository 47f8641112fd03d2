// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The contract every live transport connection exposes to the core, plus
//! the state shared by all bindings.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::envelope::{NotificationEnvelope, Op, RequestEnvelope, ResponseEnvelope};
use crate::error::BusError;
use crate::subscription::SubscriptionTable;

/// Reply callback handed along with a request. Invoked exactly once per
/// successful delivery.
pub type ReplyTo = Arc<dyn Fn(ResponseEnvelope) + Send + Sync>;

/// Invoked with `true` on (re)connect and `false` on disconnect.
pub type ConnectHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Downstream request handler edge. Borrowed by the caller; owned by the
/// pipeline builder.
pub type RequestSink = Arc<dyn Fn(RequestEnvelope, ReplyTo) -> Result<(), BusError> + Send + Sync>;

/// Upstream notification handler edge.
pub type NotificationSink = Arc<dyn Fn(NotificationEnvelope) + Send + Sync>;

/// A live server-held connection to a remote consumer or agent.
///
/// The contract is unidirectional-capable: a transport that can physically
/// send in only one direction serves the opposite direction through a second
/// channel matched by correlation id.
pub trait ServerConnection: Send + Sync {
    /// Authenticated client this connection belongs to. Immutable.
    fn client_id(&self) -> &str;

    /// Unique id of this connection. Immutable.
    fn connection_id(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Idempotent: marks disconnected, releases I/O, wakes blocked writers.
    fn close(&self);

    /// Push a notification if this connection subscribes to it.
    fn send_notification(&self, notification: &NotificationEnvelope);

    /// Deliver a request to the remote peer (connection reversal); the
    /// response returns through the correlator.
    fn send_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError>;

    /// Push a response paired with an earlier inbound request.
    fn send_response(&self, response: ResponseEnvelope) -> Result<(), BusError>;

    /// Absorb a subscribe/observe (or un-) operation into the connection's
    /// own tables.
    fn update_subscription(&self, request: &RequestEnvelope);

    /// Epoch millis of the last observed activity.
    fn last_active_ms(&self) -> u64;
}

/// State common to every server-side connection: identity, liveness flag,
/// the two subscription tables, and the cancellation token that tears down
/// the connection's I/O tasks.
pub struct ConnectionBase {
    client_id: String,
    connection_id: String,
    remote_addr: String,
    connected: AtomicBool,
    last_active_ms: AtomicU64,
    pub event_subs: SubscriptionTable,
    pub observations: SubscriptionTable,
    cancel: CancellationToken,
}

impl ConnectionBase {
    pub fn new(client_id: &str, connection_id: &str, remote_addr: &str) -> Self {
        Self {
            client_id: client_id.to_owned(),
            connection_id: connection_id.to_owned(),
            remote_addr: remote_addr.to_owned(),
            connected: AtomicBool::new(true),
            last_active_ms: AtomicU64::new(epoch_ms()),
            event_subs: SubscriptionTable::new(),
            observations: SubscriptionTable::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// `{clientID}:{connectionID}`, the primary index key.
    pub fn clcid(&self) -> String {
        format!("{}:{}", self.client_id, self.connection_id)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Flip to disconnected. Returns true on the first call only, making
    /// close paths idempotent.
    pub fn mark_disconnected(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Record activity for stale-connection accounting.
    pub fn touch(&self) {
        self.last_active_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn last_active_ms(&self) -> u64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }

    /// Apply a subscription-change operation to the matching table.
    pub fn update_subscription(&self, request: &RequestEnvelope) {
        match request.operation {
            Op::SubscribeEvent | Op::SubscribeAllEvents => {
                self.event_subs.subscribe(&request.thing_id, &request.name, &request.correlation_id);
            }
            Op::UnsubscribeEvent | Op::UnsubscribeAllEvents => {
                self.event_subs.unsubscribe(&request.thing_id, &request.name);
            }
            Op::ObserveProperty | Op::ObserveAllProperties => {
                self.observations.subscribe(&request.thing_id, &request.name, &request.correlation_id);
            }
            Op::UnobserveProperty | Op::UnobserveAllProperties => {
                self.observations.unsubscribe(&request.thing_id, &request.name);
            }
            _ => {}
        }
    }

    /// Decide whether this connection receives the notification.
    ///
    /// Returns the correlation id to echo on delivery. Action progress
    /// passes unconditionally: it reaches only the original sender because
    /// the router resolves that connection by correlation id.
    pub fn subscription_for(&self, notification: &NotificationEnvelope) -> Option<String> {
        match notification.operation {
            Op::SubscribeEvent | Op::SubscribeAllEvents => {
                self.event_subs.get_subscription(&notification.thing_id, &notification.name)
            }
            Op::ObserveProperty | Op::ObserveAllProperties => {
                self.observations.get_subscription(&notification.thing_id, &notification.name)
            }
            Op::InvokeAction => Some(notification.correlation_id.clone()),
            _ => None,
        }
    }
}

/// Current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
