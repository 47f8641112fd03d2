// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline nodes.
//!
//! A module either satisfies a request addressed to its own module id or
//! forwards it along the request sink; notifications pass through in the
//! opposite direction. Sinks are borrowed edges owned by the pipeline
//! builder and must not prolong their target's lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::warn;

use crate::connection::{NotificationSink, ReplyTo, RequestSink};
use crate::envelope::{NotificationEnvelope, Op, RequestEnvelope};
use crate::error::{BusError, ErrorKind};
use crate::slot::CallbackSlot;

/// Application hook for operations the base dispatch does not cover.
pub type RequestHook = Arc<dyn Fn(RequestEnvelope, ReplyTo) -> Result<(), BusError> + Send + Sync>;

/// Application hook invoked concurrently for each passing notification.
pub type NotificationHook = Arc<dyn Fn(NotificationEnvelope) + Send + Sync>;

/// The contract every pipeline node honors.
///
/// `handle_request` follows an exactly-once reply discipline: when it
/// returns `Ok`, `reply_to` has run or will run exactly once; when it
/// returns an error, `reply_to` has not been invoked.
pub trait Module: Send + Sync {
    /// Stable module id; doubles as the node's thing id.
    fn module_id(&self) -> &str;

    /// Thing Model of this module, when it publishes one.
    fn thing_model(&self) -> &str {
        ""
    }

    fn handle_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError>;

    fn handle_notification(&self, notification: NotificationEnvelope);

    fn set_request_sink(&self, sink: Option<RequestSink>);

    fn set_notification_sink(&self, sink: Option<NotificationSink>);
}

/// Shared node behavior: property bookkeeping, local dispatch, forwarding.
pub struct ModuleBase {
    module_id: String,
    properties: RwLock<HashMap<String, Value>>,
    changed: Mutex<HashMap<String, Value>>,
    request_sink: CallbackSlot<dyn Fn(RequestEnvelope, ReplyTo) -> Result<(), BusError> + Send + Sync>,
    notification_sink: CallbackSlot<dyn Fn(NotificationEnvelope) + Send + Sync>,
    request_hook: CallbackSlot<dyn Fn(RequestEnvelope, ReplyTo) -> Result<(), BusError> + Send + Sync>,
    notification_hook: CallbackSlot<dyn Fn(NotificationEnvelope) + Send + Sync>,
}

impl ModuleBase {
    pub fn new(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_owned(),
            properties: RwLock::new(HashMap::new()),
            changed: Mutex::new(HashMap::new()),
            request_sink: CallbackSlot::empty(),
            notification_sink: CallbackSlot::empty(),
            request_hook: CallbackSlot::empty(),
            notification_hook: CallbackSlot::empty(),
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

    pub fn set_request_hook(&self, hook: Option<RequestHook>) {
        self.request_hook.set(hook);
    }

    pub fn set_notification_hook(&self, hook: Option<NotificationHook>) {
        self.notification_hook.set(hook);
    }

    /// Standard ingress: local dispatch for this module's id, forwarding
    /// otherwise.
    pub fn handle_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        if request.thing_id == self.module_id {
            return self.handle_local(request, reply_to);
        }
        self.forward_request(request, reply_to)
    }

    /// Pass a request downstream.
    pub fn forward_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        match self.request_sink.get() {
            Some(sink) => sink(request, reply_to),
            None => Err(BusError::new(
                ErrorKind::NoDownstream,
                format!("module {}: no request sink", self.module_id),
            )),
        }
    }

    fn handle_local(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        match request.operation {
            Op::ReadProperty => {
                let value = self.properties.read().get(&request.name).cloned();
                match value {
                    Some(value) => {
                        reply_to(request.create_response(value));
                        Ok(())
                    }
                    None => Err(BusError::new(
                        ErrorKind::PropertyNotFound,
                        format!("{}: no property {}", self.module_id, request.name),
                    )),
                }
            }
            Op::ReadAllProperties => {
                let all: HashMap<String, Value> = self.properties.read().clone();
                reply_to(request.create_response(object_from(all)));
                Ok(())
            }
            Op::ReadMultipleProperties => {
                let names: Vec<String> = request.decode_input()?;
                let props = self.properties.read();
                let selected: HashMap<String, Value> = names
                    .iter()
                    .filter_map(|n| props.get(n).map(|v| (n.clone(), v.clone())))
                    .collect();
                drop(props);
                reply_to(request.create_response(object_from(selected)));
                Ok(())
            }
            _ => match self.request_hook.get() {
                Some(hook) => hook(request, reply_to),
                None => Err(BusError::new(
                    ErrorKind::UnhandledOperation,
                    format!("{}: unhandled operation {}", self.module_id, request.operation),
                )),
            },
        }
    }

    /// Upstream pass-through: run the app hook concurrently, then forward.
    pub fn handle_notification(&self, notification: NotificationEnvelope) {
        if let Some(hook) = self.notification_hook.get() {
            let n = notification.clone();
            tokio::spawn(async move { hook(n) });
        }
        match self.notification_sink.get() {
            Some(sink) => sink(notification),
            None => warn!(
                module_id = %self.module_id,
                operation = %notification.operation,
                "notification dropped: no sink"
            ),
        }
    }

    pub fn get_property(&self, name: &str) -> Option<Value> {
        self.properties.read().get(name).cloned()
    }

    /// Write a property, track the change, and publish it upstream.
    /// Returns false when the value was already current.
    pub fn update_property(&self, name: &str, value: Value) -> bool {
        let changed = {
            let mut props = self.properties.write();
            let changed = props.get(name) != Some(&value);
            props.insert(name.to_owned(), value.clone());
            changed
        };
        if changed {
            self.changed.lock().insert(name.to_owned(), value.clone());
            let mut n = NotificationEnvelope::property(&self.module_id, name, value);
            n.sender_id = self.module_id.clone();
            if let Some(sink) = self.notification_sink.get() {
                sink(n);
            }
        }
        changed
    }

    /// Atomically return and clear the changes since the previous call.
    pub fn read_changed_properties(&self) -> HashMap<String, Value> {
        std::mem::take(&mut *self.changed.lock())
    }
}

impl Module for ModuleBase {
    fn module_id(&self) -> &str {
        self.module_id()
    }

    fn handle_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        ModuleBase::handle_request(self, request, reply_to)
    }

    fn handle_notification(&self, notification: NotificationEnvelope) {
        ModuleBase::handle_notification(self, notification)
    }

    fn set_request_sink(&self, sink: Option<RequestSink>) {
        ModuleBase::set_request_sink(self, sink)
    }

    fn set_notification_sink(&self, sink: Option<NotificationSink>) {
        ModuleBase::set_notification_sink(self, sink)
    }
}

fn object_from(map: HashMap<String, Value>) -> Value {
    Value::Object(map.into_iter().collect())
}

/// Chain modules so requests flow head → tail and notifications tail-ward
/// as well, ending in the given sinks.
pub fn chain_modules(
    modules: &[Arc<dyn Module>],
    request_tail: Option<RequestSink>,
    notification_tail: Option<NotificationSink>,
) {
    for pair in modules.windows(2) {
        let next = Arc::clone(&pair[1]);
        let next_n = Arc::clone(&pair[1]);
        pair[0].set_request_sink(Some(Arc::new(move |req, reply| next.handle_request(req, reply))));
        pair[0].set_notification_sink(Some(Arc::new(move |n| next_n.handle_notification(n))));
    }
    if let Some(last) = modules.last() {
        last.set_request_sink(request_tail);
        last.set_notification_sink(notification_tail);
    }
}

#[cfg(test)]
#[path = "module_tests.rs"]
mod tests;
