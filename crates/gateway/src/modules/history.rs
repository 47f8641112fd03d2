// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Affordance-value history.
//!
//! Records every event and property notification passing upstream as a
//! [`ThingValue`] under `{thingID}/{name}`, bounded per key; the oldest
//! values are evicted first. `readHistory` returns newest-first.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use thingbus::connection::{NotificationSink, ReplyTo, RequestSink};
use thingbus::envelope::{AffordanceType, NotificationEnvelope, Op, RequestEnvelope, ThingValue};
use thingbus::error::{BusError, ErrorKind};
use thingbus::module::{Module, ModuleBase};

pub const MODULE_ID: &str = "history";

pub const ACTION_READ: &str = "readHistory";

pub struct HistoryModule {
    base: ModuleBase,
    retention: usize,
    entries: RwLock<HashMap<String, VecDeque<ThingValue>>>,
}

#[derive(Debug, Deserialize)]
struct ReadHistoryArgs {
    #[serde(rename = "thingID")]
    thing_id: String,
    name: String,
    #[serde(default)]
    limit: usize,
}

impl HistoryModule {
    pub fn new(retention: usize) -> Self {
        Self {
            base: ModuleBase::new(MODULE_ID),
            retention: retention.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn record(&self, notification: &NotificationEnvelope) {
        if !matches!(
            notification.affordance_type,
            AffordanceType::Event | AffordanceType::Property
        ) {
            return;
        }
        let key = format!("{}/{}", notification.thing_id, notification.name);
        let mut entries = self.entries.write();
        let values = entries.entry(key).or_default();
        values.push_back(ThingValue::from(notification));
        while values.len() > self.retention {
            values.pop_front();
        }
    }

    fn read_history(&self, request: &RequestEnvelope) -> Result<Value, BusError> {
        let args: ReadHistoryArgs = request.decode_input()?;
        let key = format!("{}/{}", args.thing_id, args.name);
        let entries = self.entries.read();
        let values = entries.get(&key).map(|v| v.as_slices()).unwrap_or((&[], &[]));
        let mut out: Vec<&ThingValue> = values.0.iter().chain(values.1.iter()).collect();
        out.reverse();
        if args.limit > 0 {
            out.truncate(args.limit);
        }
        serde_json::to_value(out).map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))
    }

    pub fn stored_count(&self, thing_id: &str, name: &str) -> usize {
        self.entries.read().get(&format!("{thing_id}/{name}")).map(VecDeque::len).unwrap_or(0)
    }
}

impl Module for HistoryModule {
    fn module_id(&self) -> &str {
        self.base.module_id()
    }

    fn handle_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        if request.thing_id == MODULE_ID
            && request.operation == Op::InvokeAction
            && request.name == ACTION_READ
        {
            let value = self.read_history(&request)?;
            reply_to(request.create_response(value));
            return Ok(());
        }
        self.base.handle_request(request, reply_to)
    }

    fn handle_notification(&self, notification: NotificationEnvelope) {
        self.record(&notification);
        self.base.handle_notification(notification)
    }

    fn set_request_sink(&self, sink: Option<RequestSink>) {
        self.base.set_request_sink(sink)
    }

    fn set_notification_sink(&self, sink: Option<NotificationSink>) {
        self.base.set_notification_sink(sink)
    }
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
