// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key/value actions over a store bucket.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use thingbus::connection::{NotificationSink, ReplyTo, RequestSink};
use thingbus::envelope::{Op, RequestEnvelope};
use thingbus::error::{BusError, ErrorKind};
use thingbus::module::{Module, ModuleBase};
use thingbus::store::Bucket;

pub const MODULE_ID: &str = "bucket";

pub const ACTION_GET: &str = "get";
pub const ACTION_SET: &str = "set";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_GET_MULTIPLE: &str = "getMultiple";
pub const ACTION_SET_MULTIPLE: &str = "setMultiple";

pub struct KeyValueModule {
    base: ModuleBase,
    bucket: Arc<dyn Bucket>,
}

#[derive(Debug, Deserialize)]
struct SetArgs {
    key: String,
    #[serde(default)]
    value: String,
}

impl KeyValueModule {
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        Self { base: ModuleBase::new(MODULE_ID), bucket }
    }

    fn handle_action(&self, request: &RequestEnvelope) -> Result<Value, BusError> {
        match request.name.as_str() {
            ACTION_GET => {
                let key: String = request.decode_input()?;
                let raw = self.bucket.get(&key)?;
                Ok(json!(String::from_utf8_lossy(&raw)))
            }
            ACTION_SET => {
                let args: SetArgs = request.decode_input()?;
                self.bucket.set(&args.key, args.value.as_bytes());
                Ok(Value::Null)
            }
            ACTION_DELETE => {
                let key: String = request.decode_input()?;
                self.bucket.delete(&key);
                Ok(Value::Null)
            }
            ACTION_GET_MULTIPLE => {
                let keys: Vec<String> = request.decode_input()?;
                let found = self.bucket.get_multiple(&keys);
                let out: HashMap<String, String> = found
                    .into_iter()
                    .map(|(k, v)| (k, String::from_utf8_lossy(&v).into_owned()))
                    .collect();
                serde_json::to_value(out)
                    .map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))
            }
            ACTION_SET_MULTIPLE => {
                let entries: HashMap<String, String> = request.decode_input()?;
                let raw: HashMap<String, Vec<u8>> =
                    entries.into_iter().map(|(k, v)| (k, v.into_bytes())).collect();
                self.bucket.set_multiple(&raw);
                Ok(Value::Null)
            }
            _ => Err(BusError::new(
                ErrorKind::UnhandledOperation,
                format!("bucket: unknown action {}", request.name),
            )),
        }
    }
}

impl Module for KeyValueModule {
    fn module_id(&self) -> &str {
        self.base.module_id()
    }

    fn handle_request(&self, request: RequestEnvelope, reply_to: ReplyTo) -> Result<(), BusError> {
        if request.thing_id == MODULE_ID && request.operation == Op::InvokeAction {
            let value = self.handle_action(&request)?;
            reply_to(request.create_response(value));
            return Ok(());
        }
        self.base.handle_request(request, reply_to)
    }

    fn handle_notification(&self, notification: thingbus::envelope::NotificationEnvelope) {
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
#[path = "keyvalue_tests.rs"]
mod tests;
