// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thing Description directory.
//!
//! Stores TD documents in a bucket keyed by thing id and serves CRUD
//! actions on them. The `thingCount` property tracks the inventory.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use thingbus::connection::{NotificationSink, ReplyTo, RequestSink};
use thingbus::envelope::{Op, RequestEnvelope};
use thingbus::error::{BusError, ErrorKind};
use thingbus::module::{Module, ModuleBase};
use thingbus::store::Bucket;

pub const MODULE_ID: &str = "directory";

pub const ACTION_UPDATE: &str = "updateThing";
pub const ACTION_RETRIEVE: &str = "retrieveThing";
pub const ACTION_RETRIEVE_ALL: &str = "retrieveAllThings";
pub const ACTION_DELETE: &str = "deleteThing";

pub const PROP_THING_COUNT: &str = "thingCount";

pub struct DirectoryModule {
    base: ModuleBase,
    bucket: Arc<dyn Bucket>,
}

#[derive(Debug, Deserialize)]
struct RetrieveAllArgs {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

impl DirectoryModule {
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        let module = Self { base: ModuleBase::new(MODULE_ID), bucket };
        module.base.update_property(PROP_THING_COUNT, json!(0));
        module
    }

    fn handle_action(&self, request: &RequestEnvelope) -> Result<Value, BusError> {
        match request.name.as_str() {
            ACTION_UPDATE => self.update_thing(&request.input),
            ACTION_RETRIEVE => self.retrieve_thing(&request.input),
            ACTION_RETRIEVE_ALL => self.retrieve_all(request),
            ACTION_DELETE => self.delete_thing(&request.input),
            _ => Err(BusError::new(
                ErrorKind::UnhandledOperation,
                format!("directory: unknown action {}", request.name),
            )),
        }
    }

    /// Store a TD document; its `id` field is the key.
    fn update_thing(&self, input: &Value) -> Result<Value, BusError> {
        let thing_id = input
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BusError::new(ErrorKind::BadRequest, "td is missing an id"))?;
        let raw = serde_json::to_vec(input)
            .map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))?;
        self.bucket.set(thing_id, &raw);
        self.publish_count();
        Ok(Value::Null)
    }

    fn retrieve_thing(&self, input: &Value) -> Result<Value, BusError> {
        let thing_id = input
            .as_str()
            .ok_or_else(|| BusError::new(ErrorKind::BadRequest, "expected a thing id"))?;
        let raw = self.bucket.get(thing_id)?;
        serde_json::from_slice(&raw).map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))
    }

    fn retrieve_all(&self, request: &RequestEnvelope) -> Result<Value, BusError> {
        let args: RetrieveAllArgs = request.decode_input()?;
        let mut cursor = self.bucket.cursor();
        let mut tds = Vec::new();
        let mut entry = cursor.first();
        let mut index = 0usize;
        while let Some((_, raw)) = entry {
            if tds.len() >= args.limit {
                break;
            }
            if index >= args.offset {
                let td: Value = serde_json::from_slice(&raw)
                    .map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))?;
                tds.push(td);
            }
            index += 1;
            entry = cursor.next();
        }
        Ok(Value::Array(tds))
    }

    fn delete_thing(&self, input: &Value) -> Result<Value, BusError> {
        let thing_id = input
            .as_str()
            .ok_or_else(|| BusError::new(ErrorKind::BadRequest, "expected a thing id"))?;
        // Missing entries fail so a caller can tell a delete from a miss.
        let _ = self.bucket.get(thing_id)?;
        self.bucket.delete(thing_id);
        self.publish_count();
        Ok(Value::Null)
    }

    fn publish_count(&self) {
        let count = {
            let mut cursor = self.bucket.cursor();
            let mut n = 0usize;
            let mut entry = cursor.first();
            while entry.is_some() {
                n += 1;
                entry = cursor.next();
            }
            n
        };
        self.base.update_property(PROP_THING_COUNT, json!(count));
    }
}

impl Module for DirectoryModule {
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
#[path = "directory_tests.rs"]
mod tests;
