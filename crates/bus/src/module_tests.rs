// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::envelope::{Op, RequestEnvelope, ResponseEnvelope};
use parking_lot::Mutex as PlMutex;
use serde_json::json;
use std::sync::Arc;

/// Reply callback that records every response it receives.
fn capture() -> (ReplyTo, Arc<PlMutex<Vec<ResponseEnvelope>>>) {
    let seen: Arc<PlMutex<Vec<ResponseEnvelope>>> = Arc::new(PlMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let reply: ReplyTo = Arc::new(move |resp| sink.lock().push(resp));
    (reply, seen)
}

// ── local property dispatch ───────────────────────────────────────────

#[test]
fn read_property_replies_exactly_once() {
    let base = ModuleBase::new("mod1");
    base.update_property("temp", json!(21.5));

    let (reply, seen) = capture();
    let req = RequestEnvelope::new(Op::ReadProperty, "mod1", "temp", serde_json::Value::Null);
    let out = ModuleBase::handle_request(&base, req.clone(), reply);

    assert!(out.is_ok());
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].value, json!(21.5));
    assert_eq!(seen[0].correlation_id, req.correlation_id);
}

#[test]
fn read_unknown_property_fails_without_reply() {
    let base = ModuleBase::new("mod1");
    let (reply, seen) = capture();
    let req = RequestEnvelope::new(Op::ReadProperty, "mod1", "missing", serde_json::Value::Null);

    let out = ModuleBase::handle_request(&base, req, reply);
    assert_eq!(out.map_err(|e| e.kind), Err(ErrorKind::PropertyNotFound));
    assert!(seen.lock().is_empty(), "reply must not fire on error");
}

#[test]
fn read_all_and_multiple_properties() {
    let base = ModuleBase::new("mod1");
    base.update_property("a", json!(1));
    base.update_property("b", json!(2));
    base.update_property("c", json!(3));

    let (reply, seen) = capture();
    let req = RequestEnvelope::new(Op::ReadAllProperties, "mod1", "", serde_json::Value::Null);
    assert!(ModuleBase::handle_request(&base, req, reply).is_ok());
    assert_eq!(seen.lock()[0].value["b"], json!(2));

    let (reply, seen) = capture();
    let req = RequestEnvelope::new(Op::ReadMultipleProperties, "mod1", "", json!(["a", "c", "nope"]));
    assert!(ModuleBase::handle_request(&base, req, reply).is_ok());
    let value = seen.lock()[0].value.clone();
    assert_eq!(value, json!({"a": 1, "c": 3}));
}

#[test]
fn unknown_operation_without_hook_is_unhandled() {
    let base = ModuleBase::new("mod1");
    let (reply, _) = capture();
    let req = RequestEnvelope::new(Op::InvokeAction, "mod1", "zap", serde_json::Value::Null);
    let out = ModuleBase::handle_request(&base, req, reply);
    assert_eq!(out.map_err(|e| e.kind), Err(ErrorKind::UnhandledOperation));
}

#[test]
fn request_hook_receives_unknown_operations() {
    let base = ModuleBase::new("mod1");
    base.set_request_hook(Some(Arc::new(|req: RequestEnvelope, reply: ReplyTo| {
        reply(req.create_response(json!("hooked")));
        Ok(())
    })));

    let (reply, seen) = capture();
    let req = RequestEnvelope::new(Op::InvokeAction, "mod1", "zap", serde_json::Value::Null);
    assert!(ModuleBase::handle_request(&base, req, reply).is_ok());
    assert_eq!(seen.lock()[0].value, json!("hooked"));
}

// ── forwarding ────────────────────────────────────────────────────────

#[test]
fn foreign_thing_id_forwards_downstream() {
    let base = ModuleBase::new("mod1");
    let forwarded: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
    {
        let forwarded = Arc::clone(&forwarded);
        base.set_request_sink(Some(Arc::new(move |req: RequestEnvelope, reply: ReplyTo| {
            forwarded.lock().push(req.thing_id.clone());
            reply(req.create_response(serde_json::Value::Null));
            Ok(())
        })));
    }

    let (reply, seen) = capture();
    let req = RequestEnvelope::new(Op::InvokeAction, "elsewhere", "go", serde_json::Value::Null);
    assert!(ModuleBase::handle_request(&base, req, reply).is_ok());
    assert_eq!(forwarded.lock().as_slice(), ["elsewhere"]);
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn forward_without_sink_is_no_downstream() {
    let base = ModuleBase::new("mod1");
    let (reply, seen) = capture();
    let req = RequestEnvelope::new(Op::InvokeAction, "elsewhere", "go", serde_json::Value::Null);
    let out = ModuleBase::handle_request(&base, req, reply);
    assert_eq!(out.map_err(|e| e.kind), Err(ErrorKind::NoDownstream));
    assert!(seen.lock().is_empty());
}

// ── notifications and property bookkeeping ────────────────────────────

#[tokio::test]
async fn notification_hook_runs_and_forwarding_continues() {
    let base = ModuleBase::new("mod1");
    let hooked: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
    let passed: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
    {
        let hooked = Arc::clone(&hooked);
        base.set_notification_hook(Some(Arc::new(move |n: NotificationEnvelope| {
            hooked.lock().push(n.name.clone());
        })));
    }
    {
        let passed = Arc::clone(&passed);
        base.set_notification_sink(Some(Arc::new(move |n: NotificationEnvelope| {
            passed.lock().push(n.name.clone());
        })));
    }

    let n = NotificationEnvelope::event("thing1", "overheated", json!(true));
    ModuleBase::handle_notification(&base, n);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(passed.lock().as_slice(), ["overheated"]);
    assert_eq!(hooked.lock().as_slice(), ["overheated"]);
}

#[test]
fn update_property_emits_and_tracks_changes() {
    let base = ModuleBase::new("mod1");
    let emitted: Arc<PlMutex<Vec<NotificationEnvelope>>> = Arc::new(PlMutex::new(Vec::new()));
    {
        let emitted = Arc::clone(&emitted);
        base.set_notification_sink(Some(Arc::new(move |n| emitted.lock().push(n))));
    }

    assert!(base.update_property("temp", json!(20)));
    assert!(base.update_property("temp", json!(21)));
    // Unchanged value: no notification, no change record.
    assert!(!base.update_property("temp", json!(21)));

    let emitted = emitted.lock();
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[1].operation, Op::ObserveProperty);
    assert_eq!(emitted[1].thing_id, "mod1");
    assert_eq!(emitted[1].value, json!(21));

    let changed = base.read_changed_properties();
    assert_eq!(changed.get("temp"), Some(&json!(21)));
    // Draining clears the side map.
    assert!(base.read_changed_properties().is_empty());
}

// ── chaining ──────────────────────────────────────────────────────────

#[test]
fn chained_modules_forward_to_the_tail() {
    let a: Arc<dyn Module> = Arc::new(ModuleBase::new("a"));
    let b: Arc<dyn Module> = Arc::new(ModuleBase::new("b"));

    let tail_reqs: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
    let tail_notifs: Arc<PlMutex<Vec<String>>> = Arc::new(PlMutex::new(Vec::new()));
    let request_tail: RequestSink = {
        let tail_reqs = Arc::clone(&tail_reqs);
        Arc::new(move |req, reply| {
            tail_reqs.lock().push(req.thing_id.clone());
            reply(req.create_response(serde_json::Value::Null));
            Ok(())
        })
    };
    let notification_tail: NotificationSink = {
        let tail_notifs = Arc::clone(&tail_notifs);
        Arc::new(move |n| tail_notifs.lock().push(n.name.clone()))
    };

    chain_modules(&[Arc::clone(&a), Arc::clone(&b)], Some(request_tail), Some(notification_tail));

    let (reply, seen) = capture();
    let req = RequestEnvelope::new(Op::InvokeAction, "agent1:thing9", "go", serde_json::Value::Null);
    assert!(a.handle_request(req, reply).is_ok());
    assert_eq!(tail_reqs.lock().as_slice(), ["agent1:thing9"]);
    assert_eq!(seen.lock().len(), 1);

    a.handle_notification(NotificationEnvelope::event("t", "e1", json!(1)));
    assert_eq!(tail_notifs.lock().as_slice(), ["e1"]);
}
