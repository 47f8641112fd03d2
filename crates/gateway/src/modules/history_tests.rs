// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use thingbus::envelope::ResponseEnvelope;

fn read(module: &HistoryModule, thing_id: &str, name: &str, limit: usize) -> Vec<ThingValue> {
    let seen: Arc<Mutex<Option<ResponseEnvelope>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let reply: ReplyTo = Arc::new(move |resp| {
        *sink.lock() = Some(resp);
    });
    let request = RequestEnvelope::new(
        Op::InvokeAction,
        MODULE_ID,
        ACTION_READ,
        json!({"thingID": thing_id, "name": name, "limit": limit}),
    );
    let out = module.handle_request(request, reply);
    assert!(out.is_ok());
    let resp = seen.lock().take();
    resp.and_then(|r| r.decode_value().ok()).unwrap_or_default()
}

#[tokio::test]
async fn notifications_are_recorded_newest_first() {
    let module = HistoryModule::new(10);
    module.set_notification_sink(Some(Arc::new(|_| {})));

    for i in 0..3 {
        let mut n = NotificationEnvelope::event("thing1", "overheated", json!(i));
        n.sender_id = "agent1".to_owned();
        module.handle_notification(n);
    }

    let values = read(&module, "thing1", "overheated", 0);
    assert_eq!(values.len(), 3);
    assert_eq!(values[0].data, json!(2), "newest first");
    assert_eq!(values[2].data, json!(0));
    assert_eq!(values[0].sender_id, "agent1");
}

#[tokio::test]
async fn retention_evicts_the_oldest() {
    let module = HistoryModule::new(2);
    module.set_notification_sink(Some(Arc::new(|_| {})));

    for i in 0..5 {
        module.handle_notification(NotificationEnvelope::property("thing1", "temp", json!(i)));
    }

    assert_eq!(module.stored_count("thing1", "temp"), 2);
    let values = read(&module, "thing1", "temp", 0);
    assert_eq!(values.iter().map(|v| v.data.clone()).collect::<Vec<_>>(), [json!(4), json!(3)]);
}

#[tokio::test]
async fn limit_caps_the_result() {
    let module = HistoryModule::new(10);
    module.set_notification_sink(Some(Arc::new(|_| {})));
    for i in 0..5 {
        module.handle_notification(NotificationEnvelope::event("thing1", "e", json!(i)));
    }

    let values = read(&module, "thing1", "e", 2);
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].data, json!(4));
}

#[tokio::test]
async fn action_progress_notifications_are_not_recorded() {
    let module = HistoryModule::new(10);
    module.set_notification_sink(Some(Arc::new(|_| {})));

    let request = RequestEnvelope::new(Op::InvokeAction, "thing1", "slow", Value::Null);
    module.handle_notification(NotificationEnvelope::action_progress(&request, json!("running")));

    assert_eq!(module.stored_count("thing1", "slow"), 0);
}

#[tokio::test]
async fn unknown_affordance_history_is_empty() {
    let module = HistoryModule::new(10);
    module.set_notification_sink(Some(Arc::new(|_| {})));
    let values = read(&module, "thing9", "nothing", 0);
    assert!(values.is_empty());
}
