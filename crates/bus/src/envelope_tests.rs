// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

// ── operation vocabulary ──────────────────────────────────────────────

#[test]
fn op_round_trips_through_wire_form() {
    for op in [
        Op::InvokeAction,
        Op::ReadProperty,
        Op::ReadMultipleProperties,
        Op::ObserveAllProperties,
        Op::UnsubscribeAllEvents,
        Op::Ping,
    ] {
        assert_eq!(Op::parse(op.as_str()), Some(op));
    }
}

#[test]
fn op_rejects_unknown_operations() {
    assert_eq!(Op::parse("frobnicate"), None);
    assert_eq!(Op::parse(""), None);
}

#[test]
fn subscription_ops_are_recognized() {
    assert!(Op::SubscribeEvent.is_subscription_change());
    assert!(Op::UnobserveAllProperties.is_subscription_change());
    assert!(!Op::InvokeAction.is_subscription_change());
    assert!(!Op::Ping.is_subscription_change());
}

// ── envelope round trips ──────────────────────────────────────────────

#[test]
fn request_round_trips_through_json() -> anyhow::Result<()> {
    let mut req = RequestEnvelope::new(Op::InvokeAction, "thing1", "action1", json!("rpc test"));
    req.sender_id = "consumer1".to_owned();

    let text = serde_json::to_string(&req)?;
    let decoded: RequestEnvelope = serde_json::from_str(&text)?;
    assert_eq!(decoded, req);
    Ok(())
}

#[test]
fn request_wire_form_uses_id_field_names() -> anyhow::Result<()> {
    let req = RequestEnvelope::new(Op::ReadProperty, "thing1", "temp", Value::Null);
    let parsed: Value = serde_json::from_str(&serde_json::to_string(&req)?)?;
    assert_eq!(parsed["operation"], "readproperty");
    assert_eq!(parsed["thingID"], "thing1");
    assert!(parsed.get("correlationID").is_some());
    assert!(parsed.get("senderID").is_some());
    Ok(())
}

#[test]
fn timestamp_accepts_epoch_millis() -> anyhow::Result<()> {
    let text = r#"{"operation":"ping","thingID":"","name":"","timestamp":1700000000000}"#;
    let req: RequestEnvelope = serde_json::from_str(text)?;
    assert_eq!(req.timestamp.timestamp_millis(), 1_700_000_000_000);
    Ok(())
}

#[test]
fn timestamp_encodes_iso8601_millis() -> anyhow::Result<()> {
    let req = RequestEnvelope::new(Op::Ping, "", "", Value::Null);
    let parsed: Value = serde_json::from_str(&serde_json::to_string(&req)?)?;
    let ts = parsed["timestamp"].as_str().unwrap_or_default();
    // e.g. 2026-08-01T12:34:56.789Z
    assert!(ts.ends_with('Z'), "timestamp not UTC: {ts}");
    assert_eq!(ts.len(), "2026-08-01T12:34:56.789Z".len(), "timestamp: {ts}");
    Ok(())
}

#[test]
fn any_envelope_discriminates_by_message_type() -> anyhow::Result<()> {
    let req = RequestEnvelope::new(Op::Ping, "", "", Value::Null);
    let resp = req.create_response(json!("pong"));
    let notif = NotificationEnvelope::event("thing1", "overheated", json!(true));

    for (env, tag) in [
        (AnyEnvelope::Request(req), "request"),
        (AnyEnvelope::Response(resp), "response"),
        (AnyEnvelope::Notification(notif), "notification"),
    ] {
        let text = env.to_json()?;
        let parsed: Value = serde_json::from_str(&text)?;
        assert_eq!(parsed["messageType"], tag);
        assert_eq!(AnyEnvelope::from_json(&text)?, env);
    }
    Ok(())
}

#[test]
fn any_envelope_rejects_garbage() {
    assert!(AnyEnvelope::from_json("not json").is_err());
    assert!(AnyEnvelope::from_json(r#"{"messageType":"telegram"}"#).is_err());
}

// ── response builders ─────────────────────────────────────────────────

#[test]
fn create_response_echoes_routing_fields() {
    let req = RequestEnvelope::new(Op::InvokeAction, "thing1", "action1", json!(1));
    let resp = req.create_response(json!(2));

    assert_eq!(resp.correlation_id, req.correlation_id);
    assert_eq!(resp.thing_id, "thing1");
    assert_eq!(resp.name, "action1");
    assert_eq!(resp.status, Some(ActionStatus::Completed));
    assert!(resp.error.is_none());
    assert_eq!(resp.ok().map(Value::clone), Ok(json!(2)));
}

#[test]
fn create_error_response_carries_problem_detail() {
    let req = RequestEnvelope::new(Op::ReadProperty, "thing1", "nope", Value::Null);
    let err = BusError::new(ErrorKind::PropertyNotFound, "no property nope");
    let resp = req.create_error_response(&err);

    assert_eq!(resp.status, Some(ActionStatus::Failed));
    let ev = resp.error.clone().unwrap_or_default();
    assert_eq!(ev.status, 404);
    assert_eq!(ev.title, "property-not-found");
    let back = resp.ok().map(Value::clone);
    assert!(back.is_err());
}

#[test]
fn error_value_as_error_requires_title() {
    assert!(ErrorValue::default().as_error().is_none());

    let ev = ErrorValue { status: 408, title: "timeout".to_owned(), ..Default::default() };
    let err = ev.as_error().unwrap_or_else(|| BusError::new(ErrorKind::Internal, ""));
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[test]
fn decode_input_into_typed_storage() -> anyhow::Result<()> {
    #[derive(serde::Deserialize, PartialEq, Debug)]
    struct Args {
        key: String,
        value: String,
    }
    let req = RequestEnvelope::new(
        Op::InvokeAction,
        "bucket",
        "set",
        json!({"key": "key1", "value": "value1"}),
    );
    let args: Args = req.decode_input()?;
    assert_eq!(args, Args { key: "key1".to_owned(), value: "value1".to_owned() });

    let bad: Result<Args, _> = req.create_response(json!(42)).decode_value();
    assert!(bad.is_err());
    Ok(())
}

// ── action progress ───────────────────────────────────────────────────

#[test]
fn action_progress_reuses_request_correlation_id() {
    let req = RequestEnvelope::new(Op::InvokeAction, "thing1", "slow", Value::Null);
    let n = NotificationEnvelope::action_progress(&req, json!("running"));
    assert_eq!(n.correlation_id, req.correlation_id);
    assert_eq!(n.affordance_type, AffordanceType::Action);
    assert_eq!(n.operation, Op::InvokeAction);
}

#[test]
fn plain_notifications_have_no_correlation_id() -> anyhow::Result<()> {
    let n = NotificationEnvelope::event("thing1", "overheated", json!(true));
    assert!(n.correlation_id.is_empty());
    let parsed: Value = serde_json::from_str(&serde_json::to_string(&n)?)?;
    assert!(parsed.get("correlationID").is_none(), "empty correlationID must be omitted");
    Ok(())
}

// ── thing value ───────────────────────────────────────────────────────

#[test]
fn thing_value_round_trips_through_json() -> anyhow::Result<()> {
    let mut n = NotificationEnvelope::property("thing1", "temperature", json!(21.5));
    n.sender_id = "agent1".to_owned();
    let tv = ThingValue::from(&n);

    let decoded: ThingValue = serde_json::from_str(&serde_json::to_string(&tv)?)?;
    assert_eq!(decoded, tv);
    assert_eq!(decoded.affordance_type, AffordanceType::Property);
    assert_eq!(decoded.sender_id, "agent1");
    Ok(())
}

// ── ids ───────────────────────────────────────────────────────────────

#[test]
fn short_ids_are_unique_enough() {
    let a = short_id();
    let b = short_id();
    assert_eq!(a.len(), 12);
    assert_ne!(a, b);
}
