// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn request() -> RequestEnvelope {
    let mut req =
        RequestEnvelope::new(Op::InvokeAction, "thing1", "action1", json!({"level": 3}));
    req.sender_id = "consumer1".to_owned();
    req
}

#[test]
fn passthrough_is_the_envelope_json() -> anyhow::Result<()> {
    let envelope = AnyEnvelope::Request(request());
    let text = PassthroughConverter.encode(&envelope)?;
    assert_eq!(text, envelope.to_json()?);
    assert_eq!(PassthroughConverter.decode(&text)?, envelope);
    Ok(())
}

#[test]
fn converter_selection_falls_back_to_native() {
    assert_eq!(converter_for(Some(SUBPROTOCOL_WOT)).subprotocol(), SUBPROTOCOL_WOT);
    assert_eq!(converter_for(Some("mystery")).subprotocol(), SUBPROTOCOL_NATIVE);
    assert_eq!(converter_for(None).subprotocol(), SUBPROTOCOL_NATIVE);
}

// ── WoT profile ───────────────────────────────────────────────────────

#[test]
fn wot_request_uses_the_operation_as_message_type() -> anyhow::Result<()> {
    let req = request();
    let text = WotWssConverter.encode(&AnyEnvelope::Request(req.clone()))?;
    let frame: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(frame["messageType"], "invokeaction");
    assert_eq!(frame["thingID"], "thing1");
    assert_eq!(frame["input"], json!({"level": 3}));

    let decoded = WotWssConverter.decode(&text)?;
    match decoded {
        AnyEnvelope::Request(back) => {
            assert_eq!(back.operation, Op::InvokeAction);
            assert_eq!(back.correlation_id, req.correlation_id);
            assert_eq!(back.input, req.input);
        }
        other => anyhow::bail!("expected a request, got {other:?}"),
    }
    Ok(())
}

#[test]
fn wot_final_action_status_is_the_response() -> anyhow::Result<()> {
    let req = request();
    let response = req.create_response(json!("done"));
    let text = WotWssConverter.encode(&AnyEnvelope::Response(response.clone()))?;
    let frame: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(frame["messageType"], "actionStatus");
    assert_eq!(frame["status"], "completed");
    assert_eq!(frame["data"], "done");

    match WotWssConverter.decode(&text)? {
        AnyEnvelope::Response(back) => {
            assert_eq!(back.correlation_id, response.correlation_id);
            assert_eq!(back.value, json!("done"));
            assert_eq!(back.status, Some(ActionStatus::Completed));
        }
        other => anyhow::bail!("expected a response, got {other:?}"),
    }
    Ok(())
}

#[test]
fn wot_interim_action_status_is_a_progress_notification() -> anyhow::Result<()> {
    let req = request();
    let progress = NotificationEnvelope::action_progress(&req, json!("halfway"));
    let text = WotWssConverter.encode(&AnyEnvelope::Notification(progress))?;

    match WotWssConverter.decode(&text)? {
        AnyEnvelope::Notification(back) => {
            assert_eq!(back.affordance_type, AffordanceType::Action);
            assert_eq!(back.correlation_id, req.correlation_id);
            assert_eq!(back.value, json!("halfway"));
        }
        other => anyhow::bail!("expected a notification, got {other:?}"),
    }
    Ok(())
}

#[test]
fn wot_event_and_property_frames_round_trip() -> anyhow::Result<()> {
    let event = NotificationEnvelope::event("thing1", "overheated", json!(true));
    let text = WotWssConverter.encode(&AnyEnvelope::Notification(event))?;
    let frame: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(frame["messageType"], "event");
    match WotWssConverter.decode(&text)? {
        AnyEnvelope::Notification(back) => {
            assert_eq!(back.operation, Op::SubscribeEvent);
            assert_eq!(back.affordance_type, AffordanceType::Event);
        }
        other => anyhow::bail!("expected a notification, got {other:?}"),
    }

    let reading = NotificationEnvelope::property("thing1", "temp", json!(20.5));
    let text = WotWssConverter.encode(&AnyEnvelope::Notification(reading))?;
    let frame: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(frame["messageType"], "propertyReading");
    match WotWssConverter.decode(&text)? {
        AnyEnvelope::Notification(back) => {
            assert_eq!(back.operation, Op::ObserveProperty);
            assert_eq!(back.value, json!(20.5));
        }
        other => anyhow::bail!("expected a notification, got {other:?}"),
    }
    Ok(())
}

#[test]
fn wot_rejects_unknown_frame_types() {
    let out = WotWssConverter.decode(r#"{"messageType": "telegram"}"#);
    assert_eq!(out.map_err(|e| e.kind), Err(ErrorKind::Encode));
    assert!(WotWssConverter.decode("not json").is_err());
}

#[test]
fn wot_error_response_keeps_the_problem_detail() -> anyhow::Result<()> {
    let req = request();
    let err = BusError::new(ErrorKind::NoRoute, "nobody home");
    let text = WotWssConverter.encode(&AnyEnvelope::Response(req.create_error_response(&err)))?;

    match WotWssConverter.decode(&text)? {
        AnyEnvelope::Response(back) => {
            let back_err = back.ok().map(|v| v.clone());
            assert_eq!(back_err.map_err(|e| e.kind), Err(ErrorKind::NoRoute));
            assert_eq!(back.status, Some(ActionStatus::Failed));
        }
        other => anyhow::bail!("expected a response, got {other:?}"),
    }
    Ok(())
}
