// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Websocket message converters.
//!
//! The negotiated subprotocol picks the frame shape: the native profile
//! carries the JSON envelopes as-is, while the WoT profile maps them onto
//! frames whose `messageType` is the operation itself (requests),
//! `actionStatus` (responses and action progress), `event`, or
//! `propertyReading`. A `completed` or `failed` action status decodes as
//! the response; `pending`/`running` decode as progress notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{
    now_ms, timestamp, ActionStatus, AffordanceType, AnyEnvelope, ErrorValue,
    NotificationEnvelope, Op, RequestEnvelope, ResponseEnvelope,
};
use crate::error::{BusError, ErrorKind};

/// Native profile: JSON envelopes on the wire, unchanged.
pub const SUBPROTOCOL_NATIVE: &str = "thingbus";
/// WoT websocket profile.
pub const SUBPROTOCOL_WOT: &str = "wot.wss";

const MSG_ACTION_STATUS: &str = "actionStatus";
const MSG_EVENT: &str = "event";
const MSG_PROPERTY_READING: &str = "propertyReading";

/// Encoding/decoding of one wire frame.
pub trait MessageConverter: Send + Sync {
    fn subprotocol(&self) -> &'static str;

    fn encode(&self, envelope: &AnyEnvelope) -> Result<String, BusError>;

    fn decode(&self, text: &str) -> Result<AnyEnvelope, BusError>;
}

/// Pick the converter for a negotiated subprotocol. Unknown or absent
/// protocols fall back to the native profile.
pub fn converter_for(subprotocol: Option<&str>) -> &'static dyn MessageConverter {
    match subprotocol {
        Some(SUBPROTOCOL_WOT) => &WotWssConverter,
        _ => &PassthroughConverter,
    }
}

/// The native profile: envelopes pass through untouched.
pub struct PassthroughConverter;

impl MessageConverter for PassthroughConverter {
    fn subprotocol(&self) -> &'static str {
        SUBPROTOCOL_NATIVE
    }

    fn encode(&self, envelope: &AnyEnvelope) -> Result<String, BusError> {
        envelope.to_json()
    }

    fn decode(&self, text: &str) -> Result<AnyEnvelope, BusError> {
        AnyEnvelope::from_json(text)
    }
}

/// One WoT-profile frame. `messageType` doubles as the discriminator.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct WotFrame {
    #[serde(rename = "messageType")]
    message_type: String,
    #[serde(rename = "thingID", skip_serializing_if = "String::is_empty")]
    thing_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(rename = "correlationID", skip_serializing_if = "String::is_empty")]
    correlation_id: String,
    #[serde(rename = "senderID", skip_serializing_if = "String::is_empty")]
    sender_id: String,
    /// Request payload.
    #[serde(skip_serializing_if = "Value::is_null")]
    input: Value,
    /// Response / notification payload.
    #[serde(skip_serializing_if = "Value::is_null")]
    data: Value,
    /// Operation answered by an `actionStatus` frame.
    #[serde(skip_serializing_if = "String::is_empty")]
    operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<ActionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorValue>,
    #[serde(with = "timestamp_opt", skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

/// Optional-timestamp codec reusing the envelope's formats.
mod timestamp_opt {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => timestamp::serialize(dt, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        timestamp::deserialize(d).map(Some)
    }
}

/// Maps envelopes onto the WoT websocket subprotocol frames.
pub struct WotWssConverter;

impl MessageConverter for WotWssConverter {
    fn subprotocol(&self) -> &'static str {
        SUBPROTOCOL_WOT
    }

    fn encode(&self, envelope: &AnyEnvelope) -> Result<String, BusError> {
        let frame = match envelope {
            AnyEnvelope::Request(request) => WotFrame {
                message_type: request.operation.as_str().to_owned(),
                thing_id: request.thing_id.clone(),
                name: request.name.clone(),
                correlation_id: request.correlation_id.clone(),
                sender_id: request.sender_id.clone(),
                input: request.input.clone(),
                timestamp: Some(request.timestamp),
                ..Default::default()
            },
            AnyEnvelope::Response(response) => WotFrame {
                message_type: MSG_ACTION_STATUS.to_owned(),
                thing_id: response.thing_id.clone(),
                name: response.name.clone(),
                correlation_id: response.correlation_id.clone(),
                sender_id: response.sender_id.clone(),
                data: response.value.clone(),
                operation: response.operation.as_str().to_owned(),
                status: Some(response.status.unwrap_or(ActionStatus::Completed)),
                error: response.error.clone(),
                timestamp: Some(response.timestamp),
                ..Default::default()
            },
            AnyEnvelope::Notification(notification) => match notification.affordance_type {
                AffordanceType::Event => WotFrame {
                    message_type: MSG_EVENT.to_owned(),
                    thing_id: notification.thing_id.clone(),
                    name: notification.name.clone(),
                    correlation_id: notification.correlation_id.clone(),
                    sender_id: notification.sender_id.clone(),
                    data: notification.value.clone(),
                    timestamp: Some(notification.timestamp),
                    ..Default::default()
                },
                AffordanceType::Property => WotFrame {
                    message_type: MSG_PROPERTY_READING.to_owned(),
                    thing_id: notification.thing_id.clone(),
                    name: notification.name.clone(),
                    correlation_id: notification.correlation_id.clone(),
                    sender_id: notification.sender_id.clone(),
                    data: notification.value.clone(),
                    timestamp: Some(notification.timestamp),
                    ..Default::default()
                },
                // Action progress: an interim actionStatus frame.
                AffordanceType::Action => WotFrame {
                    message_type: MSG_ACTION_STATUS.to_owned(),
                    thing_id: notification.thing_id.clone(),
                    name: notification.name.clone(),
                    correlation_id: notification.correlation_id.clone(),
                    sender_id: notification.sender_id.clone(),
                    data: notification.value.clone(),
                    operation: notification.operation.as_str().to_owned(),
                    status: Some(ActionStatus::Running),
                    timestamp: Some(notification.timestamp),
                    ..Default::default()
                },
            },
        };
        serde_json::to_string(&frame).map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))
    }

    fn decode(&self, text: &str) -> Result<AnyEnvelope, BusError> {
        let frame: WotFrame = serde_json::from_str(text)
            .map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))?;
        let timestamp = frame.timestamp.unwrap_or_else(now_ms);

        if let Some(operation) = Op::parse(&frame.message_type) {
            return Ok(AnyEnvelope::Request(RequestEnvelope {
                operation,
                thing_id: frame.thing_id,
                name: frame.name,
                correlation_id: frame.correlation_id,
                sender_id: frame.sender_id,
                input: frame.input,
                timestamp,
                created: timestamp,
            }));
        }
        match frame.message_type.as_str() {
            MSG_ACTION_STATUS => {
                let operation = Op::parse(&frame.operation).unwrap_or(Op::InvokeAction);
                match frame.status {
                    Some(ActionStatus::Pending) | Some(ActionStatus::Running) => {
                        Ok(AnyEnvelope::Notification(NotificationEnvelope {
                            operation,
                            thing_id: frame.thing_id,
                            name: frame.name,
                            correlation_id: frame.correlation_id,
                            sender_id: frame.sender_id,
                            value: frame.data,
                            affordance_type: AffordanceType::Action,
                            timestamp,
                        }))
                    }
                    // A final status is the response itself.
                    _ => Ok(AnyEnvelope::Response(ResponseEnvelope {
                        operation,
                        thing_id: frame.thing_id,
                        name: frame.name,
                        correlation_id: frame.correlation_id,
                        sender_id: frame.sender_id,
                        value: frame.data,
                        error: frame.error,
                        status: frame.status.or(Some(ActionStatus::Completed)),
                        timestamp,
                    })),
                }
            }
            MSG_EVENT | MSG_PROPERTY_READING => {
                let (operation, affordance_type) = if frame.message_type == MSG_EVENT {
                    (Op::SubscribeEvent, AffordanceType::Event)
                } else {
                    (Op::ObserveProperty, AffordanceType::Property)
                };
                Ok(AnyEnvelope::Notification(NotificationEnvelope {
                    operation,
                    thing_id: frame.thing_id,
                    name: frame.name,
                    correlation_id: frame.correlation_id,
                    sender_id: frame.sender_id,
                    value: frame.data,
                    affordance_type,
                    timestamp,
                }))
            }
            other => Err(BusError::new(
                ErrorKind::Encode,
                format!("unknown wot frame type {other}"),
            )),
        }
    }
}

#[cfg(test)]
#[path = "converter_tests.rs"]
mod tests;
