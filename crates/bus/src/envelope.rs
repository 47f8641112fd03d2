// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope types for the request/response/notification message family.
//!
//! All three kinds serialize as JSON objects discriminated by the
//! internally-tagged `messageType` field, so a single [`AnyEnvelope`] decode
//! covers every inbound frame on full-duplex transports.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BusError, ErrorKind};

/// Closed vocabulary of Thing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    InvokeAction,
    QueryAction,
    QueryAllActions,
    ReadProperty,
    ReadAllProperties,
    ReadMultipleProperties,
    WriteProperty,
    ObserveProperty,
    ObserveAllProperties,
    UnobserveProperty,
    UnobserveAllProperties,
    SubscribeEvent,
    SubscribeAllEvents,
    UnsubscribeEvent,
    UnsubscribeAllEvents,
    Ping,
    Login,
    Logout,
    Refresh,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvokeAction => "invokeaction",
            Self::QueryAction => "queryaction",
            Self::QueryAllActions => "queryallactions",
            Self::ReadProperty => "readproperty",
            Self::ReadAllProperties => "readallproperties",
            Self::ReadMultipleProperties => "readmultipleproperties",
            Self::WriteProperty => "writeproperty",
            Self::ObserveProperty => "observeproperty",
            Self::ObserveAllProperties => "observeallproperties",
            Self::UnobserveProperty => "unobserveproperty",
            Self::UnobserveAllProperties => "unobserveallproperties",
            Self::SubscribeEvent => "subscribeevent",
            Self::SubscribeAllEvents => "subscribeallevents",
            Self::UnsubscribeEvent => "unsubscribeevent",
            Self::UnsubscribeAllEvents => "unsubscribeallevents",
            Self::Ping => "ping",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Refresh => "refresh",
        }
    }

    /// Parse the lowercase wire form. Unknown operations are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let op = match s {
            "invokeaction" => Self::InvokeAction,
            "queryaction" => Self::QueryAction,
            "queryallactions" => Self::QueryAllActions,
            "readproperty" => Self::ReadProperty,
            "readallproperties" => Self::ReadAllProperties,
            "readmultipleproperties" => Self::ReadMultipleProperties,
            "writeproperty" => Self::WriteProperty,
            "observeproperty" => Self::ObserveProperty,
            "observeallproperties" => Self::ObserveAllProperties,
            "unobserveproperty" => Self::UnobserveProperty,
            "unobserveallproperties" => Self::UnobserveAllProperties,
            "subscribeevent" => Self::SubscribeEvent,
            "subscribeallevents" => Self::SubscribeAllEvents,
            "unsubscribeevent" => Self::UnsubscribeEvent,
            "unsubscribeallevents" => Self::UnsubscribeAllEvents,
            "ping" => Self::Ping,
            "login" => Self::Login,
            "logout" => Self::Logout,
            "refresh" => Self::Refresh,
            _ => return None,
        };
        Some(op)
    }

    /// True for the operations a connection absorbs into its own
    /// subscription tables instead of forwarding.
    pub fn is_subscription_change(&self) -> bool {
        matches!(
            self,
            Self::SubscribeEvent
                | Self::SubscribeAllEvents
                | Self::UnsubscribeEvent
                | Self::UnsubscribeAllEvents
                | Self::ObserveProperty
                | Self::ObserveAllProperties
                | Self::UnobserveProperty
                | Self::UnobserveAllProperties
        )
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which interaction surface of a Thing a notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffordanceType {
    Event,
    Property,
    Action,
}

/// Progress of an asynchronous action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Problem detail carried inside an error Response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
    #[serde(default)]
    pub status: u16,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl ErrorValue {
    /// A populated problem detail (non-empty title) converts to an error;
    /// an empty one means "no error".
    pub fn as_error(&self) -> Option<BusError> {
        if self.title.is_empty() {
            return None;
        }
        let message = if self.detail.is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.title, self.detail)
        };
        let kind = ErrorKind::parse(&self.kind).unwrap_or_else(|| ErrorKind::from_status(self.status));
        Some(BusError::new(kind, message))
    }
}

/// Current time truncated to millisecond precision, so values survive the
/// wire encoding unchanged.
pub fn now_ms() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis()).single().unwrap_or(now)
}

/// Short unique correlation id.
pub fn short_id() -> String {
    rand::rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect()
}

fn decode_value<T: DeserializeOwned>(value: &Value) -> Result<T, BusError> {
    serde_json::from_value(value.clone())
        .map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))
}

/// Timestamp codec: encodes ISO-8601 UTC with millisecond precision,
/// accepts either that or epoch milliseconds on decode.
pub(crate) mod timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Millis(i64),
        }
        match Raw::deserialize(d)? {
            Raw::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(serde::de::Error::custom),
            Raw::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        }
    }
}

/// A consumer-to-thing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub operation: Op,
    #[serde(rename = "thingID", default)]
    pub thing_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "correlationID", default)]
    pub correlation_id: String,
    #[serde(rename = "senderID", default)]
    pub sender_id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(with = "timestamp", default = "now_ms")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "timestamp", default = "now_ms")]
    pub created: DateTime<Utc>,
}

impl RequestEnvelope {
    /// New request with a fresh correlation id and current timestamps.
    pub fn new(operation: Op, thing_id: &str, name: &str, input: Value) -> Self {
        let ts = now_ms();
        Self {
            operation,
            thing_id: thing_id.to_owned(),
            name: name.to_owned(),
            correlation_id: short_id(),
            sender_id: String::new(),
            input,
            timestamp: ts,
            created: ts,
        }
    }

    /// Successful response echoing this request's routing fields.
    pub fn create_response(&self, value: Value) -> ResponseEnvelope {
        self.create_action_response(ActionStatus::Completed, value, None)
    }

    /// Error response carrying the problem detail.
    pub fn create_error_response(&self, err: &BusError) -> ResponseEnvelope {
        self.create_action_response(ActionStatus::Failed, Value::Null, Some(err.to_error_value()))
    }

    /// Response with an explicit action progress status.
    pub fn create_action_response(
        &self,
        status: ActionStatus,
        value: Value,
        error: Option<ErrorValue>,
    ) -> ResponseEnvelope {
        ResponseEnvelope {
            operation: self.operation,
            thing_id: self.thing_id.clone(),
            name: self.name.clone(),
            correlation_id: self.correlation_id.clone(),
            sender_id: String::new(),
            value,
            error,
            status: Some(status),
            timestamp: now_ms(),
        }
    }

    /// Deserialize the input into typed storage.
    pub fn decode_input<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        decode_value(&self.input)
    }
}

/// The answer to a request, matched by correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub operation: Op,
    #[serde(rename = "thingID", default)]
    pub thing_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "correlationID", default)]
    pub correlation_id: String,
    #[serde(rename = "senderID", default)]
    pub sender_id: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ActionStatus>,
    #[serde(with = "timestamp", default = "now_ms")]
    pub timestamp: DateTime<Utc>,
}

impl ResponseEnvelope {
    /// The response value, or the carried problem detail as an error.
    pub fn ok(&self) -> Result<&Value, BusError> {
        match self.error.as_ref().and_then(ErrorValue::as_error) {
            Some(err) => Err(err),
            None => Ok(&self.value),
        }
    }

    /// Deserialize the value into typed storage.
    pub fn decode_value<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        decode_value(&self.value)
    }
}

/// An unsolicited push: event, property change, or action progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub operation: Op,
    #[serde(rename = "thingID", default)]
    pub thing_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "correlationID", default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    #[serde(rename = "senderID", default)]
    pub sender_id: String,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "affordanceType")]
    pub affordance_type: AffordanceType,
    #[serde(with = "timestamp", default = "now_ms")]
    pub timestamp: DateTime<Utc>,
}

impl NotificationEnvelope {
    /// Event publication for `(thing_id, name)` subscribers.
    pub fn event(thing_id: &str, name: &str, value: Value) -> Self {
        Self::with_affordance(Op::SubscribeEvent, AffordanceType::Event, thing_id, name, value)
    }

    /// Property-change publication for `(thing_id, name)` observers.
    pub fn property(thing_id: &str, name: &str, value: Value) -> Self {
        Self::with_affordance(Op::ObserveProperty, AffordanceType::Property, thing_id, name, value)
    }

    /// Action progress update. Reuses the action request's correlation id so
    /// the original sender can tie updates to its invocation.
    pub fn action_progress(request: &RequestEnvelope, value: Value) -> Self {
        let mut n = Self::with_affordance(
            Op::InvokeAction,
            AffordanceType::Action,
            &request.thing_id,
            &request.name,
            value,
        );
        n.correlation_id = request.correlation_id.clone();
        n
    }

    /// Wrap a response nobody was waiting for as a generic push.
    pub fn from_response(resp: &ResponseEnvelope) -> Self {
        let affordance = match resp.operation {
            Op::InvokeAction | Op::QueryAction | Op::QueryAllActions => AffordanceType::Action,
            Op::ObserveProperty | Op::ObserveAllProperties => AffordanceType::Property,
            _ => AffordanceType::Event,
        };
        Self {
            operation: resp.operation,
            thing_id: resp.thing_id.clone(),
            name: resp.name.clone(),
            correlation_id: resp.correlation_id.clone(),
            sender_id: resp.sender_id.clone(),
            value: resp.value.clone(),
            affordance_type: affordance,
            timestamp: resp.timestamp,
        }
    }

    fn with_affordance(
        operation: Op,
        affordance_type: AffordanceType,
        thing_id: &str,
        name: &str,
        value: Value,
    ) -> Self {
        Self {
            operation,
            thing_id: thing_id.to_owned(),
            name: name.to_owned(),
            correlation_id: String::new(),
            sender_id: String::new(),
            value,
            affordance_type,
            timestamp: now_ms(),
        }
    }

    /// Deserialize the value into typed storage.
    pub fn decode_value<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        decode_value(&self.value)
    }
}

/// Wire frame: any of the three envelope kinds, tagged by `messageType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "lowercase")]
pub enum AnyEnvelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Notification(NotificationEnvelope),
}

impl AnyEnvelope {
    pub fn to_json(&self) -> Result<String, BusError> {
        serde_json::to_string(self).map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, BusError> {
        serde_json::from_str(text).map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))
    }
}

/// Stored affordance value, the unit of history retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingValue {
    #[serde(rename = "affordanceType")]
    pub affordance_type: AffordanceType,
    #[serde(rename = "thingID", default)]
    pub thing_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "senderID", default)]
    pub sender_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(with = "timestamp", default = "now_ms")]
    pub timestamp: DateTime<Utc>,
}

impl From<&NotificationEnvelope> for ThingValue {
    fn from(n: &NotificationEnvelope) -> Self {
        Self {
            affordance_type: n.affordance_type,
            thing_id: n.thing_id.clone(),
            name: n.name.clone(),
            sender_id: n.sender_id.clone(),
            data: n.value.clone(),
            timestamp: n.timestamp,
        }
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
