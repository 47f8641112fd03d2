// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error codes shared across the module pipeline and all transport
//! bindings.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::envelope::ErrorValue;

/// Error kinds surfaced by the messaging core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Unauthorized,
    BadRequest,
    NotFound,
    NoRoute,
    NoDownstream,
    NoSink,
    NoSseChannel,
    AgentNotConnected,
    DuplicateConnection,
    PropertyNotFound,
    UnhandledOperation,
    Timeout,
    Encode,
    UpgradeFailed,
    NotConnected,
    Internal,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::NoRoute => 404,
            Self::NoDownstream => 500,
            Self::NoSink => 500,
            Self::NoSseChannel => 400,
            Self::AgentNotConnected => 503,
            Self::DuplicateConnection => 409,
            Self::PropertyNotFound => 404,
            Self::UnhandledOperation => 400,
            Self::Timeout => 408,
            Self::Encode => 400,
            Self::UpgradeFailed => 400,
            Self::NotConnected => 503,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::BadRequest => "bad-request",
            Self::NotFound => "not-found",
            Self::NoRoute => "no-route",
            Self::NoDownstream => "no-downstream",
            Self::NoSink => "no-sink",
            Self::NoSseChannel => "no-sse-channel",
            Self::AgentNotConnected => "agent-not-connected",
            Self::DuplicateConnection => "duplicate-connection",
            Self::PropertyNotFound => "property-not-found",
            Self::UnhandledOperation => "unhandled-operation",
            Self::Timeout => "timeout",
            Self::Encode => "encode",
            Self::UpgradeFailed => "upgrade-failed",
            Self::NotConnected => "not-connected",
            Self::Internal => "internal",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "unauthorized" => Self::Unauthorized,
            "bad-request" => Self::BadRequest,
            "not-found" => Self::NotFound,
            "no-route" => Self::NoRoute,
            "no-downstream" => Self::NoDownstream,
            "no-sink" => Self::NoSink,
            "no-sse-channel" => Self::NoSseChannel,
            "agent-not-connected" => Self::AgentNotConnected,
            "duplicate-connection" => Self::DuplicateConnection,
            "property-not-found" => Self::PropertyNotFound,
            "unhandled-operation" => Self::UnhandledOperation,
            "timeout" => Self::Timeout,
            "encode" => Self::Encode,
            "upgrade-failed" => Self::UpgradeFailed,
            "not-connected" => Self::NotConnected,
            "internal" => Self::Internal,
            _ => return None,
        };
        Some(kind)
    }

    /// Best-effort mapping from an HTTP status carried in a problem detail.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            400 => Self::BadRequest,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::DuplicateConnection,
            503 => Self::AgentNotConnected,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a machine-readable kind and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusError {
    pub kind: ErrorKind,
    pub message: String,
}

impl BusError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// Convert into the problem-detail form carried inside a Response.
    pub fn to_error_value(&self) -> ErrorValue {
        ErrorValue {
            status: self.kind.http_status(),
            kind: self.kind.as_str().to_owned(),
            title: self.kind.as_str().to_owned(),
            detail: self.message.clone(),
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BusError {}
