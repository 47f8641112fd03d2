// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication contract consumed by the transport bindings.
//!
//! The core never issues or validates credentials itself; it asks the
//! configured authenticator and trusts the client identity it returns.

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Identity attached to a request after token validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub client_id: String,
    pub session_id: String,
}

/// A freshly issued or refreshed bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    /// Remaining validity in seconds.
    pub validity_sec: u64,
}

/// Token issue and validation capability.
pub trait Authenticator: Send + Sync {
    fn login(&self, client_id: &str, password: &str) -> Result<AuthToken, BusError>;

    fn refresh_token(&self, client_id: &str, old_token: &str) -> Result<AuthToken, BusError>;

    /// Invalidate every session of the client.
    fn logout(&self, client_id: &str);

    fn validate_token(&self, token: &str) -> Result<ClientSession, BusError>;

    fn validate_password(&self, client_id: &str, password: &str) -> Result<(), BusError>;
}
