// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory token authenticator.
//!
//! Issues opaque bearer tokens with an expiry and resolves them back to the
//! owning client. Comparisons are constant-time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use thingbus::authn::{AuthToken, Authenticator, ClientSession};
use thingbus::error::{BusError, ErrorKind};
use thingbus::transport::auth::constant_time_eq;

struct SessionEntry {
    client_id: String,
    session_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    // client id → password
    clients: HashMap<String, String>,
    // token → session
    sessions: HashMap<String, SessionEntry>,
}

/// Token issuer and validator backed by an in-memory client table.
pub struct TokenAuthenticator {
    validity: chrono::Duration,
    inner: RwLock<Inner>,
}

impl TokenAuthenticator {
    pub fn new(validity_sec: u64) -> Self {
        Self {
            validity: chrono::Duration::seconds(validity_sec as i64),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a client that may log in.
    pub fn add_client(&self, client_id: &str, password: &str) {
        self.inner.write().clients.insert(client_id.to_owned(), password.to_owned());
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    fn issue(&self, inner: &mut Inner, client_id: &str, session_id: String) -> AuthToken {
        let token = uuid::Uuid::new_v4().to_string();
        inner.sessions.insert(
            token.clone(),
            SessionEntry {
                client_id: client_id.to_owned(),
                session_id,
                expires_at: Utc::now() + self.validity,
            },
        );
        AuthToken { token, validity_sec: self.validity.num_seconds().max(0) as u64 }
    }
}

impl Authenticator for TokenAuthenticator {
    fn login(&self, client_id: &str, password: &str) -> Result<AuthToken, BusError> {
        self.validate_password(client_id, password)?;
        let mut inner = self.inner.write();
        let session_id = uuid::Uuid::new_v4().to_string();
        let auth = self.issue(&mut inner, client_id, session_id);
        debug!(%client_id, "login");
        Ok(auth)
    }

    fn refresh_token(&self, client_id: &str, old_token: &str) -> Result<AuthToken, BusError> {
        let mut inner = self.inner.write();
        let session_id = match inner.sessions.get(old_token) {
            Some(entry) if entry.client_id == client_id => entry.session_id.clone(),
            _ => return Err(BusError::new(ErrorKind::Unauthorized, "unknown token")),
        };
        inner.sessions.remove(old_token);
        // The session id survives the refresh; only the token rotates.
        Ok(self.issue(&mut inner, client_id, session_id))
    }

    fn logout(&self, client_id: &str) {
        let mut inner = self.inner.write();
        inner.sessions.retain(|_, entry| entry.client_id != client_id);
        debug!(%client_id, "logout");
    }

    fn validate_token(&self, token: &str) -> Result<ClientSession, BusError> {
        let expired = {
            let inner = self.inner.read();
            match inner.sessions.get(token) {
                Some(entry) if entry.expires_at > Utc::now() => {
                    return Ok(ClientSession {
                        client_id: entry.client_id.clone(),
                        session_id: entry.session_id.clone(),
                    });
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.inner.write().sessions.remove(token);
        }
        Err(BusError::new(ErrorKind::Unauthorized, "invalid or expired token"))
    }

    fn validate_password(&self, client_id: &str, password: &str) -> Result<(), BusError> {
        let inner = self.inner.read();
        match inner.clients.get(client_id) {
            Some(expected) if constant_time_eq(expected, password) => Ok(()),
            _ => Err(BusError::new(ErrorKind::Unauthorized, "unknown client or bad password")),
        }
    }
}

#[cfg(test)]
#[path = "authn_tests.rs"]
mod tests;
