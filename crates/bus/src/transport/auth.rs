// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::{BusError, ErrorKind};
use crate::transport::BusServer;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Axum middleware that resolves the bearer token into a [`ClientSession`]
/// request extension.
///
/// Exempt: `/ping`, `/authn/login`, and `/ws` (the upgrade handler accepts a
/// `?token=` query parameter for clients that cannot set headers).
///
/// [`ClientSession`]: crate::authn::ClientSession
pub async fn auth_layer(
    State(server): State<Arc<BusServer>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/ping" || path == "/authn/login" || path == "/ws" {
        return next.run(req).await;
    }

    let session = bearer_token(req.headers())
        .ok_or_else(|| BusError::new(ErrorKind::Unauthorized, "missing bearer token"))
        .and_then(|token| server.authenticator.validate_token(token));
    match session {
        Ok(session) => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}
