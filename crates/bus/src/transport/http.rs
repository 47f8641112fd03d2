// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP binding: session endpoints plus the generic synchronous
//! thing-affordance request surface.
//!
//! This binding is consumer-only and unidirectional: the request blocks
//! until the pipeline replies (or the server response timeout elapses) and
//! carries no subscriptions and no push channel.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::debug;

use crate::authn::ClientSession;
use crate::connection::ReplyTo;
use crate::envelope::{Op, RequestEnvelope};
use crate::error::{BusError, ErrorKind};
use crate::transport::BusServer;

/// Header carrying the caller-chosen correlation id.
pub const HEADER_CORRELATION_ID: &str = "correlationID";
/// Header tying a request to a return-channel connection.
pub const HEADER_CONNECTION_ID: &str = "cid";

/// `GET /ping` — health.
pub async fn ping() -> &'static str {
    "pong"
}

#[derive(Debug, Deserialize)]
pub struct LoginArgs {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginReply {
    pub token: String,
    pub validity_sec: u64,
}

/// `POST /authn/login` — exchange credentials for a bearer token.
pub async fn login(
    State(server): State<Arc<BusServer>>,
    Json(args): Json<LoginArgs>,
) -> Response {
    match server.authenticator.login(&args.login, &args.password) {
        Ok(auth) => {
            Json(LoginReply { token: auth.token, validity_sec: auth.validity_sec }).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// `POST /authn/refresh` — trade the current token for a fresh one.
pub async fn refresh(
    State(server): State<Arc<BusServer>>,
    Extension(session): Extension<ClientSession>,
    Json(old_token): Json<String>,
) -> Response {
    match server.authenticator.refresh_token(&session.client_id, &old_token) {
        Ok(auth) => {
            Json(LoginReply { token: auth.token, validity_sec: auth.validity_sec }).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// `POST /authn/logout` — invalidate the session and drop the client's
/// connections.
pub async fn logout(
    State(server): State<Arc<BusServer>>,
    Extension(session): Extension<ClientSession>,
) -> Response {
    server.authenticator.logout(&session.client_id);
    server.manager.close_all_client_connections(&session.client_id);
    StatusCode::OK.into_response()
}

/// `* /{operation}/{thing_id}` — thing-level request.
pub async fn thing_request(
    State(server): State<Arc<BusServer>>,
    Extension(session): Extension<ClientSession>,
    Path((operation, thing_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_thing_request(server, session, operation, thing_id, String::new(), headers, body).await
}

/// `* /{operation}/{thing_id}/{name}` — affordance-level request.
pub async fn thing_request_name(
    State(server): State<Arc<BusServer>>,
    Extension(session): Extension<ClientSession>,
    Path((operation, thing_id, name)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_thing_request(server, session, operation, thing_id, name, headers, body).await
}

async fn handle_thing_request(
    server: Arc<BusServer>,
    session: ClientSession,
    operation: String,
    thing_id: String,
    name: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(op) = Op::parse(&operation) else {
        return BusError::new(ErrorKind::BadRequest, format!("unsupported operation {operation}"))
            .into_response();
    };
    if op == Op::Ping {
        return Json(json!("pong")).into_response();
    }
    if op.is_subscription_change() {
        return BusError::new(
            ErrorKind::BadRequest,
            "subscriptions are not supported on this binding",
        )
        .into_response();
    }

    let input: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => return BusError::new(ErrorKind::Encode, e.to_string()).into_response(),
        }
    };

    let mut request = RequestEnvelope::new(op, &thing_id, &name, input);
    request.sender_id = session.client_id.clone();
    if let Some(correlation_id) = header_str(&headers, HEADER_CORRELATION_ID) {
        request.correlation_id = correlation_id.to_owned();
    }

    // Capture the (single) reply through a oneshot and block on it below.
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let reply: ReplyTo = Arc::new(move |response| {
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send(response);
        }
    });

    if let Err(err) = server.manager.forward_request(request, reply) {
        return err.into_response();
    }

    match tokio::time::timeout(server.config.request_timeout, rx).await {
        Ok(Ok(response)) => match response.error.as_ref().and_then(|e| e.as_error()) {
            Some(err) => {
                let status = StatusCode::from_u16(err.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(response.error.clone().unwrap_or_default())).into_response()
            }
            None => Json(response.value).into_response(),
        },
        Ok(Err(_)) | Err(_) => {
            debug!(client_id = %session.client_id, "no response within the request timeout");
            BusError::new(ErrorKind::Timeout, "no response within the request timeout")
                .into_response()
        }
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}
