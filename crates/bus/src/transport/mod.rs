// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport bindings: HTTP, SSE, and WebSocket, server and client side.

pub mod auth;
pub mod converter;
pub mod http;
pub mod sse;
pub mod sse_client;
pub mod ws;
pub mod ws_client;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::authn::Authenticator;
use crate::error::BusError;
use crate::rnr::RnrChannel;
use crate::server::ConnectionManager;

/// Tunables shared by the server-side bindings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a synchronous HTTP request waits for its response.
    pub request_timeout: Duration,
    /// Upper bound on a single SSE frame payload.
    pub max_frame_size: usize,
    /// SSE keep-alive interval.
    pub keep_alive: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            max_frame_size: 10 * 1024 * 1024,
            keep_alive: Duration::from_secs(15),
        }
    }
}

/// Shared state of the transport server: the connection registry, the
/// correlator for reversed requests, and the authenticator.
pub struct BusServer {
    pub manager: Arc<ConnectionManager>,
    pub rnr: RnrChannel,
    pub authenticator: Arc<dyn Authenticator>,
    pub config: ServerConfig,
}

impl BusServer {
    pub fn new(
        manager: Arc<ConnectionManager>,
        authenticator: Arc<dyn Authenticator>,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self { manager, rnr: RnrChannel::new(), authenticator, config })
    }
}

/// Build the axum `Router` carrying every binding.
///
/// Static routes win over the generic `{operation}/{thingID}` pair, so the
/// health, auth, and channel endpoints are never shadowed.
pub fn build_router(server: Arc<BusServer>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/ping", get(http::ping))
        // Session endpoints
        .route("/authn/login", post(http::login))
        .route("/authn/refresh", post(http::refresh))
        .route("/authn/logout", post(http::logout))
        // SSE return channel + decoupled ingress
        .route("/bus/sse", get(sse::sse_handler))
        .route("/bus/request", post(sse::post_request))
        .route("/bus/response", post(sse::post_response))
        .route("/bus/notification", post(sse::post_notification))
        // WebSocket (auth via bearer header or query param)
        .route("/ws", get(ws::ws_handler))
        // Generic thing-affordance requests
        .route("/{operation}/{thing_id}", any(http::thing_request))
        .route("/{operation}/{thing_id}/{name}", any(http::thing_request_name))
        // Middleware
        .layer(middleware::from_fn_with_state(server.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(server)
}

impl IntoResponse for BusError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_error_value())).into_response()
    }
}
