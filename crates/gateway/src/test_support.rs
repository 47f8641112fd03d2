// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Helpers for integration tests: an in-process gateway on an ephemeral
//! port.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::state::{build_state, GatewayState};

/// A gateway running inside the test process.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: Arc<GatewayState>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.state.shutdown.cancel();
        self.handle.abort();
    }
}

/// Spawn a gateway with the given seed clients, bound to an ephemeral port.
pub async fn spawn_gateway(clients: &[(&str, &str)]) -> anyhow::Result<TestGateway> {
    spawn_gateway_with(GatewayConfig::local(clients)).await
}

pub async fn spawn_gateway_with(config: GatewayConfig) -> anyhow::Result<TestGateway> {
    thingbus::ensure_crypto();
    let shutdown = CancellationToken::new();
    let state = build_state(config, shutdown.clone());
    let router = thingbus::transport::build_router(state.server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
    });
    Ok(TestGateway { addr, state, handle })
}

/// Log in over HTTP and return the bearer token.
pub async fn login(base_url: &str, client_id: &str, password: &str) -> anyhow::Result<String> {
    thingbus::ensure_crypto();
    let response = reqwest::Client::new()
        .post(format!("{base_url}/authn/login"))
        .json(&serde_json::json!({"login": client_id, "password": password}))
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    body["token"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow::anyhow!("login reply without token"))
}
