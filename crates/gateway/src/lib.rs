// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! thingbusd: a Web-of-Things gateway composed from the thingbus core.

pub mod authn;
pub mod config;
pub mod keys;
pub mod modules;
pub mod state;
pub mod store;
pub mod test_support;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::state::build_state;

/// Run the gateway until shutdown.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = build_state(config, shutdown.clone());
    let router = thingbus::transport::build_router(state.server.clone());

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("thingbusd listening on {}", listener.local_addr()?);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
