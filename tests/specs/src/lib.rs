// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for wire-level smoke tests.
//!
//! Runs a real gateway on a TCP port and talks to it with plain HTTP and
//! websocket clients, asserting the protocol surface rather than going
//! through the thingbus client types.

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A gateway serving on a real TCP port for the duration of a test.
pub struct GatewayProcess {
    pub base_url: String,
    gateway: thingbusd::test_support::TestGateway,
}

impl GatewayProcess {
    pub async fn start(clients: &[(&str, &str)]) -> anyhow::Result<Self> {
        ensure_crypto();
        let gateway = thingbusd::test_support::spawn_gateway(clients).await?;
        Ok(Self { base_url: gateway.base_url(), gateway })
    }

    pub fn ws_url(&self) -> String {
        self.base_url.replacen("http://", "ws://", 1)
    }

    pub fn connection_count(&self) -> usize {
        self.gateway.state.server.manager.connection_count()
    }

    /// Log in and return a bearer token.
    pub async fn login(&self, client_id: &str, password: &str) -> anyhow::Result<String> {
        thingbusd::test_support::login(&self.base_url, client_id, password).await
    }
}
