// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! thingbus: the messaging core for Web-of-Things gateways and agents.
//!
//! Routes three envelope kinds — Request, Response, Notification — between
//! consumers and Thing-hosting agents through a chain of pipeline modules
//! and a set of transport bindings (HTTP, SSE, WebSocket; server and client
//! side each).

pub mod authn;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod module;
pub mod rnr;
pub mod server;
pub mod slot;
pub mod store;
pub mod subscription;
pub mod transport;

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
