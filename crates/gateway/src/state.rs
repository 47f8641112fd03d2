// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gateway state: the transport server plus the wired module pipeline.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use thingbus::module::{chain_modules, Module};
use thingbus::server::ConnectionManager;
use thingbus::store::BucketStore;
use thingbus::transport::{BusServer, ServerConfig};

use crate::authn::TokenAuthenticator;
use crate::config::GatewayConfig;
use crate::modules::directory::DirectoryModule;
use crate::modules::history::HistoryModule;
use crate::modules::keyvalue::KeyValueModule;
use crate::store::MemStore;

/// Everything a running gateway holds.
pub struct GatewayState {
    pub server: Arc<BusServer>,
    pub authenticator: Arc<TokenAuthenticator>,
    pub modules: Vec<Arc<dyn Module>>,
    pub config: GatewayConfig,
    pub shutdown: CancellationToken,
}

/// Build the pipeline and transport state.
///
/// Requests enter through the transport and flow directory → history →
/// key-value; whatever no module claims is reverse-routed to a connected
/// agent. Notifications climb the same chain (history records them on the
/// way) and end in the fan-out across subscribed connections.
pub fn build_state(config: GatewayConfig, shutdown: CancellationToken) -> Arc<GatewayState> {
    let authenticator = Arc::new(TokenAuthenticator::new(config.token_validity_sec));
    for (client_id, password) in config.client_pairs() {
        authenticator.add_client(&client_id, &password);
    }

    let store = MemStore::new();
    let _ = store.open();

    let manager = Arc::new(ConnectionManager::new("gateway"));
    let modules: Vec<Arc<dyn Module>> = vec![
        Arc::new(DirectoryModule::new(store.bucket("things"))),
        Arc::new(HistoryModule::new(config.history_retention)),
        Arc::new(KeyValueModule::new(store.bucket("keyvalue"))),
    ];

    // Pipeline tails: unclaimed requests reverse-route to agents; outgoing
    // notifications fan out to subscribers.
    let route = Arc::clone(&manager);
    let fan_out = Arc::clone(&manager);
    chain_modules(
        &modules,
        Some(Arc::new(move |request, reply_to| route.route_to_agent(request, reply_to))),
        Some(Arc::new(move |notification| fan_out.send_notification(&notification))),
    );

    // Transport ingress feeds the chain head.
    let head = Arc::clone(&modules[0]);
    manager.set_request_sink(Some(Arc::new(move |request, reply_to| {
        head.handle_request(request, reply_to)
    })));
    let head = Arc::clone(&modules[0]);
    manager.set_notification_sink(Some(Arc::new(move |notification| {
        head.handle_notification(notification)
    })));

    let server = BusServer::new(
        manager,
        Arc::clone(&authenticator) as Arc<dyn thingbus::authn::Authenticator>,
        ServerConfig { request_timeout: config.request_timeout(), ..ServerConfig::default() },
    );

    Arc::new(GatewayState { server, authenticator, modules, config, shutdown })
}
