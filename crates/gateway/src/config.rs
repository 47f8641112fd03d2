// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the thingbusd gateway.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "thingbusd", about = "Web-of-Things gateway")]
pub struct GatewayConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "THINGBUS_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8444, env = "THINGBUS_PORT")]
    pub port: u16,

    /// How long a synchronous HTTP request waits for its response, in
    /// milliseconds.
    #[arg(long, default_value_t = 1000, env = "THINGBUS_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Bearer token validity in seconds.
    #[arg(long, default_value_t = 24 * 3600, env = "THINGBUS_TOKEN_VALIDITY_SEC")]
    pub token_validity_sec: u64,

    /// Retained values per affordance in the history module.
    #[arg(long, default_value_t = 500, env = "THINGBUS_HISTORY_RETENTION")]
    pub history_retention: usize,

    /// Seed credentials, `clientID:password`. Repeatable.
    #[arg(long = "client", value_name = "ID:PASSWORD", env = "THINGBUS_CLIENTS", value_delimiter = ',')]
    pub clients: Vec<String>,
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Config for an in-process gateway on an ephemeral port.
    pub fn local(clients: &[(&str, &str)]) -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            request_timeout_ms: 5000,
            token_validity_sec: 3600,
            history_retention: 100,
            clients: clients.iter().map(|(id, pw)| format!("{id}:{pw}")).collect(),
        }
    }

    /// Parsed `clientID:password` pairs; malformed entries are skipped.
    pub fn client_pairs(&self) -> Vec<(String, String)> {
        self.clients
            .iter()
            .filter_map(|entry| {
                entry.split_once(':').map(|(id, pw)| (id.to_owned(), pw.to_owned()))
            })
            .collect()
    }
}
