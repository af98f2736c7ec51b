//! `HyperChat` relay server: a line and file relay over plain TCP.
//!
//! Clients connect, send their handle as the first line, and then exchange
//! chat lines, `@handle` directed lines, `:`-commands, and file transfers
//! through the relay.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:1234
//! cargo run --bin hyperchat-relay
//!
//! # Run on custom address
//! cargo run --bin hyperchat-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! HYPERCHAT_ADDR=127.0.0.1:8080 cargo run --bin hyperchat-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use hyperchat_relay::config::{RelayCliArgs, RelayConfig};
use hyperchat_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting hyperchat relay server");

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr, error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    };
    match listener.local_addr() {
        Ok(addr) => tracing::info!(addr = %addr, "relay server listening"),
        Err(e) => tracing::warn!(error = %e, "could not read bound address"),
    }

    let state = Arc::new(RelayState::with_config(config.max_file_size, config.chunk_size));
    relay::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install ctrl-c handler");
        }
    })
    .await;
}
