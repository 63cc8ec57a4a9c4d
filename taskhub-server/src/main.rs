//! `TaskHub` development service.
//!
//! Serves the task REST API, a dev login that stands in for the identity
//! provider, and the `/events` push channel. State lives in memory only.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin taskhub-server
//! cargo run --bin taskhub-server -- --bind 127.0.0.1:8080
//! TASKHUB_SERVER_ADDR=127.0.0.1:8080 cargo run --bin taskhub-server
//! ```

use std::sync::Arc;

use clap::Parser;
use taskhub_server::config::{ServiceCliArgs, ServiceConfig};
use taskhub_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServiceCliArgs::parse();

    let config = match ServiceConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting taskhub service");

    let state = Arc::new(ServerState::with_client_url(config.client_url));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "taskhub service listening");
            tokio::select! {
                result = handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "task service failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start task service");
            std::process::exit(1);
        }
    }
}
