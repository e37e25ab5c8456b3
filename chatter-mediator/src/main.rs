//! Chatter mediator -- WebSocket front end for a Game On room service.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin chatter-mediator
//!
//! # Custom address and room service
//! cargo run --bin chatter-mediator -- --bind 127.0.0.1:8080 \
//!     --room-service-url http://rooms.internal:9090/room
//!
//! # Or via environment variables
//! ROOM_ID=lobby ROOM_SERVICE_URL=http://localhost:6379/room cargo run --bin chatter-mediator
//! ```

use std::sync::Arc;

use chatter_mediator::backend::HttpBackend;
use chatter_mediator::config::{MediatorCliArgs, MediatorConfig};
use chatter_mediator::server::{self, MediatorState};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = MediatorCliArgs::parse();

    let config = match MediatorConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        room_id = ?config.room_id,
        room_service = %config.room_service_url,
        "starting chatter mediator"
    );

    let backend = HttpBackend::new(config.room_service_url.clone());
    let state = Arc::new(MediatorState::from_config(backend, &config));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "mediator listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "mediator server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start mediator");
            std::process::exit(1);
        }
    }
}
