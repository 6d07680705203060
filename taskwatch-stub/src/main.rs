//! `taskwatch-stub`: in-memory task-queue server for local runs.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:8000
//! cargo run --bin taskwatch-stub
//!
//! # Custom address, with simulated task processing
//! cargo run --bin taskwatch-stub -- --bind 0.0.0.0:9000 --simulate --tick-ms 200
//!
//! # Or via environment variable
//! TASKWATCH_STUB_ADDR=127.0.0.1:8080 cargo run --bin taskwatch-stub
//! ```

use std::sync::Arc;

use clap::Parser;
use taskwatch_stub::config::{StubCliArgs, StubConfig};
use taskwatch_stub::server::{self, StubState};
use taskwatch_stub::worker;

#[tokio::main]
async fn main() {
    let cli = StubCliArgs::parse();

    let config = match StubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, simulate = config.simulate, "starting taskwatch stub");

    let state = Arc::new(StubState::new());

    match server::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "stub server listening");
            if config.simulate {
                tokio::spawn(worker::run(state, config.simulation));
            }
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "stub server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start stub server");
            std::process::exit(1);
        }
    }
}
