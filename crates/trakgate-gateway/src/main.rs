// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! trakgate gateway binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: devices on 5000, observers on 8081
//! trakgate-gateway
//!
//! # Environment spelling of the same knobs
//! TCP_PORT=5001 HTTP_PORT=9090 LOG_FORMAT=json trakgate-gateway
//! ```

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use trakgate_gateway::config::{Config, LogFormat};
use trakgate_gateway::server;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(&config);

    if let Err(e) = server::run(config).await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

/// Install the global tracing subscriber per `--log-level`/`--log-format`.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format {
        LogFormat::Console => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}
