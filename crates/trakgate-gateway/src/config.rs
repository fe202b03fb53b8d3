// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! Gateway configuration.
//!
//! Every option is both a CLI flag and an environment variable, so the
//! gateway runs unmodified under a process supervisor that only speaks env
//! (`TCP_PORT=5001 LOG_FORMAT=json trakgate-gateway`).

use clap::Parser;
use trakgate_proto::packet::HemisphereMode;

/// Real-time GT06 ingestion gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "trakgate-gateway")]
#[command(about = "GT06 tracker ingestion gateway with live WebSocket fan-out")]
#[command(version)]
pub struct Config {
    /// Device-facing GT06 TCP port
    #[arg(long, env = "TCP_PORT", default_value = "5000")]
    pub tcp_port: u16,

    /// Observer-facing HTTP/WebSocket port
    #[arg(long, env = "HTTP_PORT", default_value = "8081")]
    pub http_port: u16,

    /// Bind address for both listeners
    #[arg(short, long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: String,

    /// Log level (error, warn, info, debug)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format: console or json
    #[arg(long, env = "LOG_FORMAT", default_value = "console")]
    pub log_format: LogFormat,

    /// Idle-read timeout for device sessions, seconds
    #[arg(long, env = "DEVICE_IDLE_SECS", default_value = "300")]
    pub device_idle_secs: u64,

    /// Per-IMEI pending-update cap; the oldest update is dropped on overflow
    #[arg(long, env = "QUEUE_CAP", default_value = "1024")]
    pub queue_cap: usize,

    /// Maximum concurrent observer connections
    #[arg(long, env = "MAX_OBSERVERS", default_value = "100")]
    pub max_observers: usize,

    /// Devices encode S/W hemispheres via course-word flag bits instead of
    /// signed coordinates
    #[arg(long, env = "HEMISPHERE_FLAGS")]
    pub hemisphere_flags: bool,

    /// Serve static files from this directory on unmatched paths
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<String>,

    /// Grace period for draining pending updates on shutdown, seconds
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "5")]
    pub shutdown_grace_secs: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable console lines.
    Console,
    /// One JSON document per event.
    Json,
}

impl Config {
    /// Hemisphere decoding mode for the packet parser.
    pub fn hemisphere_mode(&self) -> HemisphereMode {
        if self.hemisphere_flags {
            HemisphereMode::FlagBits
        } else {
            HemisphereMode::Signed
        }
    }

    /// A configuration with test-friendly defaults (ephemeral ports).
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let mut config = Self::parse_from(["trakgate-gateway"]);
        config.tcp_port = 0;
        config.http_port = 0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::parse_from(["trakgate-gateway"]);
        assert_eq!(config.tcp_port, 5000);
        assert_eq!(config.http_port, 8081);
        assert_eq!(config.log_format, LogFormat::Console);
        assert_eq!(config.queue_cap, 1024);
        assert!(!config.hemisphere_flags);
        assert_eq!(config.hemisphere_mode(), HemisphereMode::Signed);
    }

    #[test]
    fn flags_override() {
        let config = Config::parse_from([
            "trakgate-gateway",
            "--tcp-port",
            "6000",
            "--log-format",
            "json",
            "--hemisphere-flags",
        ]);
        assert_eq!(config.tcp_port, 6000);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.hemisphere_mode(), HemisphereMode::FlagBits);
    }
}
