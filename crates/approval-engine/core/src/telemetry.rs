//! Tracing bootstrap for embedding applications.
//!
//! The engine itself only emits `tracing` events; initializing a
//! subscriber is the host's call. This module provides the standard
//! EnvFilter + fmt setup for hosts that do not bring their own.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level filter, `RUST_LOG` syntax.
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Telemetry guard - keep alive for the lifetime of the subscriber.
pub struct TelemetryGuard;

/// Initialize tracing with an env filter and fmt layer.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    Registry::default()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    TelemetryGuard
}
