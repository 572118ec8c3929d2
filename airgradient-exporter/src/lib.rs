//! Prometheus exporter for AirGradient air quality monitors.
//!
//! This crate polls an AirGradient device's local measurements endpoint and
//! exposes each reading via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ AirGradient API │────>│     Poller      │────>│    Registry     │
//! │ /measures/...   │     │ (fetch, decode) │     │   (gauges)      │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────v────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (/metrics)    │
//!                                                 └─────────────────┘
//! ```
//!
//! The registry is constructed once by the binary and shared by reference
//! with both the poller and the HTTP server.
//!
//! # Usage
//!
//! ```bash
//! airgradient-exporter --measurements-url http://192.168.1.40/measures/current
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod backoff;
pub mod config;
pub mod http;
pub mod measurement;
pub mod metrics;
pub mod poller;

pub use config::{ConfigError, ExporterConfig, LogFormat, LoggingConfig};
pub use http::{HttpServer, ServerError};
pub use measurement::Measurement;
pub use metrics::AirGradientMetrics;
pub use poller::{HttpSource, MeasurementSource, PollError, Poller};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    }
    .map_err(|e| ConfigError::Validation(format!("Failed to initialize tracing: {}", e)))
}
