//! Structured logging initialization.
//!
//! This service has no distributed-tracing or OTLP export requirement, so this module covers
//! only `tracing`/`tracing-subscriber` registration, done once at process start.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initializes the global `tracing` subscriber. Construct once in `main` before doing anything
/// else observable.
pub struct Telemetry;

impl Telemetry {
    pub fn new() -> Self {
        Self
    }

    /// Installs an `EnvFilter`-driven `fmt` subscriber (`RUST_LOG`, default `info`).
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        self
    }

    /// An HTTP access-log layer for the axum router.
    pub fn http_tracing(&self) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
        TraceLayer::new_for_http()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
