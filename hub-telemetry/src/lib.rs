//! Observability surface for AgentHub: tracing initialization, W3C trace
//! context propagation, counters, and the HTTP health endpoints.

#![warn(missing_docs, clippy::pedantic)]

mod health;
mod metrics;
mod trace;

use hub_config::TelemetryConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use health::{serve_health, HealthState, TelemetryError, TelemetryResult};
pub use metrics::{HubMetrics, MetricsSnapshot};
pub use trace::TraceContext;

/// Installs the global tracing subscriber and logs the service identity.
///
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    info!(
        service = config.service_name(),
        version = config.service_version(),
        exporter = config.exporter_endpoint(),
        "telemetry initialized"
    );
}
