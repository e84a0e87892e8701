//! Process-wide logging and metrics setup.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// `RUST_LOG`, or `info` when unset or unparsable.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init()?,
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
    }
    Ok(())
}

/// Installs the Prometheus recorder and its scrape endpoint on `addr`.
///
/// # Errors
///
/// Returns an error if the recorder is already installed or the listener
/// cannot be bound.
pub fn install_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

fn describe_metrics() {
    metrics::describe_histogram!(
        "storefront_operation_duration_seconds",
        metrics::Unit::Seconds,
        "Operation latency by method and outcome"
    );
    metrics::describe_counter!(
        "storefront_operations_total",
        "Completed operations by method and outcome"
    );
    metrics::describe_counter!(
        "storefront_dispatch_attempts_total",
        "Endpoint attempts made by gateway dispatchers"
    );
    metrics::describe_counter!(
        "storefront_breaker_transitions_total",
        "Circuit breaker state changes"
    );
}
