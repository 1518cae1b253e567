//! Prometheus metrics for the cleanup job.
//!
//! Provides metrics for:
//! - Rows deleted per table
//! - Page retries after transient store errors
//! - Run outcomes and durations

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Initialize the metrics system with the given configuration.
///
/// Installs the global recorder and spawns the scrape listener on the
/// current Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let address: std::net::SocketAddr = config
        .listen_address
        .parse()
        .map_err(|e| MetricsError::Setup(format!("invalid listen address: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(address = %address, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record rows removed by the intake cleanup.
///
/// # Arguments
/// * `table` - The table rows were deleted from (e.g., "intake_tokens", "entities")
/// * `count` - The number of rows deleted
pub fn record_cleanup_deletion(table: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "intake_cleanup_deletions_total",
            "table" => table.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (table, count);
    }
}

/// Record a page retried after a transient store error.
pub fn record_page_retry(stage: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "intake_cleanup_page_retries_total",
            "stage" => stage.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = stage;
    }
}

/// Record the end of a cleanup run.
///
/// # Arguments
/// * `outcome` - "completed" or "failed"
/// * `duration_secs` - Wall-clock duration of the run
pub fn record_cleanup_run(outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("intake_cleanup_runs_total", "outcome" => outcome.to_string()).increment(1);
        histogram!("intake_cleanup_run_duration_seconds", "outcome" => outcome.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, duration_secs);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
