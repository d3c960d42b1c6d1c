//! Prometheus metrics for the guards.
//!
//! Every guard records through the `metrics` facade, which is a no-op until a
//! recorder is installed. [`MetricsServer`] installs a Prometheus recorder
//! and describes the metrics below so they render with help text.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `warden_circuit_breaker_calls_total` | counter | `name`, `outcome` |
//! | `warden_circuit_breaker_state` | gauge (0 closed, 1 open, 2 half-open) | `name` |
//! | `warden_rate_limiter_requests_total` | counter | `name`, `outcome` |
//! | `warden_rate_limiter_wait_seconds` | histogram | `name` |
//! | `warden_cycles_detected_total` | counter | `type` |
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.install()?;
//!
//! // Serve this from your own /metrics endpoint
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder for guard metrics.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsServer")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsServer {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe guard metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves the exporter without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("wait_seconds".to_string()),
                &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Guard metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Whether this exporter owns the installed recorder
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the exporter hasn't been installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "warden_circuit_breaker_calls_total",
        "Circuit breaker calls by outcome (success, failure, rejected)"
    );
    describe_gauge!(
        "warden_circuit_breaker_state",
        "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
    );
    describe_counter!(
        "warden_rate_limiter_requests_total",
        "Rate limiter acquire attempts by outcome (allowed, rejected)"
    );
    describe_histogram!(
        "warden_rate_limiter_wait_seconds",
        "Time spent waiting for rate limit quota"
    );
    describe_counter!(
        "warden_cycles_detected_total",
        "Cycles reported by cycle detectors, by cycle type"
    );
}
