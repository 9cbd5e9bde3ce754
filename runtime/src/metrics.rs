//! Prometheus metrics for request executions.
//!
//! Strategies record every execution they drive:
//! - Send attempts and sleeps
//! - Terminal outcomes, labelled with `finished` or the error code
//! - Total execution duration
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = MetricsExporter::install()?;
//!
//! // ... run some executions ...
//!
//! println!("{}", exporter.render());
//! # Ok(())
//! # }
//! ```

use courier_core::RequestError;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Executions reaching a terminal state, by `outcome`.
pub const EXECUTIONS_TOTAL: &str = "courier_executions_total";
/// Client invocations started.
pub const SEND_ATTEMPTS_TOTAL: &str = "courier_send_attempts_total";
/// Sleeps entered.
pub const SLEEPS_TOTAL: &str = "courier_sleeps_total";
/// Wall time from start to terminal state.
pub const EXECUTION_DURATION_SECONDS: &str = "courier_execution_duration_seconds";

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

/// Process-wide Prometheus recorder.
///
/// Rendering is left to the embedding application (serve it from an HTTP
/// endpoint, print it, push it).
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

impl MetricsExporter {
    /// Describe courier's metrics and install a Prometheus recorder as the
    /// global `metrics` recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a global recorder is already
    /// installed. Install once per process.
    pub fn install() -> Result<Self, MetricsError> {
        let builder = PrometheusBuilder::new()
            // Latency buckets for execution durations
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = builder
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();
        tracing::info!("Prometheus metrics recorder installed");
        Ok(Self { handle })
    }

    /// The underlying Prometheus handle.
    #[must_use]
    pub const fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register all metric descriptions with the current recorder.
pub fn register_metrics() {
    describe_counter!(
        EXECUTIONS_TOTAL,
        "Total number of request executions that reached a terminal state"
    );
    describe_counter!(
        SEND_ATTEMPTS_TOTAL,
        "Total number of client invocations started"
    );
    describe_counter!(SLEEPS_TOTAL, "Total number of sleeps requested by templates");
    describe_histogram!(
        EXECUTION_DURATION_SECONDS,
        "Time from execution start to terminal state"
    );
}

/// Execution metrics recorder.
pub struct ExecutionMetrics;

impl ExecutionMetrics {
    /// Record a client invocation.
    pub fn record_send() {
        counter!(SEND_ATTEMPTS_TOTAL).increment(1);
    }

    /// Record a sleep.
    pub fn record_sleep() {
        counter!(SLEEPS_TOTAL).increment(1);
    }

    /// Record a terminal outcome and the execution's total duration.
    pub fn record_outcome<T, E>(result: &Result<T, RequestError<E>>, elapsed: Duration) {
        let outcome = match result {
            Ok(_) => "finished",
            Err(error) => error.code().as_str(),
        };
        counter!(EXECUTIONS_TOTAL, "outcome" => outcome).increment(1);
        histogram!(EXECUTION_DURATION_SECONDS).record(elapsed.as_secs_f64());
    }
}
