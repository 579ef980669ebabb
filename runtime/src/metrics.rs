//! Prometheus exporter and metric descriptions.
//!
//! Every metric the worker records is described here:
//! - Runner polling, decoding, batching and commits
//! - Persistence retries and failures
//! - Notification fan-out
//! - Capability call latency
//!
//! # Example
//!
//! ```rust,no_run
//! use snapshare_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
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

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built, or
    /// [`MetricsError::Install`] if another recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder)
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();

        tokio::spawn(async move {
            // `ExporterError` (metrics-exporter-prometheus 0.15) implements neither
            // `Debug` nor `Display`, so it cannot be attached as a field.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        tracing::info!(addr = %self.addr, "Metrics server started");
        self.handle = Some(handle);
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Runner
    describe_counter!("messages_polled_total", "Raw messages polled from the broker");
    describe_counter!("decode_failures_total", "Messages skipped because they failed to decode");
    describe_counter!("events_aggregated_total", "Events folded into flushed batches");
    describe_counter!("batches_flushed_total", "Batches persisted, labelled by trigger");
    describe_counter!("offsets_committed_total", "Successful offset commits");
    describe_counter!("commit_failures_total", "Offset commits rejected by the broker");
    describe_counter!("runner_resubscribes_total", "Subscriptions dropped after a failed unit of work");

    // Persistence
    describe_counter!("counter_updates_total", "Atomic counter increments applied");
    describe_counter!("counter_updates_skipped_total", "Image increments that matched no row");
    describe_counter!("persistence_retries_total", "Retries of transient persistence failures");
    describe_counter!(
        "persistence_failures_total",
        "Persistence calls that failed for good, labelled by class"
    );

    // Fan-out
    describe_counter!("notifications_sent_total", "Notifications published");
    describe_counter!("notifications_failed_total", "Notifications that could not be published");

    // Capabilities
    describe_histogram!(
        "capability_call_duration_seconds",
        "Latency of repository and publisher calls"
    );
    describe_counter!("capability_call_errors_total", "Failed repository and publisher calls");
}
