//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the polling engine:
//! - Results pushed to the store, by status
//! - Polls, re-arms and time spent waiting
//! - Poll timeouts
//! - Completion notifications and poison messages
//!
//! # Example
//!
//! ```rust,no_run
//! use msgpoll_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Serve `server.render()` from the host application's `/metrics` route
//! let rendered = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use msgpoll_core::result::PollingStatus;
use std::net::SocketAddr;
use std::time::Duration;
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

/// Prometheus metrics exporter.
///
/// Installs the global recorder and renders metrics for scraping. No listener
/// is bound: the host application serves [`MetricsServer::render`] itself.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the host application serves metrics on, used for logging (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics recorder installed"
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address the host application serves metrics on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "polling_results_pushed_total",
        "Total number of results pushed to the poller, by status"
    );
    describe_counter!("polling_polls_total", "Total number of poll calls");
    describe_counter!(
        "polling_rearms_total",
        "Total number of times a poll woke up to a filtered-out result and waited again"
    );
    describe_counter!(
        "polling_timeouts_total",
        "Total number of polls abandoned because their timeout elapsed"
    );
    describe_histogram!(
        "polling_wait_duration_seconds",
        "Time polls spent waiting for a matching result"
    );
    describe_gauge!(
        "polling_stored_results",
        "Number of results currently held by the in-memory poller"
    );
    describe_counter!(
        "polling_completion_events_published_total",
        "Total number of generic completion notifications published"
    );
    describe_counter!(
        "polling_completion_publish_errors_total",
        "Total number of completion notifications the bus refused"
    );
    describe_counter!(
        "polling_correlated_events_total",
        "Total number of domain events mapped to a message result, by status"
    );
    describe_counter!(
        "polling_poison_messages_total",
        "Total number of poison messages converted into failed results"
    );
}

/// Poller metrics recorder.
pub struct PollingMetrics;

impl PollingMetrics {
    /// Record a push.
    pub fn record_push(status: PollingStatus, stored_results: usize) {
        counter!("polling_results_pushed_total", "status" => status.to_string()).increment(1);
        // Intentional cast for metrics - f64 represents all practical map sizes exactly
        #[allow(clippy::cast_precision_loss)]
        gauge!("polling_stored_results").set(stored_results as f64);
    }

    /// Record a poll call.
    pub fn record_poll() {
        counter!("polling_polls_total").increment(1);
    }

    /// Record a poll going back to sleep after a filtered-out result.
    pub fn record_rearm() {
        counter!("polling_rearms_total").increment(1);
    }

    /// Record how long a poll waited.
    pub fn record_wait(duration: Duration) {
        histogram!("polling_wait_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a poll timeout.
    pub fn record_timeout() {
        counter!("polling_timeouts_total").increment(1);
    }
}

/// Completion dispatch metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a published completion notification.
    pub fn record_completion_published() {
        counter!("polling_completion_events_published_total").increment(1);
    }

    /// Record a completion notification the bus refused.
    pub fn record_completion_publish_error() {
        counter!("polling_completion_publish_errors_total").increment(1);
    }

    /// Record a domain event mapped to a result.
    pub fn record_correlated(status: PollingStatus) {
        counter!("polling_correlated_events_total", "status" => status.to_string()).increment(1);
    }

    /// Record a poison message turned into a failed result.
    pub fn record_poison_message() {
        counter!("polling_poison_messages_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn test_metrics_server_start() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());

        // A second start in the same process finds the recorder installed
        assert!(server.start().is_ok());
        assert!(MetricsServer::new("127.0.0.1:0".parse().unwrap()).start().is_ok());
    }

    #[test]
    fn test_metrics_server_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        PollingMetrics::record_timeout();
        PollingMetrics::record_push(PollingStatus::Succeeded, 1);

        // handle is None if another test installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("polling_timeouts_total"));
            assert!(rendered.contains("polling_results_pushed_total"));
        }
    }

    #[test]
    fn test_polling_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        PollingMetrics::record_poll();
        PollingMetrics::record_rearm();
        PollingMetrics::record_wait(Duration::from_millis(40));
        PollingMetrics::record_push(PollingStatus::Failed, 3);

        if let Some(rendered) = server.render() {
            assert!(rendered.contains("polling_polls_total"));
            assert!(rendered.contains("polling_rearms_total"));
            assert!(rendered.contains("polling_wait_duration_seconds"));
            assert!(rendered.contains("status=\"failed\""));
            assert!(rendered.contains("polling_stored_results"));
        }
    }

    #[test]
    fn test_dispatch_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        DispatchMetrics::record_completion_published();
        DispatchMetrics::record_completion_publish_error();
        DispatchMetrics::record_correlated(PollingStatus::Accepted);
        DispatchMetrics::record_poison_message();

        if let Some(rendered) = server.render() {
            assert!(rendered.contains("polling_completion_events_published_total"));
            assert!(rendered.contains("polling_completion_publish_errors_total"));
            assert!(rendered.contains("polling_correlated_events_total"));
            assert!(rendered.contains("polling_poison_messages_total"));
        }
    }
}
