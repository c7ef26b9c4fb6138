//! # Internal Metrics Module
//!
//! This module provides the infrastructure for collecting and exposing
//! relay metrics.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: The entry point for initializing the metrics system.
//!   It installs the Prometheus recorder, binds the metrics listener and
//!   constructs the `Metrics` handle.
//!
//! - **`Metrics`**: A lightweight, cloneable struct that serves as the public
//!   API for the rest of the application to interact with the metrics system.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes the `/metrics` endpoint for Prometheus to scrape.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use crate::session::ConnectionState;
use crate::task_manager::TaskManager;
use metrics::{Counter, Histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

/// The public API for the metrics system.
///
/// This struct holds cloneable handles to the metrics collectors.
#[derive(Clone)]
pub struct Metrics {
    pub alerts_dispatched_total: Counter,
    pub messages_sent_total: Counter,
    pub messages_failed_total: Counter,
    pub connection_setup_failures_total: Counter,
    pub reconnects_total: Counter,
    pub pairing_challenges_total: Counter,
    pub dispatch_duration_seconds: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_counter!("alerts_dispatched_total", Unit::Count, "Total number of fan-outs that passed the readiness check.");
        metrics::describe_counter!("alerts_rejected_total", Unit::Count, "Total number of alert requests rejected before dispatch, labeled by reason.");
        metrics::describe_counter!("messages_sent_total", Unit::Count, "Total number of per-recipient sends accepted by the transport.");
        metrics::describe_counter!("messages_failed_total", Unit::Count, "Total number of per-recipient sends that failed.");
        metrics::describe_counter!("connection_setup_failures_total", Unit::Count, "Total number of failed attempts to open a transport session.");
        metrics::describe_counter!("reconnects_total", Unit::Count, "Total number of reconnects scheduled after a non-logout disconnect.");
        metrics::describe_counter!("pairing_challenges_total", Unit::Count, "Total number of pairing challenges surfaced to the operator.");
        metrics::describe_gauge!("connection_state", Unit::Count, "Current connection state (0 disconnected, 1 connecting, 2 connected, 3 reconnecting, 4 logged out).");
        metrics::describe_gauge!("transport_connected", Unit::Count, "1 while the session is ready to send, 0 otherwise.");
        metrics::describe_histogram!("dispatch_duration_seconds", Unit::Seconds, "Time taken to fan an alert out to all recipients.");

        Self {
            alerts_dispatched_total: metrics::counter!("alerts_dispatched_total"),
            messages_sent_total: metrics::counter!("messages_sent_total"),
            messages_failed_total: metrics::counter!("messages_failed_total"),
            connection_setup_failures_total: metrics::counter!("connection_setup_failures_total"),
            reconnects_total: metrics::counter!("reconnects_total"),
            pairing_challenges_total: metrics::counter!("pairing_challenges_total"),
            dispatch_duration_seconds: metrics::histogram!("dispatch_duration_seconds"),
        }
    }

    /// Creates a `Metrics` instance that performs no operations.
    /// Used when metrics are disabled in the configuration.
    pub fn disabled() -> Self {
        Self {
            alerts_dispatched_total: Counter::noop(),
            messages_sent_total: Counter::noop(),
            messages_failed_total: Counter::noop(),
            connection_setup_failures_total: Counter::noop(),
            reconnects_total: Counter::noop(),
            pairing_challenges_total: Counter::noop(),
            dispatch_duration_seconds: Histogram::noop(),
        }
    }

    /// Publishes the current connection state.
    pub fn set_connection_state(&self, state: ConnectionState) {
        metrics::gauge!("connection_state").set(state.code() as f64);
        let connected = if state.is_ready() { 1.0 } else { 0.0 };
        metrics::gauge!("transport_connected").set(connected);
    }

    /// Counts an alert request that never reached the dispatcher.
    pub fn increment_alert_rejected(&self, reason: &'static str) {
        metrics::counter!("alerts_rejected_total", "reason" => reason).increment(1);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Builder for the metrics system.
///
/// This builder is responsible for initializing the `PrometheusRecorder`,
/// preparing the `MetricsServer`, and creating the `Metrics` handle.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    /// Creates a new `MetricsBuilder` with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Initializes the metrics system and returns a `Metrics` handle and an
    /// optional `MetricsServer`.
    ///
    /// If metrics are disabled, or the recorder cannot be installed, this
    /// returns a disabled `Metrics` instance and `None` for the server.
    pub async fn build(self, task_manager: &TaskManager) -> (Metrics, Option<(MetricsServer, SocketAddr)>) {
        if !self.config.enabled {
            return (Metrics::disabled(), None);
        }

        let recorder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        ) {
            Ok(builder) => builder.build_recorder(),
            Err(e) => {
                error!("Failed to configure Prometheus recorder: {}", e);
                return (Metrics::disabled(), None);
            }
        };
        let handle = recorder.handle();

        // Bind the listener before installing the recorder so a bind failure
        // leaves the global recorder untouched.
        let listener = match TcpListener::bind(self.config.listen_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Metrics::disabled(), None);
            }
        };

        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Metrics::disabled(), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Metrics::disabled(), None);
        }

        let metrics = Metrics::new();
        let server = MetricsServer::new(listener, handle, task_manager.get_shutdown_rx());

        (metrics, Some((server, addr)))
    }
}

pub mod server;
