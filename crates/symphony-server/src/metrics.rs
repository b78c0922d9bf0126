//! Metrics collection and export for Symphony.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use symphony_core::{Hub, RegistryStats};
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "symphony_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "symphony_connections_active";
    pub const AUTH_REJECTIONS_TOTAL: &str = "symphony_auth_rejections_total";
    pub const CLIENTS_ACTIVE: &str = "symphony_clients_active";
    pub const CHATS_ACTIVE: &str = "symphony_chats_active";
    pub const MEMBERSHIPS_ACTIVE: &str = "symphony_memberships_active";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_counter!(
        names::AUTH_REJECTIONS_TOTAL,
        "Upgrade requests rejected for a missing or invalid user id"
    );
    metrics::describe_gauge!(names::CLIENTS_ACTIVE, "Users with a registered connection");
    metrics::describe_gauge!(names::CHATS_ACTIVE, "Chats with at least one live member");
    metrics::describe_gauge!(names::MEMBERSHIPS_ACTIVE, "Total size of all chat live sets");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a rejected upgrade.
pub fn record_auth_rejection(reason: &'static str) {
    counter!(names::AUTH_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Publish registry statistics as gauges.
pub fn set_registry_stats(stats: &RegistryStats) {
    gauge!(names::CLIENTS_ACTIVE).set(stats.client_count as f64);
    gauge!(names::CHATS_ACTIVE).set(stats.chat_count as f64);
    gauge!(names::MEMBERSHIPS_ACTIVE).set(stats.membership_count as f64);
}

/// Refresh the registry gauges on a fixed interval.
pub fn spawn_stats_reporter(hub: Arc<Hub>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            set_registry_stats(&hub.stats().await);
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphony_core::MemoryChatService;

    #[test]
    fn test_metrics_guard() {
        // No recorder is installed, so this only checks nothing panics.
        let _guard = ConnectionMetricsGuard::new();
        record_auth_rejection("missing");
    }

    #[tokio::test]
    async fn test_stats_reporter_runs() {
        let hub = Arc::new(Hub::new(Arc::new(MemoryChatService::new())));
        let reporter = spawn_stats_reporter(hub, Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reporter.is_finished());
        reporter.abort();
    }
}
