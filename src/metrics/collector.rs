//! Metrics Collector

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::error;

use crate::protocol::StatusCode;
use crate::relay::RelayStats;
use crate::Result;

/// Collects and exports tunnel metrics
pub struct Metrics {
    registry: Registry,
    tunnels_total: IntCounter,
    active_tunnels: IntGauge,
    rejected_requests_total: IntCounterVec,
    dropped_requests_total: IntCounter,
    bytes_read_total: IntCounter,
    bytes_written_total: IntCounter,
    relay_failures_total: IntCounter,
    tunnel_duration: Histogram,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tunnels_total = IntCounter::new("tunnelproxy_tunnels_total", "Total number of established tunnels")?;
        let active_tunnels = IntGauge::new("tunnelproxy_active_tunnels", "Number of currently open tunnels")?;
        let rejected_requests_total = IntCounterVec::new(
            Opts::new("tunnelproxy_rejected_requests_total", "Requests answered with an error status"),
            &["status"],
        )?;
        let dropped_requests_total = IntCounter::new(
            "tunnelproxy_dropped_requests_total",
            "Requests closed without a reply because the remote was unreachable",
        )?;
        let bytes_read_total = IntCounter::new(
            "tunnelproxy_bytes_read_total",
            "Bytes read from clients and forwarded to remotes",
        )?;
        let bytes_written_total = IntCounter::new(
            "tunnelproxy_bytes_written_total",
            "Bytes read from remotes and written to clients",
        )?;
        let relay_failures_total = IntCounter::new(
            "tunnelproxy_relay_failures_total",
            "Tunnels that ended with an I/O error or a timeout",
        )?;
        let tunnel_duration = Histogram::with_opts(
            HistogramOpts::new("tunnelproxy_tunnel_duration_seconds", "Lifetime of tunnels in seconds")
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 3600.0]),
        )?;

        registry.register(Box::new(tunnels_total.clone()))?;
        registry.register(Box::new(active_tunnels.clone()))?;
        registry.register(Box::new(rejected_requests_total.clone()))?;
        registry.register(Box::new(dropped_requests_total.clone()))?;
        registry.register(Box::new(bytes_read_total.clone()))?;
        registry.register(Box::new(bytes_written_total.clone()))?;
        registry.register(Box::new(relay_failures_total.clone()))?;
        registry.register(Box::new(tunnel_duration.clone()))?;

        Ok(Self {
            registry,
            tunnels_total,
            active_tunnels,
            rejected_requests_total,
            dropped_requests_total,
            bytes_read_total,
            bytes_written_total,
            relay_failures_total,
            tunnel_duration,
        })
    }

    /// A tunnel was acknowledged and relaying starts
    pub fn tunnel_opened(&self) {
        self.tunnels_total.inc();
        self.active_tunnels.inc();
    }

    /// A tunnel finished relaying
    pub fn tunnel_closed(&self, stats: &RelayStats) {
        self.active_tunnels.dec();
        self.bytes_read_total.inc_by(stats.bytes_read);
        self.bytes_written_total.inc_by(stats.bytes_written);
        self.tunnel_duration.observe(stats.duration.as_secs_f64());
        if !stats.is_clean() {
            self.relay_failures_total.inc();
        }
    }

    /// A request was answered with an error status
    pub fn request_rejected(&self, status: StatusCode) {
        let code = status.as_u16().to_string();
        self.rejected_requests_total
            .with_label_values(&[code.as_str()])
            .inc();
    }

    /// A request was closed without any reply
    pub fn request_dropped(&self) {
        self.dropped_requests_total.inc();
    }

    pub fn get_total_tunnels(&self) -> u64 {
        self.tunnels_total.get()
    }

    pub fn get_active_tunnels(&self) -> i64 {
        self.active_tunnels.get()
    }

    pub fn get_rejected_requests(&self, status: StatusCode) -> u64 {
        let code = status.as_u16().to_string();
        self.rejected_requests_total
            .with_label_values(&[code.as_str()])
            .get()
    }

    pub fn get_bytes_transferred(&self) -> (u64, u64) {
        (self.bytes_read_total.get(), self.bytes_written_total.get())
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tunnel_lifecycle_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.tunnel_opened();
        assert_eq!(metrics.get_active_tunnels(), 1);

        metrics.tunnel_closed(&RelayStats {
            bytes_read: 10,
            bytes_written: 20,
            duration: Duration::from_millis(5),
            timed_out: false,
            failures: vec![],
        });

        assert_eq!(metrics.get_active_tunnels(), 0);
        assert_eq!(metrics.get_total_tunnels(), 1);
        assert_eq!(metrics.get_bytes_transferred(), (10, 20));
    }

    #[test]
    fn test_rejections_by_status() {
        let metrics = Metrics::new().unwrap();
        metrics.request_rejected(StatusCode::Forbidden);
        metrics.request_rejected(StatusCode::Forbidden);
        metrics.request_rejected(StatusCode::BadRequest);

        assert_eq!(metrics.get_rejected_requests(StatusCode::Forbidden), 2);
        assert_eq!(metrics.get_rejected_requests(StatusCode::BadRequest), 1);

        let exported = metrics.export_prometheus();
        assert!(exported.contains("tunnelproxy_rejected_requests_total{status=\"403\"} 2"));
    }
}
