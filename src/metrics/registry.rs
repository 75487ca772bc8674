use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for latency metrics (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros (`counter!`,
/// `gauge!`, `histogram!`) can be used anywhere in the codebase. The
/// `PrometheusHandle` is retained solely for rendering `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Must be called once at startup.
    pub fn install() -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .expect("valid matcher")
            .install_recorder()
            .expect("failed to install metrics recorder");

        // connections
        describe_counter!(
            "proxy_connections_total",
            Unit::Count,
            "Total client connections accepted"
        );
        describe_gauge!(
            "proxy_connections_active",
            Unit::Count,
            "Number of active client connections"
        );

        // exchanges
        describe_counter!(
            "proxy_requests_total",
            Unit::Count,
            "Total proxied requests by kind and status"
        );
        describe_histogram!(
            "proxy_request_duration_seconds",
            Unit::Seconds,
            "Forward-proxied exchange duration from head to response end"
        );

        // tunnels
        describe_gauge!(
            "proxy_tunnels_active",
            Unit::Count,
            "Number of CONNECT tunnels currently spliced"
        );
        describe_counter!(
            "proxy_tunnel_bytes_total",
            Unit::Bytes,
            "Bytes relayed through CONNECT tunnels by direction"
        );

        // body capture
        describe_counter!(
            "proxy_capture_bytes_total",
            Unit::Bytes,
            "Body bytes appended to cache files by side"
        );
        describe_counter!(
            "proxy_records_published_total",
            Unit::Count,
            "Completed exchange records published to subscribers"
        );

        Self { handle }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
