//! Metrics recorder installation.
//!
//! Counters and histograms are emitted through the `metrics` facade at
//! their call sites; this module installs the Prometheus recorder and hands
//! the render handle to the HTTP surface, which owns the `/metrics` route.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Response-time buckets in seconds (Prometheus defaults).
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus recorder and return the exposition handle.
/// Returns `None` when a recorder is already installed (tests).
pub fn install() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)
        .expect("bucket list is non-empty")
        .install_recorder()
    {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::warn!(%error, "metrics recorder not installed");
            None
        }
    }
}
