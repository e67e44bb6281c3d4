//! Prometheus recorder for the client metrics
//!
//! The library crates emit through the `metrics` facade; this installs the
//! recorder that collects them so `--metrics` can print a snapshot on exit.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return its render handle.
///
/// `client_request_duration_seconds` gets explicit buckets so it renders as
/// a histogram rather than a summary.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("client_request_duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .context("invalid histogram buckets")?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}
