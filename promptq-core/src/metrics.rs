// ABOUTME: Metric recording helpers over the `metrics` facade.
// ABOUTME: No-ops unless a recorder (e.g. the Prometheus exporter) is installed.

use anyhow::{Context, Result};
use std::net::SocketAddr;

pub fn record_submitted(route: &'static str) {
    metrics::counter!("promptq_submitted_total", "route" => route).increment(1);
}

pub fn record_processed(outcome: &'static str) {
    metrics::counter!("promptq_items_processed_total", "outcome" => outcome).increment(1);
}

pub fn record_reauth() {
    metrics::counter!("promptq_reauth_total").increment(1);
}

pub fn record_store_error(op: &'static str) {
    metrics::counter!("promptq_store_errors_total", "op" => op).increment(1);
}

pub fn record_malformed_item() {
    metrics::counter!("promptq_malformed_items_total").increment(1);
}

pub fn record_delivered(outcome: &'static str) {
    metrics::counter!("promptq_answers_delivered_total", "outcome" => outcome).increment(1);
}

/// Install the Prometheus exporter with its own HTTP listener
pub fn init_prometheus(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("metrics.listen must be host:port, got: {}", listen))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    tracing::info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}
