//! Prometheus metrics helpers for the Nimbus system.
//!
//! This module provides centralized metrics initialization and common metric
//! definitions used across Nimbus components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use nimbus_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize the Prometheus recorder
//!     let handle = init_metrics();
//!
//!     // Start the HTTP server for /metrics endpoint
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     // Now use metrics anywhere in your code
//!     use metrics::{counter, gauge};
//!     counter!("my_counter").increment(1);
//!     gauge!("my_gauge").set(42.0);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! All Nimbus metrics follow these conventions:
//! - Prefix: Component name (`ingest_`, `store_`, `cache_`, `query_`)
//! - Suffix: Unit or type (`_total`, `_seconds`)
//! - Labels: Use sparingly to avoid cardinality explosion; `source` is safe
//!   because the set of sources is fixed by configuration

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    // Register all metric descriptions upfront
    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already installed,
/// instead of panicking. Useful for tests or optional metrics.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port.
/// Binds synchronously (so address conflicts fail startup), then serves
/// from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server failed: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for common metrics used across Nimbus.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    // =========================================================================
    // Ingestion Metrics
    // =========================================================================

    describe_counter!(
        "ingest_records_total",
        "Raw records fetched across all sources (label: source)"
    );
    describe_counter!(
        "ingest_records_valid_total",
        "Records that passed parsing and validation"
    );
    describe_counter!(
        "ingest_records_invalid_total",
        "Records skipped by parsing or validation (label: source)"
    );
    describe_counter!(
        "ingest_records_inserted_total",
        "Records newly inserted into the store"
    );
    describe_counter!(
        "ingest_records_updated_total",
        "Records whose fields changed on re-ingest"
    );
    describe_counter!(
        "ingest_records_unchanged_total",
        "Re-ingested records confirmed identical"
    );
    describe_counter!(
        "ingest_fetch_errors_total",
        "Fetch failures (labels: source, kind=transient|permanent)"
    );
    describe_counter!(
        "ingest_cycles_total",
        "Completed worker cycles (labels: source, outcome)"
    );
    describe_histogram!(
        "ingest_cycle_duration_seconds",
        "Wall time of one full worker cycle"
    );
    describe_gauge!(
        "ingest_watermark_seconds",
        "Per-source watermark position as unix seconds (label: source)"
    );
    describe_gauge!(
        "ingest_running",
        "Whether the ingestion worker is running (1=yes, 0=no)"
    );
    describe_gauge!("ingest_sources", "Number of configured sources");

    // =========================================================================
    // Store Metrics
    // =========================================================================

    describe_histogram!(
        "store_upsert_duration_seconds",
        "Time spent committing one upsert batch"
    );
    describe_histogram!(
        "store_query_duration_seconds",
        "Time spent executing one range query page"
    );
    describe_counter!("store_errors_total", "Storage operations that failed");

    // =========================================================================
    // Cache Metrics
    // =========================================================================

    describe_counter!("cache_hits_total", "Query results served from cache");
    describe_counter!("cache_misses_total", "Query results computed from the store");
    describe_counter!(
        "cache_invalidated_total",
        "Cache entries evicted by range invalidation"
    );

    // =========================================================================
    // Query Service Metrics
    // =========================================================================

    describe_counter!(
        "query_requests_total",
        "HTTP query requests received (label: endpoint)"
    );
    describe_counter!(
        "query_rejected_total",
        "Requests rejected with invalid_query or unknown_source"
    );
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Increment a counter.
///
/// Convenience wrapper around `metrics::counter!`.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
///
/// Convenience wrapper around `metrics::gauge!`.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

/// Record a completed worker cycle for a source.
pub fn count_cycle(source: &str, outcome: &'static str) {
    metrics::counter!(
        "ingest_cycles_total",
        "source" => source.to_owned(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a fetch failure for a source.
pub fn count_fetch_error(source: &str, kind: &'static str) {
    metrics::counter!(
        "ingest_fetch_errors_total",
        "source" => source.to_owned(),
        "kind" => kind
    )
    .increment(1);
}

/// Publish a source's watermark position as a gauge.
pub fn record_watermark(source: &str, position: DateTime<Utc>) {
    metrics::gauge!("ingest_watermark_seconds", "source" => source.to_owned())
        .set(position.timestamp() as f64);
}
