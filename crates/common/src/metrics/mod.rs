//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions.
//! Everything is recorded through the `metrics` facade; nothing is
//! exported unless `install_exporter` has been called.

use crate::errors::{AppError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Metrics prefix for all Reef metrics
pub const METRICS_PREFIX: &str = "reef";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s, multi-stage synthesis
];

/// Buckets for embedding and chat-model latency (typically slower)
pub const UPSTREAM_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Credit metrics
    describe_counter!(
        format!("{}_credits_reserved_total", METRICS_PREFIX),
        Unit::Count,
        "Credits reserved ahead of paid operations"
    );

    describe_counter!(
        format!("{}_credits_released_total", METRICS_PREFIX),
        Unit::Count,
        "Credits refunded after failed operations"
    );

    describe_counter!(
        format!("{}_credit_rejections_total", METRICS_PREFIX),
        Unit::Count,
        "Reservations refused for insufficient credits"
    );

    // Search metrics
    describe_counter!(
        format!("{}_searches_created_total", METRICS_PREFIX),
        Unit::Count,
        "Search records created"
    );

    describe_histogram!(
        format!("{}_vector_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "match_papers latency in seconds"
    );

    // Purchase metrics
    describe_counter!(
        format!("{}_purchases_granted_total", METRICS_PREFIX),
        Unit::Count,
        "Credit purchases granted"
    );

    describe_counter!(
        format!("{}_purchases_duplicate_total", METRICS_PREFIX),
        Unit::Count,
        "Purchase notifications for already processed sessions"
    );

    // Rate limiting
    describe_counter!(
        format!("{}_rate_limited_total", METRICS_PREFIX),
        Unit::Count,
        "Requests denied by the rate limiter"
    );

    // Upstream metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total chat completion requests"
    );

    describe_histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Chat completion latency in seconds"
    );

    // Documents
    describe_counter!(
        format!("{}_documents_parsed_total", METRICS_PREFIX),
        Unit::Count,
        "Uploaded documents processed"
    );

    tracing::info!("Metrics registered");
}

/// Install the Prometheus recorder and its scrape listener on `port`
pub fn install_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                Matcher::Suffix("upstream_duration_seconds".to_string()),
                UPSTREAM_BUCKETS,
            )
        })
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                Matcher::Full(format!("{}_embedding_duration_seconds", METRICS_PREFIX)),
                UPSTREAM_BUCKETS,
            )
        })
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                Matcher::Full(format!("{}_llm_duration_seconds", METRICS_PREFIX)),
                UPSTREAM_BUCKETS,
            )
        })
        .and_then(|builder| builder.install())
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to install metrics exporter: {}", e),
        })?;

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a credit reservation (`operation` is the paid step)
pub fn record_credits_reserved(operation: &str, amount: i32) {
    counter!(
        format!("{}_credits_reserved_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(amount.max(0) as u64);
}

/// Record a refunded reservation
pub fn record_credits_released(operation: &str, amount: i32) {
    counter!(
        format!("{}_credits_released_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(amount.max(0) as u64);
}

/// Record a reservation refused for lack of credits
pub fn record_credit_rejection(operation: &str) {
    counter!(
        format!("{}_credit_rejections_total", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .increment(1);
}

pub fn record_search_created() {
    counter!(format!("{}_searches_created_total", METRICS_PREFIX)).increment(1);
}

pub fn record_vector_search(duration_secs: f64) {
    histogram!(format!("{}_vector_search_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Record the outcome of a purchase notification
pub fn record_purchase(granted: bool, trigger: &str) {
    let name = if granted {
        format!("{}_purchases_granted_total", METRICS_PREFIX)
    } else {
        format!("{}_purchases_duplicate_total", METRICS_PREFIX)
    };
    counter!(name, "trigger" => trigger.to_string()).increment(1);
}

pub fn record_rate_limited(endpoint_class: &str) {
    counter!(
        format!("{}_rate_limited_total", METRICS_PREFIX),
        "class" => endpoint_class.to_string()
    )
    .increment(1);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record chat completion metrics
pub fn record_llm(duration_secs: f64, purpose: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        "purpose" => purpose.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_llm_duration_seconds", METRICS_PREFIX),
            "purpose" => purpose.to_string()
        )
        .record(duration_secs);
    }
}

pub fn record_document(kind: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_documents_parsed_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_sorted() {
        for buckets in [LATENCY_BUCKETS, UPSTREAM_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No global recorder is installed; every helper must be a no-op
        let metrics = RequestMetrics::start("POST", "/api/papers/new");
        metrics.finish(200);
        record_credits_reserved("search", 1);
        record_credits_released("search", 1);
        record_purchase(true, "webhook");
        record_rate_limited("checkout");
        record_llm(0.2, "title", true);
    }
}
