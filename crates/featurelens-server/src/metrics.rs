//! Prometheus metrics for the FeatureLens server
//!
//! Tracks:
//! - Request latency and counts per route
//! - Registry operations by outcome
//! - Batch queries built and training datasets created
//! - Error codes returned to clients

use axum::{body::Body, extract::MatchedPath, extract::Request, middleware::Next, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// HTTP request latency histogram
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "featurelens_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "endpoint", "status"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    /// HTTP request counter
    pub static ref HTTP_REQUEST_TOTAL: IntCounterVec = register_int_counter_vec!(
        "featurelens_http_requests_total",
        "Total HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    /// Registry operations
    pub static ref REGISTRY_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "featurelens_registry_operations_total",
        "Total registry operations",
        &["operation", "status"]
    )
    .unwrap();

    /// Registry operation latency
    pub static ref REGISTRY_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "featurelens_registry_operation_duration_seconds",
        "Registry operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    /// Batch queries built
    pub static ref BATCH_QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "featurelens_batch_queries_total",
        "Batch queries built from feature views",
        &["window"]
    )
    .unwrap();

    /// Training datasets created
    pub static ref TRAINING_DATASETS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "featurelens_training_datasets_created_total",
        "Training datasets created",
        &["training_dataset_type", "data_format"]
    )
    .unwrap();

    /// Error codes returned to clients
    pub static ref ERROR_CODES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "featurelens_error_codes_total",
        "Errors returned to clients by error code",
        &["error_code"]
    )
    .unwrap();

    /// Training dataset data deletes skipped because the location is not local
    pub static ref DATA_DELETES_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        "featurelens_data_deletes_skipped_total",
        "Training dataset data deletes skipped for non-local locations"
    )
    .unwrap();
}

/// Export metrics in Prometheus text format
pub fn export_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Times one HTTP request
pub struct RequestTimer {
    start: std::time::Instant,
    method: String,
    endpoint: String,
}

impl RequestTimer {
    pub fn new(method: String, endpoint: String) -> Self {
        Self {
            start: std::time::Instant::now(),
            method,
            endpoint,
        }
    }

    pub fn observe(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        let status_str = status.to_string();

        HTTP_REQUEST_DURATION
            .with_label_values(&[&self.method, &self.endpoint, &status_str])
            .observe(duration);

        HTTP_REQUEST_TOTAL
            .with_label_values(&[&self.method, &self.endpoint, &status_str])
            .inc();
    }
}

/// Middleware recording latency and status of every request by route template
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let timer = RequestTimer::new(request.method().to_string(), endpoint);

    let response = next.run(request).await;
    timer.observe(response.status().as_u16());
    response
}

/// Records the outcome and latency of a registry call
pub fn record_registry_operation(operation: &str, duration_seconds: f64, success: bool) {
    let status = if success { "success" } else { "error" };
    REGISTRY_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    REGISTRY_OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration_seconds);
}

pub fn record_batch_query(bounded: bool) {
    let window = if bounded { "bounded" } else { "unbounded" };
    BATCH_QUERIES_TOTAL.with_label_values(&[window]).inc();
}

pub fn record_training_dataset_created(training_dataset_type: &str, data_format: &str) {
    TRAINING_DATASETS_CREATED_TOTAL
        .with_label_values(&[training_dataset_type, data_format])
        .inc();
}

pub fn record_error_code(code: u32) {
    ERROR_CODES_TOTAL
        .with_label_values(&[&code.to_string()])
        .inc();
}
