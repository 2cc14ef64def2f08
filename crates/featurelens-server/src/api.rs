//! HTTP API handlers
//!
//! Routes are grouped by resource:
//! - [`catalog`]: feature stores, feature groups, storage connectors
//! - [`feature_views`]: feature views, their stored and batch queries
//! - [`training_datasets`]: training datasets of a feature view
//!
//! Everything below `/api/v1/featurestores/:fs_id` is scoped to one store.

use std::future::Future;
use std::time::{Duration, Instant};

use axum::{
    extract::DefaultBodyLimit,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::ServerConfig, error::AppError, health, metrics, request_id, state::AppState};

pub mod catalog;
pub mod feature_views;
pub mod training_datasets;

/// Collection response used by every list endpoint
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

/// Runs a registry call and records its latency and outcome
pub(crate) async fn timed<T, F>(operation: &'static str, call: F) -> Result<T, AppError>
where
    F: Future<Output = featurelens_core::Result<T>>,
{
    let start = Instant::now();
    let result = call.await;
    metrics::record_registry_operation(operation, start.elapsed().as_secs_f64(), result.is_ok());
    Ok(result?)
}

/// Prometheus metrics endpoint
///
/// `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::export_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => AppError::Internal(format!("Failed to export metrics: {}", e)).into_response(),
    }
}

/// All routes with state attached; middleware is added by the caller
pub fn router(state: AppState) -> Router {
    const FS: &str = "/api/v1/featurestores/:fs_id";
    const FV: &str = "/api/v1/featurestores/:fs_id/featureview/:name/version/:version";
    const TD: &str =
        "/api/v1/featurestores/:fs_id/featureview/:name/version/:version/trainingdatasets";

    Router::new()
        // Health and metrics
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(metrics_handler))
        // Catalog
        .route(
            "/api/v1/featurestores",
            get(catalog::list_feature_stores).post(catalog::create_feature_store),
        )
        .route(FS, get(catalog::get_feature_store))
        .route(
            &format!("{FS}/featuregroups"),
            get(catalog::list_feature_groups).post(catalog::create_feature_group),
        )
        .route(
            &format!("{FS}/featuregroups/:fg_id"),
            get(catalog::get_feature_group),
        )
        .route(
            &format!("{FS}/storageconnectors"),
            get(catalog::list_storage_connectors).post(catalog::create_storage_connector),
        )
        .route(
            &format!("{FS}/storageconnectors/:connector"),
            get(catalog::get_storage_connector),
        )
        // Feature views
        .route(
            &format!("{FS}/featureview"),
            get(feature_views::list_feature_views).post(feature_views::create_feature_view),
        )
        .route(
            &format!("{FS}/featureview/:name"),
            get(feature_views::get_feature_view_versions),
        )
        .route(
            FV,
            get(feature_views::get_feature_view)
                .put(feature_views::update_feature_view)
                .delete(feature_views::delete_feature_view),
        )
        .route(&format!("{FV}/query"), get(feature_views::get_query))
        .route(&format!("{FV}/query/batch"), get(feature_views::get_batch_query))
        // Training datasets
        .route(
            TD,
            get(training_datasets::list_training_datasets)
                .post(training_datasets::create_training_dataset)
                .delete(training_datasets::delete_training_datasets),
        )
        .route(
            &format!("{TD}/data"),
            axum::routing::delete(training_datasets::delete_training_datasets_data),
        )
        .route(
            &format!("{TD}/version/:td_version"),
            get(training_datasets::get_training_dataset)
                .put(training_datasets::update_training_dataset)
                .delete(training_datasets::delete_training_dataset),
        )
        .route(
            &format!("{TD}/version/:td_version/data"),
            axum::routing::delete(training_datasets::delete_training_dataset_data),
        )
        .route(
            &format!("{TD}/version/:td_version/statistics/config"),
            put(training_datasets::update_statistics_config),
        )
        .with_state(state)
}

/// The router wrapped in the server middleware stack
///
/// Layers apply bottom to top, so the timeout wraps everything.
pub fn app(state: AppState, server: &ServerConfig) -> Router {
    router(state)
        .layer(axum::middleware::from_fn(metrics::track_requests))
        .layer(DefaultBodyLimit::max(server.max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs)))
}
