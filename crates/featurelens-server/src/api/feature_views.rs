//! Feature View REST API Endpoints
//!
//! - `POST /featureview` - Create a feature view from a query
//! - `GET /featureview` - List feature views of the store
//! - `GET /featureview/:name` - Every version of one feature view
//! - `GET|PUT|DELETE /featureview/:name/version/:version`
//! - `GET /featureview/:name/version/:version/query` - Stored query
//! - `GET /featureview/:name/version/:version/query/batch` - Query restricted
//!   to an event-time window
//!
//! All paths are relative to `/api/v1/featurestores/:fs_id`.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query as QueryParams, State,
    },
    http::StatusCode,
    Json,
};
use featurelens_core::{planner::TimeWindow, query::codec, FeatureView, Query};
use featurelens_registry::{FeatureViewRequest, FeatureViewUpdate};
use serde::Deserialize;
use tracing::{info, instrument};

use super::{timed, ListResponse};
use crate::{error::AppError, metrics, state::AppState};

// ============================================================================
// Request Types
// ============================================================================

/// Request to create a feature view
///
/// `query` is kept as raw JSON so structural problems in it surface as
/// query errors rather than as an unreadable body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeatureViewRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    pub query: serde_json::Value,
}

/// Event-time bounds of a batch query, epoch milliseconds
#[derive(Debug, Default, Deserialize)]
pub struct BatchQueryParams {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

/// Create a feature view
///
/// `POST /api/v1/featurestores/:fs_id/featureview`
///
/// ```json
/// {
///   "name": "fv",
///   "query": {
///     "leftFeatureGroup": {"id": 13},
///     "leftFeatures": [{"name": "a_testfeature"}],
///     "joins": [{"query": {"leftFeatureGroup": {"id": 14}, "leftFeatures": [{"name": "b_testfeature1"}]}}]
///   }
/// }
/// ```
///
/// Responds `201` with the stored view, its query fully resolved.
#[instrument(skip(state, body))]
pub async fn create_feature_view(
    State(state): State<AppState>,
    Path(fs_id): Path<i64>,
    body: Result<Json<CreateFeatureViewRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FeatureView>), AppError> {
    let Json(body) = body?;
    let registry = state.registry();

    let query = codec::from_value(body.query, &registry.settings().resolve.limits)?;
    let request = FeatureViewRequest {
        name: body.name,
        version: body.version,
        description: body.description,
        query,
    };

    let view = timed(
        "create_feature_view",
        registry.create_feature_view(fs_id, request),
    )
    .await?;

    info!(
        name = %view.name,
        version = view.version,
        features = view.features.len(),
        "Feature view created"
    );
    Ok((StatusCode::CREATED, Json(view)))
}

/// List every feature view of a store
///
/// `GET /api/v1/featurestores/:fs_id/featureview`
pub async fn list_feature_views(
    State(state): State<AppState>,
    Path(fs_id): Path<i64>,
) -> Result<Json<ListResponse<FeatureView>>, AppError> {
    let views = timed("list_feature_views", state.registry().list_feature_views(fs_id)).await?;
    Ok(Json(views.into()))
}

/// All versions of a feature view; 404 when the name is unknown
#[instrument(skip(state))]
pub async fn get_feature_view_versions(
    State(state): State<AppState>,
    Path((fs_id, name)): Path<(i64, String)>,
) -> Result<Json<ListResponse<FeatureView>>, AppError> {
    let views = timed(
        "get_feature_views",
        state.registry().get_feature_views(fs_id, &name),
    )
    .await?;
    Ok(Json(views.into()))
}

#[instrument(skip(state))]
pub async fn get_feature_view(
    State(state): State<AppState>,
    Path((fs_id, name, version)): Path<(i64, String, i32)>,
) -> Result<Json<FeatureView>, AppError> {
    let view = timed(
        "get_feature_view",
        state.registry().get_feature_view(fs_id, &name, version),
    )
    .await?;
    Ok(Json(view))
}

/// Update the description of a feature view
///
/// `PUT /api/v1/featurestores/:fs_id/featureview/:name/version/:version`
#[instrument(skip(state, body))]
pub async fn update_feature_view(
    State(state): State<AppState>,
    Path((fs_id, name, version)): Path<(i64, String, i32)>,
    body: Result<Json<FeatureViewUpdate>, JsonRejection>,
) -> Result<Json<FeatureView>, AppError> {
    let Json(update) = body?;
    let view = timed(
        "update_feature_view",
        state
            .registry()
            .update_feature_view(fs_id, &name, version, update),
    )
    .await?;
    Ok(Json(view))
}

/// Delete a feature view and every training dataset built from it
#[instrument(skip(state))]
pub async fn delete_feature_view(
    State(state): State<AppState>,
    Path((fs_id, name, version)): Path<(i64, String, i32)>,
) -> Result<StatusCode, AppError> {
    timed(
        "delete_feature_view",
        state.registry().delete_feature_view(fs_id, &name, version),
    )
    .await?;

    info!(name = %name, version, "Feature view deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// The query a feature view was created with
#[instrument(skip(state))]
pub async fn get_query(
    State(state): State<AppState>,
    Path((fs_id, name, version)): Path<(i64, String, i32)>,
) -> Result<Json<Query>, AppError> {
    let query = timed(
        "get_query",
        state.registry().get_query(fs_id, &name, version),
    )
    .await?;
    Ok(Json(query))
}

/// Batch query over an event-time window
///
/// `GET .../query/batch?start_time=1234&end_time=4321`
///
/// Either bound may be omitted; without both the stored query is returned
/// unchanged.
#[instrument(skip(state, params))]
pub async fn get_batch_query(
    State(state): State<AppState>,
    Path((fs_id, name, version)): Path<(i64, String, i32)>,
    params: Result<QueryParams<BatchQueryParams>, QueryRejection>,
) -> Result<Json<Query>, AppError> {
    let QueryParams(params) = params?;
    let window = TimeWindow::new(params.start_time, params.end_time)?;
    let bounded = !window.is_unbounded();

    let query = timed(
        "get_batch_query",
        state
            .registry()
            .get_batch_query(fs_id, &name, version, window),
    )
    .await?;

    metrics::record_batch_query(bounded);
    Ok(Json(query))
}
