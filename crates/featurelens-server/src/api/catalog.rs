//! Catalog REST API Endpoints
//!
//! Feature stores, feature groups and storage connectors. Feature views are
//! resolved against what is registered here.
//!
//! - `POST /api/v1/featurestores` - Create a feature store
//! - `GET /api/v1/featurestores` - List feature stores
//! - `GET /api/v1/featurestores/:fs_id` - Get a feature store
//! - `POST /api/v1/featurestores/:fs_id/featuregroups` - Register a feature group
//! - `GET /api/v1/featurestores/:fs_id/featuregroups[/:fg_id]`
//! - `POST /api/v1/featurestores/:fs_id/storageconnectors` - Register a connector
//! - `GET /api/v1/featurestores/:fs_id/storageconnectors[/:connector]`

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use featurelens_core::{FeatureGroup, FeatureStore, StorageConnector};
use serde::Deserialize;
use tracing::{info, instrument};

use super::{timed, ListResponse};
use crate::{error::AppError, state::AppState};

// ============================================================================
// Request Types
// ============================================================================

/// Request to create a feature store
#[derive(Debug, Deserialize)]
pub struct CreateFeatureStoreRequest {
    pub name: String,
}

// ============================================================================
// Feature Stores
// ============================================================================

/// Create a feature store together with its default training dataset connector
///
/// `POST /api/v1/featurestores`
#[instrument(skip(state, body))]
pub async fn create_feature_store(
    State(state): State<AppState>,
    body: Result<Json<CreateFeatureStoreRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FeatureStore>), AppError> {
    let Json(request) = body?;
    let store = timed(
        "create_feature_store",
        state.registry().create_feature_store(&request.name),
    )
    .await?;

    info!(id = store.id, name = %store.name, "Created feature store");
    Ok((StatusCode::CREATED, Json(store)))
}

pub async fn list_feature_stores(
    State(state): State<AppState>,
) -> Result<Json<ListResponse<FeatureStore>>, AppError> {
    let stores = timed("list_feature_stores", state.registry().list_feature_stores()).await?;
    Ok(Json(stores.into()))
}

pub async fn get_feature_store(
    State(state): State<AppState>,
    Path(fs_id): Path<i64>,
) -> Result<Json<FeatureStore>, AppError> {
    let store = timed("get_feature_store", state.registry().get_feature_store(fs_id)).await?;
    Ok(Json(store))
}

// ============================================================================
// Feature Groups
// ============================================================================

/// Register a feature group
///
/// `POST /api/v1/featurestores/:fs_id/featuregroups`
///
/// ```json
/// {
///   "name": "test_fg_a",
///   "version": 1,
///   "eventTime": "ts",
///   "features": [{"name": "a_testfeature", "type": "int", "primary": true}]
/// }
/// ```
#[instrument(skip(state, body))]
pub async fn create_feature_group(
    State(state): State<AppState>,
    Path(fs_id): Path<i64>,
    body: Result<Json<FeatureGroup>, JsonRejection>,
) -> Result<(StatusCode, Json<FeatureGroup>), AppError> {
    let Json(group) = body?;
    let group = timed(
        "create_feature_group",
        state.registry().create_feature_group(fs_id, group),
    )
    .await?;

    info!(id = group.id, name = %group.name, version = group.version, "Registered feature group");
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_feature_groups(
    State(state): State<AppState>,
    Path(fs_id): Path<i64>,
) -> Result<Json<ListResponse<FeatureGroup>>, AppError> {
    let groups = timed("list_feature_groups", state.registry().list_feature_groups(fs_id)).await?;
    Ok(Json(groups.into()))
}

pub async fn get_feature_group(
    State(state): State<AppState>,
    Path((fs_id, fg_id)): Path<(i64, i64)>,
) -> Result<Json<FeatureGroup>, AppError> {
    let group = timed(
        "get_feature_group",
        state.registry().get_feature_group(fs_id, fg_id),
    )
    .await?;
    Ok(Json(group))
}

// ============================================================================
// Storage Connectors
// ============================================================================

/// Register a storage connector
///
/// `POST /api/v1/featurestores/:fs_id/storageconnectors`
///
/// ```json
/// {"name": "s3_data", "storageConnectorType": "S3", "bucket": "bucket", "path": "data"}
/// ```
#[instrument(skip(state, body))]
pub async fn create_storage_connector(
    State(state): State<AppState>,
    Path(fs_id): Path<i64>,
    body: Result<Json<StorageConnector>, JsonRejection>,
) -> Result<(StatusCode, Json<StorageConnector>), AppError> {
    let Json(connector) = body?;
    let connector = timed(
        "create_storage_connector",
        state.registry().create_storage_connector(fs_id, connector),
    )
    .await?;

    info!(
        id = connector.id,
        name = %connector.name,
        kind = connector.kind.type_name(),
        "Registered storage connector"
    );
    Ok((StatusCode::CREATED, Json(connector)))
}

pub async fn list_storage_connectors(
    State(state): State<AppState>,
    Path(fs_id): Path<i64>,
) -> Result<Json<ListResponse<StorageConnector>>, AppError> {
    let connectors = timed(
        "list_storage_connectors",
        state.registry().list_storage_connectors(fs_id),
    )
    .await?;
    Ok(Json(connectors.into()))
}

pub async fn get_storage_connector(
    State(state): State<AppState>,
    Path((fs_id, connector)): Path<(i64, String)>,
) -> Result<Json<StorageConnector>, AppError> {
    let connector = timed(
        "get_storage_connector",
        state.registry().get_storage_connector(fs_id, &connector),
    )
    .await?;
    Ok(Json(connector))
}
