//! Training Dataset REST API Endpoints
//!
//! Relative to `/api/v1/featurestores/:fs_id/featureview/:name/version/:version`:
//!
//! - `POST /trainingdatasets` - Plan and register a training dataset
//! - `GET /trainingdatasets` - List training datasets of the view
//! - `DELETE /trainingdatasets` - Delete all of them, data and metadata
//! - `DELETE /trainingdatasets/data` - Delete their data, keep metadata
//! - `GET|PUT|DELETE /trainingdatasets/version/:td_version`
//! - `DELETE /trainingdatasets/version/:td_version/data`
//! - `PUT /trainingdatasets/version/:td_version/statistics/config`

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use featurelens_core::training::{
    StatisticsConfigUpdate, TrainingDataset, TrainingDatasetRequest, TrainingDatasetUpdate,
};
use tracing::{info, instrument};

use super::{timed, ListResponse};
use crate::{error::AppError, metrics, state::AppState};

type ViewPath = Path<(i64, String, i32)>;
type DatasetPath = Path<(i64, String, i32, i32)>;

/// Create a training dataset
///
/// `POST .../trainingdatasets`
///
/// ```json
/// {
///   "dataFormat": "parquet",
///   "splits": [{"name": "train", "percentage": 0.8}, {"name": "test", "percentage": 0.2}],
///   "trainSplit": "train"
/// }
/// ```
///
/// Without `storageConnector` the dataset goes to the store's default
/// HopsFS training connector.
#[instrument(skip(state, body))]
pub async fn create_training_dataset(
    State(state): State<AppState>,
    Path((fs_id, name, version)): ViewPath,
    body: Result<Json<TrainingDatasetRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TrainingDataset>), AppError> {
    let Json(request) = body?;
    let dataset = timed(
        "create_training_dataset",
        state
            .registry()
            .create_training_dataset(fs_id, &name, version, request),
    )
    .await?;

    metrics::record_training_dataset_created(
        dataset.training_dataset_type.as_str(),
        dataset.data_format.as_str(),
    );
    info!(
        name = %dataset.name,
        version = dataset.version,
        location = %dataset.location,
        "Training dataset created"
    );
    Ok((StatusCode::CREATED, Json(dataset)))
}

pub async fn list_training_datasets(
    State(state): State<AppState>,
    Path((fs_id, name, version)): ViewPath,
) -> Result<Json<ListResponse<TrainingDataset>>, AppError> {
    let datasets = timed(
        "list_training_datasets",
        state
            .registry()
            .list_training_datasets(fs_id, &name, version),
    )
    .await?;
    Ok(Json(datasets.into()))
}

#[instrument(skip(state))]
pub async fn get_training_dataset(
    State(state): State<AppState>,
    Path((fs_id, name, version, td_version)): DatasetPath,
) -> Result<Json<TrainingDataset>, AppError> {
    let dataset = timed(
        "get_training_dataset",
        state
            .registry()
            .get_training_dataset(fs_id, &name, version, td_version),
    )
    .await?;
    Ok(Json(dataset))
}

/// Update training dataset metadata
///
/// Only `description` is applied. Other fields, such as `name`,
/// `storageConnector` or `dataFormat`, are accepted and ignored.
#[instrument(skip(state, body))]
pub async fn update_training_dataset(
    State(state): State<AppState>,
    Path((fs_id, name, version, td_version)): DatasetPath,
    body: Result<Json<TrainingDatasetUpdate>, JsonRejection>,
) -> Result<Json<TrainingDataset>, AppError> {
    let Json(update) = body?;
    let dataset = timed(
        "update_training_dataset",
        state
            .registry()
            .update_training_dataset(fs_id, &name, version, td_version, update),
    )
    .await?;
    Ok(Json(dataset))
}

/// Replace the statistics configuration
///
/// ```json
/// {"statisticsConfig": {"enabled": false, "columns": ["a_testfeature"]}}
/// ```
///
/// Every listed column must be a feature of the view. A body without
/// `statisticsConfig` is rejected rather than read as the defaults.
#[instrument(skip(state, body))]
pub async fn update_statistics_config(
    State(state): State<AppState>,
    Path((fs_id, name, version, td_version)): DatasetPath,
    body: Result<Json<StatisticsConfigUpdate>, JsonRejection>,
) -> Result<Json<TrainingDataset>, AppError> {
    let Json(StatisticsConfigUpdate {
        statistics_config: config,
    }) = body?;
    let dataset = timed(
        "update_statistics_config",
        state
            .registry()
            .update_statistics_config(fs_id, &name, version, td_version, config),
    )
    .await?;
    Ok(Json(dataset))
}

#[instrument(skip(state))]
pub async fn delete_training_dataset(
    State(state): State<AppState>,
    Path((fs_id, name, version, td_version)): DatasetPath,
) -> Result<StatusCode, AppError> {
    timed(
        "delete_training_dataset",
        state
            .registry()
            .delete_training_dataset(fs_id, &name, version, td_version),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete_training_datasets(
    State(state): State<AppState>,
    Path((fs_id, name, version)): ViewPath,
) -> Result<StatusCode, AppError> {
    let deleted = timed(
        "delete_training_datasets",
        state
            .registry()
            .delete_training_datasets(fs_id, &name, version),
    )
    .await?;

    info!(name = %name, version, deleted, "Training datasets deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Delete the data of one training dataset; its metadata stays
#[instrument(skip(state))]
pub async fn delete_training_dataset_data(
    State(state): State<AppState>,
    Path((fs_id, name, version, td_version)): DatasetPath,
) -> Result<StatusCode, AppError> {
    timed(
        "delete_training_dataset_data",
        state
            .registry()
            .delete_training_dataset_data(fs_id, &name, version, td_version),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn delete_training_datasets_data(
    State(state): State<AppState>,
    Path((fs_id, name, version)): ViewPath,
) -> Result<StatusCode, AppError> {
    timed(
        "delete_training_datasets_data",
        state
            .registry()
            .delete_training_datasets_data(fs_id, &name, version),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
