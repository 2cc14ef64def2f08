//! E2E tests for the training dataset REST API
//!
//! - Create on the default HopsFS connector and on external connectors
//! - Split, data format, version and statistics validation
//! - Metadata updates that ignore immutable fields
//! - Data deletes that keep metadata, against a local data store

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use featurelens_registry::FeatureRegistry;
use featurelens_server::{api, data_store::LocalDataStore, state::AppState};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

// ============================================================================
// Test Helper Functions
// ============================================================================

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

struct TestApp {
    app: Router,
    fs_id: i64,
    data: Option<TempDir>,
}

impl TestApp {
    fn store_uri(&self) -> String {
        format!("/api/v1/featurestores/{}", self.fs_id)
    }

    /// Training datasets of feature view `fv` version 1
    fn datasets_uri(&self) -> String {
        format!("{}/featureview/fv/version/1/trainingdatasets", self.store_uri())
    }

    async fn create_dataset(&self, body: Value) -> (StatusCode, Value) {
        send(&self.app, "POST", &self.datasets_uri(), Some(body)).await
    }

    /// Local directory of `fv_1_<version>` on the default HopsFS connector,
    /// created with one data file
    fn materialize(&self, version: i32) -> PathBuf {
        let root = self.data.as_ref().expect("app has no data store").path();
        let dir = root
            .join("Projects/demo/demo_Training_Datasets")
            .join(format!("fv_1_{}", version));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("part-00000.csv"), b"a_testfeature,a_testfeature1\n1,0.5\n").unwrap();
        dir
    }

    async fn add_connector(&self, body: Value) {
        let (status, _) = send(
            &self.app,
            "POST",
            &format!("{}/storageconnectors", self.store_uri()),
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
}

/// App with `demo_featurestore` and feature view `fv` version 1 over two groups
async fn create_test_app() -> TestApp {
    create_test_app_with(AppState::in_memory().await.unwrap(), None).await
}

/// Same fixture, with HopsFS data kept under a temporary directory
async fn create_test_app_with_data_store() -> TestApp {
    let data = TempDir::new().unwrap();
    let registry = FeatureRegistry::in_memory()
        .await
        .unwrap()
        .with_data_store(Arc::new(LocalDataStore::new(data.path())));
    create_test_app_with(AppState::new(registry, "sqlite"), Some(data)).await
}

async fn create_test_app_with(state: AppState, data: Option<TempDir>) -> TestApp {
    let app = api::router(state);

    let (_, store) = send(
        &app,
        "POST",
        "/api/v1/featurestores",
        Some(json!({"name": "demo_featurestore"})),
    )
    .await;
    let fs_id = store["id"].as_i64().unwrap();
    let groups_uri = format!("/api/v1/featurestores/{}/featuregroups", fs_id);

    let (_, fg_a) = send(
        &app,
        "POST",
        &groups_uri,
        Some(json!({
            "name": "test_fg_a",
            "eventTime": "ts",
            "features": [
                {"name": "a_testfeature", "type": "int", "primary": true},
                {"name": "a_testfeature1", "type": "double"},
                {"name": "ts", "type": "timestamp"}
            ]
        })),
    )
    .await;
    let (_, fg_b) = send(
        &app,
        "POST",
        &groups_uri,
        Some(json!({
            "name": "test_fg_b",
            "features": [
                {"name": "a_testfeature", "type": "int", "primary": true},
                {"name": "b_testfeature1", "type": "string"}
            ]
        })),
    )
    .await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/featurestores/{}/featureview", fs_id),
        Some(json!({
            "name": "fv",
            "query": {
                "leftFeatureGroup": {"id": fg_a["id"]},
                "leftFeatures": [{"name": "a_testfeature"}, {"name": "a_testfeature1"}],
                "joins": [{"query": {
                    "leftFeatureGroup": {"id": fg_b["id"]},
                    "leftFeatures": [{"name": "b_testfeature1"}]
                }}]
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    TestApp { app, fs_id, data }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_e2e_training_dataset_lifecycle() {
    let t = create_test_app().await;

    // When: Create with splits on the default connector
    let (status, td) = t
        .create_dataset(json!({
            "dataFormat": "parquet",
            "description": "first",
            "seed": 42,
            "splits": [
                {"name": "train", "percentage": 0.8},
                {"name": "test", "percentage": "0.2"}
            ],
            "trainSplit": "train"
        }))
        .await;

    // Then: HopsFS dataset under the project's training dataset directory
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(td["name"], "fv_1");
    assert_eq!(td["version"], 1);
    assert_eq!(td["dataFormat"], "parquet");
    assert_eq!(td["trainingDatasetType"], "HOPSFS_TRAINING_DATASET");
    assert_eq!(td["storageConnector"]["name"], "demo_Training_Datasets");
    assert_eq!(
        td["location"],
        "hopsfs://namenode.service.consul:8020/Projects/demo/demo_Training_Datasets/fv_1_1"
    );
    assert_eq!(td["splits"][1]["percentage"], 0.2);

    // When: A second one without a version
    let (_, second) = t.create_dataset(json!({"dataFormat": "csv"})).await;
    assert_eq!(second["version"], 2);

    let (status, list) = send(&t.app, "GET", &t.datasets_uri(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 2);

    // When: Delete version 1
    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/version/1", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Then: It is gone
    let (status, body) = send(
        &t.app,
        "GET",
        &format!("{}/version/1", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270012);

    // When: Delete all remaining
    let (status, _) = send(&t.app, "DELETE", &t.datasets_uri(), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, list) = send(&t.app, "GET", &t.datasets_uri(), None).await;
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn test_e2e_metadata_update_ignores_immutable_fields() {
    let t = create_test_app().await;
    t.add_connector(json!({
        "name": "s3_conn",
        "storageConnectorType": "S3",
        "bucket": "bucket"
    }))
    .await;
    t.create_dataset(json!({"dataFormat": "parquet"})).await;

    let (status, updated) = send(
        &t.app,
        "PUT",
        &format!("{}/version/1", t.datasets_uri()),
        Some(json!({
            "description": "changed",
            "name": "renamed",
            "dataFormat": "csv",
            "storageConnector": {"name": "s3_conn"}
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["description"], "changed");
    assert_eq!(updated["name"], "fv_1");
    assert_eq!(updated["dataFormat"], "parquet");
    assert_eq!(updated["storageConnector"]["name"], "demo_Training_Datasets");

    let (_, reloaded) = send(
        &t.app,
        "GET",
        &format!("{}/version/1", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(reloaded, updated);
}

#[tokio::test]
async fn test_e2e_statistics_config() {
    let t = create_test_app().await;
    t.create_dataset(json!({"dataFormat": "parquet"})).await;
    let uri = format!("{}/version/1/statistics/config", t.datasets_uri());

    let (status, td) = send(
        &t.app,
        "PUT",
        &uri,
        Some(json!({"statisticsConfig": {"enabled": true, "histograms": true, "columns": ["a_testfeature1"]}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(td["statisticsConfig"]["histograms"], true);
    assert_eq!(td["statisticsConfig"]["columns"], json!(["a_testfeature1"]));

    let (status, body) = send(
        &t.app,
        "PUT",
        &uri,
        Some(json!({"statisticsConfig": {"columns": ["nope"]}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270108);
}

#[tokio::test]
async fn test_e2e_statistics_config_update_keeps_sent_values() {
    let t = create_test_app().await;
    let (status, _) = t
        .create_dataset(json!({
            "dataFormat": "parquet",
            "statisticsConfig": {
                "enabled": false,
                "histograms": false,
                "correlations": false,
                "exactUniqueness": false,
                "columns": ["a_testfeature"]
            }
        }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let uri = format!("{}/version/1/statistics/config", t.datasets_uri());

    // When: The dataset shape is sent back with a new config
    let (status, td) = send(
        &t.app,
        "PUT",
        &uri,
        Some(json!({
            "name": "fv_1",
            "version": 1,
            "statisticsConfig": {
                "enabled": false,
                "histograms": false,
                "correlations": false,
                "exactUniqueness": false,
                "columns": ["a_testfeature1"]
            }
        })),
    )
    .await;

    // Then: It is applied as sent
    assert_eq!(status, StatusCode::OK);
    assert_eq!(td["statisticsConfig"]["enabled"], false);
    assert_eq!(td["statisticsConfig"]["columns"], json!(["a_testfeature1"]));

    // When: The config is sent bare or with unknown fields
    let rejected = vec![
        json!({"enabled": true, "columns": []}),
        json!({"statisticsConfig": {"enabled": true, "colums": []}}),
    ];
    for body in rejected {
        let (status, err) = send(&t.app, "PUT", &uri, Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(err["errorCode"], 270002, "body: {}", body);
    }

    // Then: The stored config is untouched
    let (_, reloaded) = send(
        &t.app,
        "GET",
        &format!("{}/version/1", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(reloaded["statisticsConfig"]["enabled"], false);
    assert_eq!(reloaded["statisticsConfig"]["columns"], json!(["a_testfeature1"]));
}

// ============================================================================
// External Connectors
// ============================================================================

#[tokio::test]
async fn test_e2e_external_connector_location() {
    let t = create_test_app().await;
    t.add_connector(json!({
        "name": "s3_conn",
        "storageConnectorType": "S3",
        "bucket": "bucket",
        "path": "/data/"
    }))
    .await;

    let (status, td) = t
        .create_dataset(json!({
            "dataFormat": "csv",
            "storageConnector": {"name": "s3_conn"},
            "location": "extra"
        }))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(td["trainingDatasetType"], "EXTERNAL_TRAINING_DATASET");
    assert_eq!(td["location"], "s3://bucket/data/extra/fv_1_1");
}

#[tokio::test]
async fn test_e2e_unsupported_connector_is_rejected_first() {
    let t = create_test_app().await;
    t.add_connector(json!({
        "name": "kafka_conn",
        "storageConnectorType": "KAFKA",
        "bootstrapServers": "broker:9092"
    }))
    .await;

    // Everything else in the request is wrong too
    let (status, body) = t
        .create_dataset(json!({
            "storageConnector": {"name": "kafka_conn"},
            "version": 0,
            "splits": [{"name": "Bad Split", "percentage": "x"}]
        }))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270043);
}

#[tokio::test]
async fn test_e2e_missing_connectors() {
    let t = create_test_app().await;

    let (status, body) = t
        .create_dataset(json!({"dataFormat": "csv", "storageConnector": {"name": "nope"}}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270042);

    let (status, body) = t
        .create_dataset(json!({
            "dataFormat": "csv",
            "trainingDatasetType": "EXTERNAL_TRAINING_DATASET"
        }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270042);
}

// ============================================================================
// Request Validation
// ============================================================================

#[tokio::test]
async fn test_e2e_split_errors() {
    let t = create_test_app().await;

    let cases = vec![
        (json!([{"name": "train", "percentage": "abc"}]), 270099),
        (json!([{"name": "train", "percentage": -0.5}]), 270099),
        (json!([{"name": "Train Split", "percentage": 0.5}]), 270098),
        (
            json!([{"name": "train", "percentage": 0.5}, {"name": "train", "percentage": 0.5}]),
            270106,
        ),
    ];

    for (splits, code) in cases {
        let (status, body) = t
            .create_dataset(json!({"dataFormat": "csv", "splits": splits}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "splits: {}", splits);
        assert_eq!(body["errorCode"], code, "splits: {}", splits);
    }

    let (status, body) = t
        .create_dataset(json!({
            "dataFormat": "csv",
            "splits": [{"name": "train", "percentage": 1.0}],
            "trainSplit": "validation"
        }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270107);

    // Nothing was stored
    let (_, list) = send(&t.app, "GET", &t.datasets_uri(), None).await;
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn test_e2e_format_and_version_errors() {
    let t = create_test_app().await;

    let (status, body) = t.create_dataset(json!({"description": "no format"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270057);

    let (status, body) = t.create_dataset(json!({"dataFormat": "xlsx"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270057);

    let (status, body) = t
        .create_dataset(json!({"dataFormat": "csv", "version": 0}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270058);

    let (status, body) = t
        .create_dataset(json!({"dataFormat": "csv", "eventStartTime": 10, "eventEndTime": 1}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270097);
}

#[tokio::test]
async fn test_e2e_explicit_version_conflict() {
    let t = create_test_app().await;

    let body = json!({"dataFormat": "csv", "version": 5});
    let (status, _) = t.create_dataset(body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, err) = t.create_dataset(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errorCode"], 270089);
}

// ============================================================================
// Data Deletes
// ============================================================================

#[tokio::test]
async fn test_e2e_data_delete_keeps_metadata() {
    let t = create_test_app().await;
    t.create_dataset(json!({"dataFormat": "csv"})).await;
    t.create_dataset(json!({"dataFormat": "csv"})).await;

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/version/1/data", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/data", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, list) = send(&t.app, "GET", &t.datasets_uri(), None).await;
    assert_eq!(list["count"], 2);
}

#[tokio::test]
async fn test_e2e_deleting_view_removes_datasets() {
    let t = create_test_app().await;
    t.create_dataset(json!({"dataFormat": "csv"})).await;

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/featureview/fv/version/1", t.store_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&t.app, "GET", &t.datasets_uri(), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270181);
}

#[tokio::test]
async fn test_e2e_data_deletes_remove_files() {
    let t = create_test_app_with_data_store().await;
    t.create_dataset(json!({"dataFormat": "csv"})).await;
    t.create_dataset(json!({"dataFormat": "csv"})).await;
    let first = t.materialize(1);
    let second = t.materialize(2);

    // When: Delete the data of version 1
    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/version/1/data", t.datasets_uri()),
        None,
    )
    .await;

    // Then: Only its directory is gone
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!first.exists());
    assert!(second.join("part-00000.csv").exists());

    // When: Delete the data of all versions
    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/data", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!second.exists());

    // Then: Metadata of both is still there
    let (_, list) = send(&t.app, "GET", &t.datasets_uri(), None).await;
    assert_eq!(list["count"], 2);
    let (status, td) = send(
        &t.app,
        "GET",
        &format!("{}/version/2", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        td["location"],
        "hopsfs://namenode.service.consul:8020/Projects/demo/demo_Training_Datasets/fv_1_2"
    );
}

#[tokio::test]
async fn test_e2e_full_deletes_remove_files() {
    let t = create_test_app_with_data_store().await;
    t.create_dataset(json!({"dataFormat": "csv"})).await;
    t.create_dataset(json!({"dataFormat": "csv"})).await;
    let first = t.materialize(1);
    let second = t.materialize(2);

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/version/1", t.datasets_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!first.exists());
    assert!(second.exists());

    // Deleting the view cascades to the remaining dataset and its data
    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/featureview/fv/version/1", t.store_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!second.exists());
}

#[tokio::test]
async fn test_e2e_location_outside_connector_is_rejected() {
    let t = create_test_app_with_data_store().await;

    for location in ["../../../../outside", "inner/../../other"] {
        let (status, body) = t
            .create_dataset(json!({"dataFormat": "csv", "location": location}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "location: {}", location);
        assert_eq!(body["errorCode"], 270002, "location: {}", location);
    }

    // Nothing was stored, and the view can still be deleted
    let (_, list) = send(&t.app, "GET", &t.datasets_uri(), None).await;
    assert_eq!(list["count"], 0);

    let (status, td) = t
        .create_dataset(json!({"dataFormat": "csv", "location": "nested/dir"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        td["location"],
        "hopsfs://namenode.service.consul:8020/Projects/demo/demo_Training_Datasets/nested/dir/fv_1_1"
    );

    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/featureview/fv/version/1", t.store_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
