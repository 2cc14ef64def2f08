//! E2E tests for the feature view REST API
//!
//! Tests the full HTTP path against an in-memory registry:
//! - Catalog setup through the API
//! - Feature view create / get / list / update / delete
//! - Stored and batch queries
//! - Error codes for rejected queries

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use featurelens_server::{api, state::AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

// ============================================================================
// Test Helper Functions
// ============================================================================

struct TestApp {
    app: Router,
    fs_id: i64,
    fg_a: i64,
    fg_b: i64,
}

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

fn feature(name: &str, feature_type: &str, primary: bool) -> Value {
    json!({"name": name, "type": feature_type, "primary": primary})
}

/// App with `demo_featurestore` and two feature groups sharing `a_testfeature`
async fn create_test_app() -> TestApp {
    let state = AppState::in_memory().await.unwrap();
    let app = api::router(state);

    let (status, store) = send(
        &app,
        "POST",
        "/api/v1/featurestores",
        Some(json!({"name": "demo_featurestore"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let fs_id = store["id"].as_i64().unwrap();

    let (status, fg_a) = send(
        &app,
        "POST",
        &format!("/api/v1/featurestores/{}/featuregroups", fs_id),
        Some(json!({
            "name": "test_fg_a",
            "eventTime": "ts",
            "features": [
                feature("a_testfeature", "int", true),
                feature("a_testfeature1", "double", false),
                feature("ts", "timestamp", false)
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, fg_b) = send(
        &app,
        "POST",
        &format!("/api/v1/featurestores/{}/featuregroups", fs_id),
        Some(json!({
            "name": "test_fg_b",
            "features": [
                feature("a_testfeature", "int", true),
                feature("b_testfeature1", "string", false)
            ]
        })),
    )
    .await;

    TestApp {
        app,
        fs_id,
        fg_a: fg_a["id"].as_i64().unwrap(),
        fg_b: fg_b["id"].as_i64().unwrap(),
    }
}

impl TestApp {
    fn views_uri(&self) -> String {
        format!("/api/v1/featurestores/{}/featureview", self.fs_id)
    }

    fn joined_query(&self) -> Value {
        json!({
            "leftFeatureGroup": {"id": self.fg_a},
            "leftFeatures": [{"name": "a_testfeature"}, {"name": "a_testfeature1"}],
            "joins": [{
                "query": {
                    "leftFeatureGroup": {"id": self.fg_b},
                    "leftFeatures": [{"name": "b_testfeature1"}]
                }
            }]
        })
    }

    async fn create_view(&self, body: Value) -> (StatusCode, Value) {
        send(&self.app, "POST", &self.views_uri(), Some(body)).await
    }
}

fn leaf(name: &str, condition: &str, value: Value) -> Value {
    json!({"feature": {"name": name}, "condition": condition, "value": value})
}

// ============================================================================
// Catalog
// ============================================================================

#[tokio::test]
async fn test_e2e_catalog_endpoints() {
    let t = create_test_app().await;

    let (status, stores) = send(&t.app, "GET", "/api/v1/featurestores", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stores["count"], 1);

    let (status, groups) = send(
        &t.app,
        "GET",
        &format!("/api/v1/featurestores/{}/featuregroups", t.fs_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(groups["count"], 2);

    // The default training dataset connector comes with the store
    let (status, connector) = send(
        &t.app,
        "GET",
        &format!(
            "/api/v1/featurestores/{}/storageconnectors/demo_Training_Datasets",
            t.fs_id
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(connector["storageConnectorType"], "HOPSFS");

    let (status, body) = send(&t.app, "GET", "/api/v1/featurestores/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270001);
}

#[tokio::test]
async fn test_e2e_unknown_feature_group_lookup() {
    let t = create_test_app().await;

    let (status, body) = send(
        &t.app,
        "GET",
        &format!("/api/v1/featurestores/{}/featuregroups/9999", t.fs_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270009);
}

// ============================================================================
// Feature View Lifecycle
// ============================================================================

#[tokio::test]
async fn test_e2e_feature_view_lifecycle() {
    let t = create_test_app().await;

    // When: Create a feature view
    let (status, view) = t
        .create_view(json!({
            "name": "sales_view",
            "description": "joined view",
            "query": t.joined_query()
        }))
        .await;

    // Then: 201 with resolved query and output features
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(view["name"], "sales_view");
    assert_eq!(view["version"], 1);
    assert_eq!(
        view["features"],
        json!(["a_testfeature", "a_testfeature1", "b_testfeature1"])
    );
    assert_eq!(view["query"]["leftFeatureGroup"]["name"], "test_fg_a");
    assert_eq!(view["query"]["leftFeatures"][1]["type"], "double");

    // When: Create again under the same name
    let (_, second) = t
        .create_view(json!({"name": "sales_view", "query": t.joined_query()}))
        .await;
    assert_eq!(second["version"], 2);

    // Then: Both versions are listed
    let (status, versions) = send(
        &t.app,
        "GET",
        &format!("{}/sales_view", t.views_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(versions["count"], 2);

    // When: Update the description
    let (status, updated) = send(
        &t.app,
        "PUT",
        &format!("{}/sales_view/version/1", t.views_uri()),
        Some(json!({"description": "changed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["description"], "changed");

    // Then: The stored query is the one returned at creation
    let (status, query) = send(
        &t.app,
        "GET",
        &format!("{}/sales_view/version/1/query", t.views_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(query, view["query"]);

    // When: Delete version 1
    let (status, _) = send(
        &t.app,
        "DELETE",
        &format!("{}/sales_view/version/1", t.views_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Then: It is gone, version 2 remains
    let (status, body) = send(
        &t.app,
        "GET",
        &format!("{}/sales_view/version/1", t.views_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270181);

    let (_, all) = send(&t.app, "GET", &t.views_uri(), None).await;
    assert_eq!(all["count"], 1);
}

#[tokio::test]
async fn test_e2e_unknown_name_lists_nothing() {
    let t = create_test_app().await;

    let (status, body) = send(&t.app, "GET", &format!("{}/nope", t.views_uri()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270181);
    assert_eq!(body["errorMsg"], "Feature view not found");
}

#[tokio::test]
async fn test_e2e_generated_name_and_version_conflict() {
    let t = create_test_app().await;

    let (status, view) = t.create_view(json!({"query": t.joined_query()})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(view["name"]
        .as_str()
        .unwrap()
        .starts_with("feature_view_"));

    let body = json!({"name": "fv", "version": 3, "query": t.joined_query()});
    let (status, _) = t.create_view(body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, err) = t.create_view(body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["errorCode"], 270089);
}

// ============================================================================
// Batch Queries
// ============================================================================

#[tokio::test]
async fn test_e2e_batch_query_nests_window_under_existing_filter() {
    let t = create_test_app().await;

    let mut query = t.joined_query();
    query["filter"] = json!({
        "type": "SINGLE",
        "leftFilter": leaf("a_testfeature1", "GREATER_THAN", json!("0"))
    });
    let (status, _) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, batch) = send(
        &t.app,
        "GET",
        &format!(
            "{}/fv/version/1/query/batch?start_time=1234&end_time=4321",
            t.views_uri()
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // AND(AND(existing, ts >= start), ts <= end)
    let filter = &batch["filter"];
    assert_eq!(filter["type"], "AND");
    assert_eq!(filter["leftLogic"]["type"], "AND");
    assert_eq!(
        filter["leftLogic"]["leftLogic"]["leftFilter"]["feature"]["name"],
        "a_testfeature1"
    );
    let lower = &filter["leftLogic"]["rightLogic"]["leftFilter"];
    assert_eq!(lower["feature"]["name"], "ts");
    assert_eq!(lower["condition"], "GREATER_THAN_OR_EQUAL");
    assert_eq!(lower["value"], "1234");
    let upper = &filter["rightLogic"]["leftFilter"];
    assert_eq!(upper["condition"], "LESS_THAN_OR_EQUAL");
    assert_eq!(upper["value"], "4321");
}

#[tokio::test]
async fn test_e2e_batch_query_without_bounds_is_stored_query() {
    let t = create_test_app().await;
    let (_, view) = t
        .create_view(json!({"name": "fv", "query": t.joined_query()}))
        .await;

    let (status, batch) = send(
        &t.app,
        "GET",
        &format!("{}/fv/version/1/query/batch", t.views_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch, view["query"]);
}

#[tokio::test]
async fn test_e2e_batch_query_rejections() {
    let t = create_test_app().await;

    // Inverted window
    t.create_view(json!({"name": "fv", "query": t.joined_query()}))
        .await;
    let (status, body) = send(
        &t.app,
        "GET",
        &format!(
            "{}/fv/version/1/query/batch?start_time=10&end_time=1",
            t.views_uri()
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270097);

    // Anchor without event time
    let (_, _) = t
        .create_view(json!({
            "name": "no_time",
            "query": {
                "leftFeatureGroup": {"id": t.fg_b},
                "leftFeatures": [{"name": "b_testfeature1"}]
            }
        }))
        .await;
    let (status, body) = send(
        &t.app,
        "GET",
        &format!("{}/no_time/version/1/query/batch?start_time=1", t.views_uri()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270096);

    // Unparseable bound
    let (status, body) = send(
        &t.app,
        "GET",
        &format!(
            "{}/fv/version/1/query/batch?start_time=yesterday",
            t.views_uri()
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270002);
}

// ============================================================================
// Rejected Queries
// ============================================================================

#[tokio::test]
async fn test_e2e_malformed_predicate_trees() {
    let t = create_test_app().await;

    let bad_filters = vec![
        // AND with only one side
        json!({"type": "AND", "leftFilter": leaf("a_testfeature1", "EQUALS", json!("1"))}),
        // SINGLE with a right side
        json!({
            "type": "SINGLE",
            "leftFilter": leaf("a_testfeature1", "EQUALS", json!("1")),
            "rightFilter": leaf("a_testfeature1", "EQUALS", json!("2"))
        }),
        // Both a filter and a logic node on one side
        json!({
            "type": "OR",
            "leftFilter": leaf("a_testfeature1", "EQUALS", json!("1")),
            "leftLogic": {"type": "SINGLE", "leftFilter": leaf("a_testfeature1", "EQUALS", json!("1"))},
            "rightFilter": leaf("a_testfeature1", "EQUALS", json!("2"))
        }),
        // Unknown logic type
        json!({
            "type": "XOR",
            "leftFilter": leaf("a_testfeature1", "EQUALS", json!("1")),
            "rightFilter": leaf("a_testfeature1", "EQUALS", json!("2"))
        }),
    ];

    for filter in bad_filters {
        let mut query = t.joined_query();
        query["filter"] = filter.clone();
        let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "filter: {}", filter);
        assert_eq!(body["errorCode"], 270090, "filter: {}", filter);
    }

    // Nothing was stored
    let (_, all) = send(&t.app, "GET", &t.views_uri(), None).await;
    assert_eq!(all["count"], 0);
}

#[tokio::test]
async fn test_e2e_condition_and_value_errors() {
    let t = create_test_app().await;

    let mut query = t.joined_query();
    query["filter"] = json!({"type": "SINGLE", "leftFilter": leaf("a_testfeature1", "ROUGHLY", json!("1"))});
    let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270091);

    let mut query = t.joined_query();
    query["filter"] = json!({"type": "SINGLE", "leftFilter": leaf("a_testfeature1", "EQUALS", json!(1))});
    let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270092);
}

#[tokio::test]
async fn test_e2e_join_errors() {
    let t = create_test_app().await;

    // Joined query without a feature group
    let query = json!({
        "leftFeatureGroup": {"id": t.fg_a},
        "leftFeatures": [{"name": "a_testfeature"}],
        "joins": [{"query": {"leftFeatures": [{"name": "b_testfeature1"}]}}]
    });
    let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270093);

    // The same join twice
    let join = json!({
        "query": {"leftFeatureGroup": {"id": t.fg_b}, "leftFeatures": [{"name": "b_testfeature1"}]}
    });
    let query = json!({
        "leftFeatureGroup": {"id": t.fg_a},
        "leftFeatures": [{"name": "a_testfeature"}],
        "joins": [join.clone(), join]
    });
    let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270094);
}

#[tokio::test]
async fn test_e2e_query_too_deep() {
    let t = create_test_app().await;

    // Ten levels of nested joins, above the default limit of eight
    let mut nested = json!({"leftFeatureGroup": {"id": t.fg_b}, "leftFeatures": []});
    for _ in 0..10 {
        nested = json!({
            "leftFeatureGroup": {"id": t.fg_b},
            "leftFeatures": [],
            "joins": [{"query": nested}]
        });
    }
    let query = json!({
        "leftFeatureGroup": {"id": t.fg_a},
        "leftFeatures": [{"name": "a_testfeature"}],
        "joins": [{"query": nested}]
    });

    let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270095);
}

#[tokio::test]
async fn test_e2e_unknown_references() {
    let t = create_test_app().await;

    let query = json!({
        "leftFeatureGroup": {"id": t.fg_a},
        "leftFeatures": [{"name": "does_not_exist"}]
    });
    let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270010);

    let query = json!({
        "leftFeatureGroup": {"id": 9999},
        "leftFeatures": [{"name": "a_testfeature"}]
    });
    let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["errorCode"], 270009);
}

#[tokio::test]
async fn test_e2e_ambiguous_filter_feature() {
    let t = create_test_app().await;

    let (_, fg_c) = send(
        &t.app,
        "POST",
        &format!("/api/v1/featurestores/{}/featuregroups", t.fs_id),
        Some(json!({
            "name": "test_fg_c",
            "features": [
                feature("a_testfeature", "int", true),
                feature("b_testfeature1", "string", false),
                feature("c_testfeature1", "string", false)
            ]
        })),
    )
    .await;

    // b_testfeature1 lives in both joined groups and neither is prefixed
    let query = json!({
        "leftFeatureGroup": {"id": t.fg_a},
        "leftFeatures": [{"name": "a_testfeature"}],
        "joins": [
            {"query": {"leftFeatureGroup": {"id": t.fg_b}, "leftFeatures": [{"name": "b_testfeature1"}]}},
            {"query": {"leftFeatureGroup": {"id": fg_c["id"]}, "leftFeatures": [{"name": "c_testfeature1"}]}}
        ],
        "filter": {"type": "SINGLE", "leftFilter": leaf("b_testfeature1", "EQUALS", json!("x"))}
    });
    let (status, body) = t.create_view(json!({"name": "fv", "query": query})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270011);
}

#[tokio::test]
async fn test_e2e_invalid_name_and_version() {
    let t = create_test_app().await;

    let (status, body) = t
        .create_view(json!({"name": "Bad Name", "query": t.joined_query()}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270038);

    let (status, body) = t
        .create_view(json!({"name": "fv", "version": -1, "query": t.joined_query()}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], 270058);
}

#[tokio::test]
async fn test_e2e_unreadable_body() {
    let t = create_test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri(t.views_uri())
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["errorCode"], 270002);
}
