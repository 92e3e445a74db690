//! HTTP API tests driven through the router

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use costscope::analytics::BillingAnalytics;
use costscope::api::{create_router, AppState};
use costscope::cache::EntityNameCache;
use costscope::config::QueryConfig;
use costscope::db::StaticExecutor;
use costscope::decode::ScalarValue;
use costscope::lookup::NoopLookup;
use costscope::query::{FilterResolver, QueryCompiler, QueryKind};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router(executor: Arc<StaticExecutor>) -> Router {
    let analytics = BillingAnalytics::new(
        QueryCompiler::new(QueryConfig::default(), FilterResolver::default()),
        executor,
        Arc::new(EntityNameCache::new(100, Arc::new(NoopLookup))),
    );
    create_router(AppState {
        analytics: Arc::new(analytics),
    })
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post(router: Router, path: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    read_json(router.oneshot(request).await.unwrap()).await
}

fn cluster_request() -> Value {
    json!({
        "account_id": "acc",
        "filters": [
            {"type": "start_time", "operator": "AFTER", "value": 1_704_067_200_000_i64},
            {"type": "end_time", "operator": "BEFORE", "value": 1_704_931_199_999_i64}
        ],
        "aggregations": [{"operation": "SUM", "column": "billingamount"}],
        "group_by": [{"entity": "cluster"}]
    })
}

#[tokio::test]
async fn test_health_reports_database() {
    let executor = Arc::new(StaticExecutor::new());
    executor.set_available(false);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = router(executor).oneshot(request).await.unwrap();
    let (status, body) = read_json(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], false);
}

#[tokio::test]
async fn test_explain_returns_sql_without_executing() {
    let executor = Arc::new(StaticExecutor::new());
    let (status, body) = post(
        router(executor.clone()),
        "/api/v1/billing/explain",
        cluster_request(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "aggregate");
    assert!(body["sql"].as_str().unwrap().contains("GROUP BY t0.clusterid"));
    assert_eq!(body["fields"], json!(["SUM", "CLUSTER_ID"]));
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn test_entities_round_trip() {
    let executor = Arc::new(StaticExecutor::new());
    executor.push_rows(
        QueryKind::Aggregate,
        vec![vec![ScalarValue::Double(42.5), ScalarValue::Text("c1".into())]],
    );

    let (status, body) = post(router(executor), "/api/v1/billing/entities", cluster_request()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"][0]["metrics"]["cost"], 42.5);
    assert_eq!(body["rows"][0]["keys"]["clusterid"]["id"], "c1");
}

#[tokio::test]
async fn test_unsupported_aggregation_is_bad_request() {
    let mut request = cluster_request();
    request["aggregations"] = json!([{"operation": "MAX", "column": "billingamount"}]);

    let response = router(Arc::new(StaticExecutor::new()))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/billing/entities")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(request.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(
        String::from_utf8_lossy(&bytes),
        "Unsupported aggregation: MAX(billingamount)"
    );
}

#[tokio::test]
async fn test_unavailable_store_is_service_unavailable() {
    let executor = Arc::new(StaticExecutor::new());
    executor.set_available(false);

    let (status, _) = post(
        router(executor.clone()),
        "/api/v1/billing/trend",
        cluster_request(),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn test_sunburst_accepts_add_root() {
    let executor = Arc::new(StaticExecutor::new());
    executor.push_rows(
        QueryKind::Aggregate,
        vec![vec![
            ScalarValue::Double(10.0),
            ScalarValue::Text("c1".into()),
            ScalarValue::Text("K8S".into()),
        ]],
    );

    let mut request = cluster_request();
    request["add_root"] = json!(true);
    let (status, body) = post(router(executor), "/api/v1/billing/sunburst", request).await;

    assert_eq!(status, StatusCode::OK);
    let nodes = body["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0]["id"], "ROOT_PARENT_ID");
    assert_eq!(nodes[1]["cluster_type"], "K8S");
}
