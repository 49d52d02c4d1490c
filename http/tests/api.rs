use axum::{
    body::{
        to_bytes,
        Body,
    },
    http::{
        Request,
        StatusCode,
    },
    Router,
};
use node_metrics_core::{
    IngestGate,
    LeaderStatus,
    ManualClock,
    MetricStore,
    NoopSink,
    QueryService,
    StaticOracle,
};
use node_metrics_http::create_router;
use pretty_assertions::assert_eq;
use serde_json::{
    json,
    Value,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tower::util::ServiceExt;

struct TestContext {
    app: Router,
    store: MetricStore,
    clock: ManualClock,
}

fn build_test_context(leader: bool) -> TestContext {
    let clock = ManualClock::new("2025-01-01T12:00:00Z".parse().unwrap());
    let store = MetricStore::new(Duration::from_secs(300), Arc::new(clock.clone()));
    let leader = LeaderStatus::new(Arc::new(StaticOracle(leader)), Duration::from_secs(1));
    let gate = IngestGate::new(leader, store.clone(), Arc::new(NoopSink), Duration::from_secs(1));
    let app = create_router(gate, QueryService::new(store.clone()), "manager-1");

    TestContext { app, store, clock }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn post(app: &Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let request = Request::post(uri).body(body.into()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(app, Request::get(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn ingest_then_query() {
    let ctx = build_test_context(true);

    let (status, body) = post(&ctx.app, "/metrics", json!({ "node": "n1", "cpu": "bad", "mem": 50 }).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "node": "n1" }));

    let (status, nodes) = get(&ctx.app, "/nodes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(nodes["n1"]["cpu"], json!(0.0));
    assert_eq!(nodes["n1"]["mem"], json!(50.0));
    assert_eq!(nodes["n1"]["status"], json!("unknown"));

    ctx.clock.advance(chrono::TimeDelta::minutes(1));
    let (_, history) = get(&ctx.app, "/history?node=n1").await;
    assert_eq!(history["n1"].as_array().unwrap().len(), 1);

    ctx.clock.advance(chrono::TimeDelta::minutes(5));
    let (_, history) = get(&ctx.app, "/history?node=n1").await;
    assert_eq!(history, json!({}));
    let (_, nodes) = get(&ctx.app, "/nodes").await;
    assert_eq!(nodes, json!({}));
}

#[tokio::test]
async fn snapshot_holds_the_latest_sample_per_node() {
    let ctx = build_test_context(true);
    for i in 1..=3 {
        for node in ["n1", "n2"] {
            post(&ctx.app, "/metrics", json!({ "node": node, "cpu": i }).to_string()).await;
        }
        ctx.clock.advance(chrono::TimeDelta::seconds(1));
    }

    let (_, nodes) = get(&ctx.app, "/nodes").await;
    let nodes = nodes.as_object().unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes["n1"]["cpu"], json!(3.0));
    assert_eq!(nodes["n2"]["cpu"], json!(3.0));

    let (_, history) = get(&ctx.app, "/history").await;
    assert_eq!(history["n1"].as_array().unwrap().len(), 3);
    assert_eq!(history["n2"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn follower_rejects_writes() {
    let ctx = build_test_context(false);

    let (status, body) = post(&ctx.app, "/metrics", json!({ "node": "n1" }).to_string()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "this node is not leader", "reason": "unauthorized" }));
    assert_eq!(ctx.store.source_count(), 0);

    let (status, _) = post(&ctx.app, "/containers", json!({ "node": "n1", "containers": [] }).to_string()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = post(&ctx.app, "/metrics", "{ nope").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], json!("unauthorized"));
    let (status, _) = post(&ctx.app, "/containers", "{ nope").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get(&ctx.app, "/nodes").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_bodies_are_client_errors() {
    let ctx = build_test_context(true);

    let (status, body) = post(&ctx.app, "/metrics", "{ nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], json!("invalid_payload"));

    let (status, body) = post(&ctx.app, "/metrics", "[1, 2, 3]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], json!("invalid_payload"));
    assert_eq!(ctx.store.source_count(), 0);
}

#[tokio::test]
async fn malformed_containers_on_metrics_keep_the_sample() {
    let ctx = build_test_context(true);

    let (status, body) = post(
        &ctx.app,
        "/metrics",
        json!({ "node": "n1", "cpu": 5, "containers": "oops" }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "node": "n1" }));
    assert_eq!(ctx.store.source_count(), 1);

    let (_, nodes) = get(&ctx.app, "/nodes").await;
    assert_eq!(nodes["n1"]["cpu"], json!(5.0));
    assert_eq!(nodes["n1"].get("containers"), None);

    let (status, _) = post(&ctx.app, "/containers", json!({ "node": "n1", "containers": "oops" }).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn containers_are_merged_into_the_snapshot() {
    let ctx = build_test_context(true);

    post(&ctx.app, "/metrics", json!({ "node": "n1", "cpu": 1 }).to_string()).await;
    let (status, _) = post(
        &ctx.app,
        "/containers",
        json!({ "node": "n1", "containers": [{ "name": "web", "cpu": "2.5" }] }).to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, nodes) = get(&ctx.app, "/nodes").await;
    assert_eq!(nodes["n1"]["containers"][0]["name"], json!("web"));
    assert_eq!(nodes["n1"]["containers"][0]["cpu"], json!(2.5));
}

#[tokio::test]
async fn banner_health_and_leader() {
    let ctx = build_test_context(true);

    let (status, body) = send(&ctx.app, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "node-metrics collector running on manager-1");

    let (status, body) = send(&ctx.app, Request::get("/healthz").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");

    let (_, leader) = get(&ctx.app, "/leader").await;
    assert_eq!(leader, json!({ "hostname": "manager-1", "leader": false }));

    post(&ctx.app, "/metrics", json!({ "node": "n1" }).to_string()).await;
    let (_, leader) = get(&ctx.app, "/leader").await;
    assert_eq!(leader["leader"], json!(true));
}
