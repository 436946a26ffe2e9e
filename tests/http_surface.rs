//! Public HTTP surface contracts.

mod common;

use adaptive_balancer::config::schema::{StrategyConfig, StrategyKind};
use serde_json::Value;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn named_backend(name: &'static str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200).set_body_string(name))
        .mount(&server)
        .await;
    server
}

fn round_robin() -> StrategyConfig {
    let mut config = StrategyConfig::default();
    config.kind = StrategyKind::RoundRobin;
    config
}

#[tokio::test]
async fn health_reports_both_lists() {
    let a = named_backend("A").await;
    let b = named_backend("B").await;
    let router = common::spawn_router(&round_robin(), &[(&a.uri(), 1, 1), (&b.uri(), 1, 1)]).await;

    let snapshot = router.registry.snapshot();
    router.registry.mark_alive(snapshot[1].id, false).unwrap();

    let client = common::http_client();
    let response = client.get(router.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "load balancer running");
    assert_eq!(body["healthy_servers"].as_array().unwrap().len(), 1);
    assert_eq!(body["unhealthy_servers"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn health_is_503_with_no_alive_backend() {
    let a = named_backend("A").await;
    let router = common::spawn_router(&round_robin(), &[(&a.uri(), 1, 1)]).await;
    let id = router.registry.snapshot()[0].id;
    router.registry.mark_alive(id, false).unwrap();

    let client = common::http_client();
    let response = client.get(router.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn servers_lists_snapshot_with_success_rate() {
    let a = named_backend("A").await;
    let router = common::spawn_router(&round_robin(), &[(&a.uri(), 2, 3)]).await;

    let client = common::http_client();
    let response = client.get(router.url("/servers")).send().await.unwrap();
    let body: Value = response.json().await.unwrap();
    let servers = body.as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["weight"], 2);
    assert_eq!(servers[0]["capacity"], 3);
    assert_eq!(servers[0]["alive"], true);
    assert_eq!(servers[0]["in_flight"], 0);
    // idle backends read as fully successful
    assert_eq!(servers[0]["success_rate"], 1.0);
}

#[tokio::test]
async fn register_then_deregister_round_trip() {
    let router = common::spawn_router(&round_robin(), &[]).await;
    let client = common::http_client();

    let response = client
        .post(router.url("/servers"))
        .json(&serde_json::json!({ "endpoint": "http://127.0.0.1:5000", "weight": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let id = response.json::<Value>().await.unwrap()["id"].as_u64().unwrap();

    let listed: Value = client
        .get(router.url("/servers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let deleted = client
        .delete(router.url(&format!("/servers/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);

    // deregistration is idempotent: the second delete reports gone
    let again = client
        .delete(router.url(&format!("/servers/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn register_rejects_schemeless_endpoint() {
    let router = common::spawn_router(&round_robin(), &[]).await;
    let client = common::http_client();

    let response = client
        .post(router.url("/servers"))
        .json(&serde_json::json!({ "endpoint": "127.0.0.1:5000" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn broadcast_aggregates_responses_and_failures() {
    let a = named_backend("A").await;
    let b = named_backend("B").await;
    let dead = common::start_closing_backend().await;
    let dead_endpoint = format!("http://{}", dead);

    let router = common::spawn_router(
        &round_robin(),
        &[(&a.uri(), 1, 1), (&b.uri(), 1, 1), (&dead_endpoint, 1, 1)],
    )
    .await;

    let client = common::http_client();
    let response = client
        .post(router.url("/broadcast"))
        .body("fan-out")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["responses"].as_array().unwrap().len(), 2);
    assert_eq!(body["failures"].as_array().unwrap().len(), 1);

    // broadcast never reserves capacity
    assert!(router.registry.snapshot().iter().all(|b| b.in_flight == 0));
}

#[tokio::test]
async fn broadcast_without_backends_is_503() {
    let router = common::spawn_router(&round_robin(), &[]).await;
    let client = common::http_client();
    let response = client.post(router.url("/broadcast")).send().await.unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn metrics_endpoint_serves_exposition_format() {
    let router = common::spawn_router(&round_robin(), &[]).await;
    let client = common::http_client();

    let response = client.get(router.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
}
