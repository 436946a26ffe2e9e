//! End-to-end selection scenarios against mock backends.

mod common;

use std::time::Duration;

use adaptive_balancer::config::schema::{StrategyConfig, StrategyKind};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A mock backend answering every request with a fixed body.
async fn named_backend(name: &'static str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200).set_body_string(name))
        .mount(&server)
        .await;
    server
}

fn strategy(kind: StrategyKind) -> StrategyConfig {
    let mut config = StrategyConfig::default();
    config.kind = kind;
    config
}

fn ml_strategy(scorer_uri: String) -> StrategyConfig {
    let mut config = StrategyConfig::default();
    config.kind = StrategyKind::Ml;
    config.predictive.scorer_endpoint = scorer_uri;
    // generous budget so a timing-out scorer burns all three attempts
    config.predictive.overall_deadline_ms = 1000;
    config
}

#[tokio::test]
async fn round_robin_rotates_exactly() {
    let a = named_backend("A").await;
    let b = named_backend("B").await;
    let c = named_backend("C").await;

    let router = common::spawn_router(
        &strategy(StrategyKind::RoundRobin),
        &[(&a.uri(), 1, 1), (&b.uri(), 1, 1), (&c.uri(), 1, 1)],
    )
    .await;

    let client = common::http_client();
    let mut order = Vec::new();
    for _ in 0..6 {
        let response = client.post(router.url("/request")).send().await.unwrap();
        assert_eq!(response.status(), 200);
        order.push(response.text().await.unwrap());
    }
    assert_eq!(order, vec!["A", "B", "C", "A", "B", "C"]);
}

#[tokio::test]
async fn weighted_round_robin_matches_weights() {
    let a = named_backend("A").await;
    let b = named_backend("B").await;
    let c = named_backend("C").await;

    let router = common::spawn_router(
        &strategy(StrategyKind::WeightedRoundRobin),
        &[(&a.uri(), 3, 1), (&b.uri(), 1, 1), (&c.uri(), 2, 1)],
    )
    .await;

    let client = common::http_client();
    let mut bodies = Vec::new();
    for _ in 0..12 {
        let response = client.post(router.url("/request")).send().await.unwrap();
        bodies.push(response.text().await.unwrap());
    }

    let count = |name| bodies.iter().filter(|b| b.as_str() == name).count();
    assert_eq!(count("A"), 6);
    assert_eq!(count("B"), 2);
    assert_eq!(count("C"), 4);
    // smooth: the heaviest backend never serves three in a row
    assert!(bodies.windows(3).all(|w| !(w[0] == w[1] && w[1] == w[2])));
}

#[tokio::test]
async fn least_connections_picks_idle_backend() {
    let a = named_backend("A").await;
    let b = named_backend("B").await;
    let c = named_backend("C").await;

    let router = common::spawn_router(
        &strategy(StrategyKind::LeastConnections),
        &[(&a.uri(), 1, 4), (&b.uri(), 1, 4), (&c.uri(), 1, 4)],
    )
    .await;

    // A carries 2 in-flight forwards, C carries 1, B is idle
    let snapshot = router.registry.snapshot();
    let _a1 = router.registry.reserve(snapshot[0].id).unwrap();
    let _a2 = router.registry.reserve(snapshot[0].id).unwrap();
    let _c1 = router.registry.reserve(snapshot[2].id).unwrap();

    let client = common::http_client();
    let response = client.post(router.url("/request")).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "B");
}

#[tokio::test]
async fn predictive_picks_lowest_score_and_caches() {
    let a = named_backend("A").await;
    let b = named_backend("B").await;
    let c = named_backend("C").await;

    let scorer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "scores": [0.9, 0.1, 0.5]
        })))
        .expect(1)
        .mount(&scorer)
        .await;

    let router = common::spawn_router(
        &ml_strategy(scorer.uri()),
        &[(&a.uri(), 1, 4), (&b.uri(), 1, 4), (&c.uri(), 1, 4)],
    )
    .await;

    let client = common::http_client();
    let first = client.post(router.url("/request")).send().await.unwrap();
    assert_eq!(first.text().await.unwrap(), "B");

    // identical quantised features: served from cache, zero scorer calls
    let second = client.post(router.url("/request")).send().await.unwrap();
    assert_eq!(second.text().await.unwrap(), "B");
    scorer.verify().await;
}

#[tokio::test]
async fn predictive_timeout_trips_breaker_and_falls_back() {
    let a = named_backend("A").await;
    let b = named_backend("B").await;

    let scorer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "scores": [0.1, 0.9] }))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&scorer)
        .await;

    let router = common::spawn_router(
        &ml_strategy(scorer.uri()),
        &[(&a.uri(), 1, 4), (&b.uri(), 1, 4)],
    )
    .await;

    let client = common::http_client();
    // scorer times out three times; the fallback still serves the request
    let response = client.post(router.url("/request")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(scorer.received_requests().await.unwrap().len(), 3);

    // circuit is open: the next request must not touch the scorer
    let response = client.post(router.url("/request")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(scorer.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn transport_failure_demotes_and_records() {
    let addr = common::start_closing_backend().await;
    let endpoint = format!("http://{}", addr);

    let router = common::spawn_router(&strategy(StrategyKind::RoundRobin), &[(&endpoint, 1, 1)])
        .await;

    let client = common::http_client();
    let response = client
        .post(router.url("/request"))
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    let snapshot = router.registry.snapshot();
    assert!(!snapshot[0].alive, "backend must be demoted");
    assert_eq!(snapshot[0].in_flight, 0, "reservation must be released");
    // exactly one failure outcome in the window
    assert_eq!(router.telemetry.success_rate(snapshot[0].id), 0.0);
}

#[tokio::test]
async fn transport_failure_retries_one_alternative() {
    let dead = common::start_closing_backend().await;
    let dead_endpoint = format!("http://{}", dead);
    let alive = named_backend("B").await;

    let router = common::spawn_router(
        &strategy(StrategyKind::RoundRobin),
        &[(&dead_endpoint, 1, 1), (&alive.uri(), 1, 1)],
    )
    .await;

    let client = common::http_client();
    let response = client.post(router.url("/request")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "B");

    let snapshot = router.registry.snapshot();
    assert!(!snapshot[0].alive);
    assert!(snapshot[1].alive);
}

#[tokio::test]
async fn no_live_backend_returns_503() {
    let a = named_backend("A").await;
    let router =
        common::spawn_router(&strategy(StrategyKind::RoundRobin), &[(&a.uri(), 1, 1)]).await;

    let id = router.registry.snapshot()[0].id;
    router.registry.mark_alive(id, false).unwrap();

    let client = common::http_client();
    let response = client.post(router.url("/request")).send().await.unwrap();
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn correlation_tag_does_not_steer_selection() {
    let a = named_backend("A").await;
    let b = named_backend("B").await;

    let router = common::spawn_router(
        &strategy(StrategyKind::RoundRobin),
        &[(&a.uri(), 1, 1), (&b.uri(), 1, 1)],
    )
    .await;

    let client = common::http_client();
    // server_id points at B, but round-robin starts at A regardless
    let response = client
        .post(router.url("/request?server_id=2"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "A");
}
