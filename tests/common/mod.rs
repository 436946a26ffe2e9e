//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use adaptive_balancer::config::schema::StrategyConfig;
use adaptive_balancer::dispatch::Dispatcher;
use adaptive_balancer::http::{AppState, HttpServer};
use adaptive_balancer::registry::Registry;
use adaptive_balancer::strategy;
use adaptive_balancer::telemetry::Collector;

/// A router spawned on an ephemeral port, plus handles to its components so
/// tests can manipulate registry and telemetry state directly.
pub struct TestRouter {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub telemetry: Arc<Collector>,
}

impl TestRouter {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Build every component explicitly and serve the router on port 0.
///
/// `endpoints` are `(endpoint, weight, capacity)` triples registered before
/// the server starts. No prober, sampler, or store runs; tests drive state
/// through the returned handles.
pub async fn spawn_router(
    strategy_config: &StrategyConfig,
    endpoints: &[(&str, u32, u32)],
) -> TestRouter {
    let registry = Arc::new(Registry::new());
    for (endpoint, weight, capacity) in endpoints {
        registry.register(endpoint, *weight, *capacity).unwrap();
    }

    let telemetry = Arc::new(Collector::new(
        Duration::from_secs(300),
        Duration::from_secs(30),
    ));
    let selection = strategy::build_strategy(strategy_config, telemetry.clone());

    // durable history is dropped in tests: no sink holds the receiver
    let (log_tx, _log_rx) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        telemetry.clone(),
        selection,
        log_tx,
        Duration::from_secs(5),
    ));

    let state = AppState {
        registry: registry.clone(),
        telemetry: telemetry.clone(),
        dispatcher,
        prometheus: None,
        store: None,
    };
    let router = HttpServer::new(state, Duration::from_secs(10)).into_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestRouter {
        addr,
        registry,
        telemetry,
    }
}

/// Start a backend that accepts TCP connections and closes them without
/// writing a byte. Every forward to it is a transport failure.
#[allow(dead_code)]
pub async fn start_closing_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        // read the request head so the client commits, then drop
                        let mut buf = [0u8; 512];
                        let _ = socket.read(&mut buf).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// A plain reqwest client without connection pooling, so each request sees
/// the backend's current state.
#[allow(dead_code)]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
