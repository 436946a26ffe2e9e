//! Adaptive request router binary.
//!
//! Startup order: configuration, metrics recorder, persistent store (lazy,
//! optional), registry seeding, background loops (prober, resource sampler,
//! store sink), listener last. Exit code 1 on bad configuration or a port
//! that cannot be bound; 0 on graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use adaptive_balancer::config;
use adaptive_balancer::dispatch::Dispatcher;
use adaptive_balancer::health::{HealthEvent, HealthProber};
use adaptive_balancer::http::{AppState, HttpServer};
use adaptive_balancer::observability;
use adaptive_balancer::registry::{BackendId, Registry};
use adaptive_balancer::store::{self, LogEvent, Store};
use adaptive_balancer::strategy;
use adaptive_balancer::telemetry::{Collector, ResourceSampler};
use adaptive_balancer::Shutdown;

#[tokio::main]
async fn main() {
    observability::logging::init();

    let config_path = std::env::var("CONFIG_PATH").ok().map(PathBuf::from);
    let config = match config::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "configuration invalid");
            std::process::exit(1);
        }
    };
    tracing::info!(
        strategy = config.strategy.kind.as_str(),
        port = config.listener.port,
        seed_backends = config.backends.len(),
        "configuration loaded"
    );

    let prometheus = observability::metrics::install();

    let store = if config.store.database_url.is_empty() {
        None
    } else {
        match Store::connect(&config.store) {
            Ok(store) => Some(Arc::new(store)),
            Err(error) => {
                tracing::warn!(%error, "store disabled: DATABASE_URL not usable");
                None
            }
        }
    };
    if let Some(store) = &store {
        store.ensure_schema().await;
    }

    let registry = Arc::new(Registry::new());
    seed_registry(&registry, store.as_deref(), &config).await;
    if registry.is_empty() {
        tracing::warn!("no backends configured; dispatch returns 503 until registration");
    }

    let telemetry = Arc::new(Collector::new(
        Duration::from_secs(config.telemetry.window_secs),
        Duration::from_secs(config.telemetry.sample_stale_secs),
    ));
    let selection = strategy::build_strategy(&config.strategy, telemetry.clone());

    let shutdown = Arc::new(Shutdown::new());
    let (log_tx, log_rx) = mpsc::unbounded_channel();
    match store.clone() {
        Some(sink_store) => {
            tokio::spawn(store::run_sink(sink_store, log_rx, shutdown.subscribe()));
        }
        // no store: the log stream is silently dropped
        None => drop(log_rx),
    }

    let (health_tx, mut health_rx) = mpsc::unbounded_channel::<HealthEvent>();
    let bridge_tx = log_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = health_rx.recv().await {
            let _ = bridge_tx.send(LogEvent::Transition {
                backend_id: event.backend_id,
                endpoint: event.endpoint,
                alive: event.alive,
            });
        }
    });

    let prober = HealthProber::new(registry.clone(), config.health.clone(), health_tx);
    tokio::spawn(prober.run(shutdown.subscribe()));

    let sampler = ResourceSampler::new(registry.clone(), telemetry.clone(), &config.telemetry);
    tokio::spawn(sampler.run(shutdown.subscribe()));

    let request_timeout = Duration::from_secs(config.dispatch.forward_timeout_secs);
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        telemetry.clone(),
        selection,
        log_tx,
        request_timeout,
    ));

    let state = AppState {
        registry,
        telemetry,
        dispatcher,
        prometheus,
        store,
    };
    let server = HttpServer::new(state, request_timeout);

    let bind = format!("{}:{}", config.listener.host, config.listener.port);
    let listener = match TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, bind = %bind, "cannot bind port");
            std::process::exit(1);
        }
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        signal_shutdown.trigger();
    });

    if let Err(error) = server.run(listener, shutdown.subscribe()).await {
        tracing::error!(%error, "server error");
        std::process::exit(1);
    }
    tracing::info!("shutdown complete");
}

/// Seed the registry: store rows are authoritative for ids and
/// weight/capacity; environment entries fill the gaps with defaults of 1.
async fn seed_registry(
    registry: &Registry,
    store: Option<&Store>,
    config: &adaptive_balancer::RouterConfig,
) {
    if let Some(store) = store {
        for row in store.load_backends().await.unwrap_or_default() {
            let id = row.id.max(1) as BackendId;
            let weight = row.weight.max(1) as u32;
            let capacity = row.capacity.max(1) as u32;
            if let Err(error) = registry.register_with_id(id, &row.endpoint, weight, capacity) {
                tracing::warn!(%error, endpoint = %row.endpoint, "skipping stored backend");
            }
        }
    }

    for seed in &config.backends {
        let stored_id = match store {
            Some(store) => {
                store
                    .upsert_backend(&seed.endpoint, seed.weight, seed.capacity)
                    .await
            }
            None => None,
        };
        let result = match stored_id {
            Some(id) => {
                registry.register_with_id(id.max(1) as BackendId, &seed.endpoint, seed.weight, seed.capacity)
            }
            None => registry.register(&seed.endpoint, seed.weight, seed.capacity),
        };
        if let Err(error) = result {
            tracing::warn!(%error, endpoint = %seed.endpoint, "skipping seed backend");
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(error) => {
            tracing::error!(%error, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
