//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the axum Router with all handlers
//! - Wire up middleware (tracing, timeout, panic recovery)
//! - Serve with graceful shutdown
//!
//! All components are constructed by the caller and injected through
//! [`AppState`]; tests compose their own.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;
use crate::http::handlers;
use crate::registry::Registry;
use crate::store::Store;
use crate::telemetry::Collector;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub telemetry: Arc<Collector>,
    pub dispatcher: Arc<Dispatcher>,
    pub prometheus: Option<PrometheusHandle>,
    pub store: Option<Arc<Store>>,
}

/// HTTP server for the router.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState, request_timeout: Duration) -> Self {
        Self {
            router: Self::build_router(state, request_timeout),
        }
    }

    /// Build the axum router with all middleware layers.
    fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/request", post(handlers::dispatch_request))
            .route("/broadcast", post(handlers::broadcast_request))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            .route(
                "/servers",
                get(handlers::list_servers).post(handlers::register_server),
            )
            .route("/servers/{id}", axum::routing::delete(handlers::deregister_server))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(TraceLayer::new_for_http())
    }

    /// Expose the router for in-process tests.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// A panicking handler becomes a logged 500; the process keeps serving.
fn handle_panic(
    err: Box<dyn std::any::Any + Send + 'static>,
) -> axum::http::Response<axum::body::Body> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = detail, "handler panicked");

    axum::http::Response::builder()
        .status(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        .body(axum::body::Body::from("internal error"))
        .unwrap_or_default()
}
