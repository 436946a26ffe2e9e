//! End-to-end forwarding: select, reserve, forward, record, release.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::uri::Authority;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri};
use http_body_util::BodyExt;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::registry::{BackendId, BackendView, Registry, RegistryError};
use crate::store::LogEvent;
use crate::strategy::Strategy;
use crate::telemetry::Collector;

/// Headers that must not cross the proxy hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Dispatch failures surfaced to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No backend was alive at snapshot time (→ 503).
    #[error("no live backend available")]
    NoLiveBackend,

    /// The strategy returned none on a non-empty candidate set, i.e. every
    /// candidate was rejected by admission (→ 503).
    #[error("selection failed: all candidates rejected")]
    SelectionFailed,

    /// Transport-level failure talking to the chosen backend (→ 502).
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),
}

#[derive(Debug)]
enum ForwardError {
    /// Deregistered between snapshot and reserve; nothing was recorded.
    Gone,
    /// Connection-level failure or deadline; recorded and demoted.
    Transport(String),
}

/// One backend's result within a broadcast.
#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub server: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastFailure {
    pub server: String,
    pub error: String,
}

/// Aggregated broadcast result.
#[derive(Debug, Serialize, Default)]
pub struct BroadcastOutcome {
    pub responses: Vec<BroadcastResponse>,
    pub failures: Vec<BroadcastFailure>,
}

/// Forwards requests to strategy-selected backends and records outcomes.
pub struct Dispatcher {
    registry: Arc<Registry>,
    telemetry: Arc<Collector>,
    strategy: Arc<dyn Strategy>,
    client: Client<HttpConnector, Body>,
    log: mpsc::UnboundedSender<LogEvent>,
    forward_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        telemetry: Arc<Collector>,
        strategy: Arc<dyn Strategy>,
        log: mpsc::UnboundedSender<LogEvent>,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            telemetry,
            strategy,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            log,
            forward_timeout,
        }
    }

    /// Forward one request to one selected backend.
    ///
    /// The body is already buffered by the caller so a single retry against
    /// an alternative backend stays possible after a transport failure.
    pub async fn dispatch(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
        tag: Option<i64>,
    ) -> Result<Response<Body>, DispatchError> {
        let candidates: Vec<BackendView> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|b| b.alive)
            .collect();
        if candidates.is_empty() {
            return Err(DispatchError::NoLiveBackend);
        }

        let chosen = self
            .strategy
            .select(&candidates)
            .await
            .ok_or(DispatchError::SelectionFailed)?;

        match self
            .forward(chosen, &method, path_and_query, headers, &body, tag)
            .await
        {
            Ok(response) => Ok(response),
            Err(failure) => {
                let reason = match &failure {
                    ForwardError::Gone => "backend deregistered".to_string(),
                    ForwardError::Transport(reason) => reason.clone(),
                };

                // the only permitted retry: one alternative backend
                let alternatives: Vec<BackendView> = candidates
                    .into_iter()
                    .filter(|c| c.id != chosen && c.alive)
                    .collect();
                let Some(alternative) = self.strategy.select(&alternatives).await else {
                    return Err(DispatchError::BackendUnreachable(reason));
                };

                tracing::info!(
                    failed_backend = chosen,
                    retry_backend = alternative,
                    "retrying on alternative backend"
                );
                self.forward(alternative, &method, path_and_query, headers, &body, tag)
                    .await
                    .map_err(|retry_failure| match retry_failure {
                        ForwardError::Gone => DispatchError::BackendUnreachable(reason),
                        ForwardError::Transport(r) => DispatchError::BackendUnreachable(r),
                    })
            }
        }
    }

    /// Forward the request to every alive backend in parallel.
    ///
    /// Administrative fan-out: bypasses strategy selection and does not
    /// reserve capacity.
    pub async fn broadcast(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
        tag: Option<i64>,
    ) -> Result<BroadcastOutcome, DispatchError> {
        let alive: Vec<BackendView> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|b| b.alive)
            .collect();
        if alive.is_empty() {
            return Err(DispatchError::NoLiveBackend);
        }

        let forwards = alive
            .iter()
            .map(|backend| self.broadcast_one(backend, &method, path_and_query, headers, &body, tag));
        let results = futures::future::join_all(forwards).await;

        let mut outcome = BroadcastOutcome::default();
        for result in results {
            match result {
                Ok(response) => outcome.responses.push(response),
                Err(failure) => outcome.failures.push(failure),
            }
        }
        Ok(outcome)
    }

    async fn broadcast_one(
        &self,
        backend: &BackendView,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: &Bytes,
        tag: Option<i64>,
    ) -> Result<BroadcastResponse, BroadcastFailure> {
        let request = self
            .build_request(&backend.endpoint, method, path_and_query, headers, body)
            .map_err(|error| BroadcastFailure {
                server: backend.endpoint.clone(),
                error,
            })?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.forward_timeout, self.client.request(request)).await;
        let latency = started.elapsed();

        match result {
            Ok(Ok(response)) => {
                let status = response.status().as_u16();
                self.record(backend.id, status < 500, latency, tag);
                let bytes = response
                    .into_body()
                    .collect()
                    .await
                    .map(|collected| collected.to_bytes())
                    .unwrap_or_default();
                Ok(BroadcastResponse {
                    server: backend.endpoint.clone(),
                    status,
                    body: String::from_utf8_lossy(&bytes).into_owned(),
                })
            }
            Ok(Err(error)) => {
                self.record(backend.id, false, latency, tag);
                Err(BroadcastFailure {
                    server: backend.endpoint.clone(),
                    error: error.to_string(),
                })
            }
            Err(_) => {
                self.record(backend.id, false, latency, tag);
                Err(BroadcastFailure {
                    server: backend.endpoint.clone(),
                    error: "forward timed out".to_string(),
                })
            }
        }
    }

    /// One reserve → forward → record → release cycle against a specific
    /// backend. The reservation guard is dropped on every exit path.
    async fn forward(
        &self,
        id: BackendId,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: &Bytes,
        tag: Option<i64>,
    ) -> Result<Response<Body>, ForwardError> {
        let guard = match self.registry.reserve(id) {
            Ok(guard) => guard,
            Err(RegistryError::BackendGone(_)) => return Err(ForwardError::Gone),
            Err(other) => return Err(ForwardError::Transport(other.to_string())),
        };

        let request = self
            .build_request(guard.endpoint(), method, path_and_query, headers, body)
            .map_err(ForwardError::Transport)?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.forward_timeout, self.client.request(request)).await;
        let latency = started.elapsed();

        match result {
            Ok(Ok(response)) => {
                let success = response.status().as_u16() < 500;
                self.record(id, success, latency, tag);
                let (parts, incoming) = response.into_parts();
                Ok(Response::from_parts(parts, Body::new(incoming)))
            }
            Ok(Err(error)) => {
                self.demote_and_record(id, latency, tag);
                Err(ForwardError::Transport(error.to_string()))
            }
            Err(_) => {
                self.demote_and_record(id, latency, tag);
                Err(ForwardError::Transport("forward timed out".to_string()))
            }
        }
    }

    fn build_request(
        &self,
        endpoint: &str,
        method: &Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<Request<Body>, String> {
        let uri: Uri = format!("{}{}", endpoint, path_and_query)
            .parse()
            .map_err(|e: axum::http::uri::InvalidUri| e.to_string())?;
        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| format!("endpoint '{}' has no authority", endpoint))?;

        let mut builder = Request::builder().method(method.clone()).uri(uri);
        if let Some(out_headers) = builder.headers_mut() {
            *out_headers = filtered_headers(headers, &authority);
        }
        builder
            .body(Body::from(body.clone()))
            .map_err(|e| e.to_string())
    }

    fn record(&self, id: BackendId, success: bool, latency: Duration, tag: Option<i64>) {
        self.telemetry.record(id, success, latency);
        let _ = self.log.send(LogEvent::Outcome {
            backend_id: id,
            success,
            latency,
            tag,
        });
    }

    fn demote_and_record(&self, id: BackendId, latency: Duration, tag: Option<i64>) {
        if matches!(self.registry.mark_alive(id, false), Ok(true)) {
            if let Some(backend) = self.registry.get(id) {
                let _ = self.log.send(LogEvent::Transition {
                    backend_id: id,
                    endpoint: backend.endpoint.clone(),
                    alive: false,
                });
            }
        }
        self.record(id, false, latency, tag);
    }
}

/// Copy headers minus hop-by-hop ones; Host is rewritten to the backend.
fn filtered_headers(headers: &HeaderMap, authority: &Authority) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len() + 1);
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name) || name == &header::HOST {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
        out.insert(header::HOST, host);
    }
    out
}
