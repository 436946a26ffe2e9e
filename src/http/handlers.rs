//! Route handlers.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::DispatchError;
use crate::http::server::AppState;
use crate::registry::{BackendId, RegistryError};

/// Forwarded bodies are buffered once; cap them to keep memory bounded.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
pub struct DispatchParams {
    /// Correlation tag only; ignored by selection.
    pub server_id: Option<i64>,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match self {
            DispatchError::NoLiveBackend | DispatchError::SelectionFailed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// `POST /request` — forward to one selected backend.
pub async fn dispatch_request(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let tag = Query::<DispatchParams>::try_from_uri(&parts.uri)
        .map(|q| q.0.server_id)
        .unwrap_or(None);

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        }
    };

    ensure_request_id(&mut parts.headers);
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    match state
        .dispatcher
        .dispatch(parts.method, &path_and_query, &parts.headers, body, tag)
        .await
    {
        Ok(response) => response.into_response(),
        Err(error) => {
            tracing::warn!(%error, "dispatch failed");
            error.into_response()
        }
    }
}

/// `POST /broadcast` — administrative fan-out to every alive backend.
pub async fn broadcast_request(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let tag = Query::<DispatchParams>::try_from_uri(&parts.uri)
        .map(|q| q.0.server_id)
        .unwrap_or(None);

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        }
    };

    ensure_request_id(&mut parts.headers);
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    match state
        .dispatcher
        .broadcast(parts.method, &path_and_query, &parts.headers, body, tag)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(error) => error.into_response(),
    }
}

fn ensure_request_id(headers: &mut axum::http::HeaderMap) {
    if !headers.contains_key("x-request-id") {
        if let Ok(id) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            headers.insert("x-request-id", id);
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthSummary {
    pub status: &'static str,
    pub healthy_servers: Vec<String>,
    pub unhealthy_servers: Vec<String>,
}

/// `GET /health` — 200 when at least one backend is alive, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let mut healthy = Vec::new();
    let mut unhealthy = Vec::new();
    for backend in state.registry.snapshot() {
        if backend.alive {
            healthy.push(backend.endpoint);
        } else {
            unhealthy.push(backend.endpoint);
        }
    }

    let status = if healthy.is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = HealthSummary {
        status: "load balancer running",
        healthy_servers: healthy,
        unhealthy_servers: unhealthy,
    };
    (status, Json(body)).into_response()
}

/// `GET /metrics` — Prometheus exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    ([("content-type", "text/plain; version=0.0.4")], body).into_response()
}

#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub id: BackendId,
    pub endpoint: String,
    pub weight: u32,
    pub capacity: u32,
    pub alive: bool,
    pub in_flight: u32,
    pub success_rate: f64,
}

/// `GET /servers` — registry snapshot with rolling success rates.
pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerStatus>> {
    let statuses = state
        .registry
        .snapshot()
        .into_iter()
        .map(|b| ServerStatus {
            success_rate: state.telemetry.success_rate(b.id),
            id: b.id,
            endpoint: b.endpoint,
            weight: b.weight,
            capacity: b.capacity,
            alive: b.alive,
            in_flight: b.in_flight,
        })
        .collect();
    Json(statuses)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub endpoint: String,
    #[serde(default)]
    pub weight: Option<u32>,
    #[serde(default)]
    pub capacity: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: BackendId,
}

/// `POST /servers` — register a backend. Weight/capacity default to 1; the
/// persistent store is updated when reachable.
pub async fn register_server(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    let endpoint = request.endpoint.trim_end_matches('/').to_string();
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "endpoint must include a scheme" })),
        )
            .into_response();
    }
    let weight = request.weight.unwrap_or(1);
    let capacity = request.capacity.unwrap_or(1);

    // store id is authoritative when the store answers
    let stored_id = match &state.store {
        Some(store) => store.upsert_backend(&endpoint, weight, capacity).await,
        None => None,
    };

    let registered = match stored_id {
        Some(id) => state
            .registry
            .register_with_id(id as BackendId, &endpoint, weight, capacity),
        None => state.registry.register(&endpoint, weight, capacity),
    };

    match registered {
        Ok(id) => (StatusCode::CREATED, Json(RegisterResponse { id })).into_response(),
        Err(error @ RegistryError::CapacityUnset { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": error.to_string() })),
        )
            .into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}

/// `DELETE /servers/{id}` — administrative deregistration.
pub async fn deregister_server(
    State(state): State<AppState>,
    Path(id): Path<BackendId>,
) -> Response {
    match state.registry.deregister(id) {
        Ok(()) => {
            state.telemetry.forget(id);
            if let Some(store) = &state.store {
                store.delete_backend(id).await;
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(error @ RegistryError::BackendGone(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": error.to_string() })),
        )
            .into_response(),
        Err(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}
