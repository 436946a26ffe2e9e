//! Persistent store collaborator.
//!
//! A relational store holds the authoritative backend list with weight and
//! capacity, and receives an append-only stream of outcome records and
//! liveness transitions. The router reads it at startup and on registration
//! calls; everything is best-effort. The pool connects lazily and every
//! query carries a short timeout, so the router runs correctly with the
//! store unreachable: weight/capacity default to 1 and durable history is
//! silently dropped.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc};

use crate::config::schema::StoreConfig;
use crate::registry::BackendId;

/// One event on the append-only log stream.
#[derive(Debug, Clone)]
pub enum LogEvent {
    /// A completed forward.
    Outcome {
        backend_id: BackendId,
        success: bool,
        latency: Duration,
        /// Correlation tag from the caller, not used by selection.
        tag: Option<i64>,
    },
    /// A liveness flip observed by the prober or dispatcher.
    Transition {
        backend_id: BackendId,
        endpoint: String,
        alive: bool,
    },
}

/// A backend row as registered in the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredBackend {
    pub id: i32,
    pub endpoint: String,
    pub weight: i32,
    pub capacity: i32,
}

/// Handle to the relational store.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
    query_timeout: Duration,
}

impl Store {
    /// Create a lazily-connected store handle. This never touches the
    /// network; the first query does.
    pub fn connect(config: &StoreConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(config.query_timeout_secs))
            .connect_lazy(&config.database_url)?;
        Ok(Self {
            pool,
            query_timeout: Duration::from_secs(config.query_timeout_secs),
        })
    }

    async fn run<T>(
        &self,
        what: &'static str,
        query: impl std::future::Future<Output = Result<T, sqlx::Error>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) => {
                tracing::warn!(%error, what, "store unavailable");
                None
            }
            Err(_) => {
                tracing::warn!(what, "store query timed out");
                None
            }
        }
    }

    /// Create tables when missing. Best effort.
    pub async fn ensure_schema(&self) {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS servers (
                id       SERIAL PRIMARY KEY,
                endpoint TEXT NOT NULL UNIQUE,
                weight   INT NOT NULL DEFAULT 1,
                capacity INT NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS outcomes (
                id         BIGSERIAL PRIMARY KEY,
                server_id  INT NOT NULL,
                success    BOOL NOT NULL,
                latency_ms BIGINT NOT NULL,
                tag        BIGINT,
                at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE TABLE IF NOT EXISTS health_transitions (
                id        BIGSERIAL PRIMARY KEY,
                server_id INT NOT NULL,
                endpoint  TEXT NOT NULL,
                alive     BOOL NOT NULL,
                at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
        "#;
        self.run("ensure schema", sqlx::raw_sql(ddl).execute(&self.pool))
            .await;
    }

    /// Registered backends with their administrator-set weight/capacity.
    /// `None` when the store is unreachable.
    pub async fn load_backends(&self) -> Option<Vec<StoredBackend>> {
        self.run(
            "load backends",
            sqlx::query_as::<_, StoredBackend>(
                "SELECT id, endpoint, weight, capacity FROM servers ORDER BY id",
            )
            .fetch_all(&self.pool),
        )
        .await
    }

    /// Insert or fetch a backend row, returning its store id.
    pub async fn upsert_backend(
        &self,
        endpoint: &str,
        weight: u32,
        capacity: u32,
    ) -> Option<i32> {
        self.run(
            "upsert backend",
            sqlx::query_scalar::<_, i32>(
                "INSERT INTO servers (endpoint, weight, capacity) VALUES ($1, $2, $3)
                 ON CONFLICT (endpoint) DO UPDATE SET endpoint = EXCLUDED.endpoint
                 RETURNING id",
            )
            .bind(endpoint)
            .bind(weight as i32)
            .bind(capacity as i32)
            .fetch_one(&self.pool),
        )
        .await
    }

    /// Remove a backend row.
    pub async fn delete_backend(&self, id: BackendId) {
        self.run(
            "delete backend",
            sqlx::query("DELETE FROM servers WHERE id = $1")
                .bind(id as i32)
                .execute(&self.pool),
        )
        .await;
    }

    async fn append(&self, event: &LogEvent) {
        match event {
            LogEvent::Outcome {
                backend_id,
                success,
                latency,
                tag,
            } => {
                self.run(
                    "append outcome",
                    sqlx::query(
                        "INSERT INTO outcomes (server_id, success, latency_ms, tag)
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(*backend_id as i32)
                    .bind(success)
                    .bind(latency.as_millis() as i64)
                    .bind(*tag)
                    .execute(&self.pool),
                )
                .await;
            }
            LogEvent::Transition {
                backend_id,
                endpoint,
                alive,
            } => {
                self.run(
                    "append transition",
                    sqlx::query(
                        "INSERT INTO health_transitions (server_id, endpoint, alive)
                         VALUES ($1, $2, $3)",
                    )
                    .bind(*backend_id as i32)
                    .bind(endpoint)
                    .bind(alive)
                    .execute(&self.pool),
                )
                .await;
            }
        }
    }
}

/// Drain the append-only log channel into the store until shutdown.
pub async fn run_sink(
    store: Arc<Store>,
    mut events: mpsc::UnboundedReceiver<LogEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => store.append(&event).await,
                None => return,
            },
            _ = shutdown.recv() => {
                tracing::debug!("store sink stopping");
                return;
            }
        }
    }
}
