//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files; the
//! loader applies environment overrides afterwards.

use serde::{Deserialize, Serialize};

/// Root configuration for the adaptive router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Seed backend definitions (merged with the persistent store at startup).
    pub backends: Vec<BackendSeed>,

    /// Selection strategy settings.
    pub strategy: StrategyConfig,

    /// Health probe settings.
    pub health: HealthCheckConfig,

    /// Telemetry windows and resource sampling.
    pub telemetry: TelemetryConfig,

    /// Dispatch (forwarding) settings.
    pub dispatch: DispatchConfig,

    /// Persistent store settings.
    pub store: StoreConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Bind port. Overridden by `PORT`.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// One backend known at startup.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendSeed {
    /// scheme+host+port, e.g. "http://127.0.0.1:5000".
    pub endpoint: String,

    /// Weight for weighted selection (default: 1).
    #[serde(default = "default_unit")]
    pub weight: u32,

    /// Admission capacity (default: 1).
    #[serde(default = "default_unit")]
    pub capacity: u32,
}

fn default_unit() -> u32 {
    1
}

/// Which selection strategy drives dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    Random,
    Ml,
}

impl StrategyKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "round_robin" => Some(Self::RoundRobin),
            "weighted_round_robin" => Some(Self::WeightedRoundRobin),
            "least_connections" => Some(Self::LeastConnections),
            "random" => Some(Self::Random),
            "ml" => Some(Self::Ml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::LeastConnections => "least_connections",
            Self::Random => "random",
            Self::Ml => "ml",
        }
    }
}

/// Strategy selection settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StrategyConfig {
    /// Active strategy. Overridden by `LB_STRATEGY`.
    pub kind: StrategyKind,

    /// Predictive strategy settings (used when `kind = "ml"`).
    pub predictive: PredictiveConfig,
}

/// Predictive strategy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PredictiveConfig {
    /// Scorer base URL. Overridden by `ML_MODEL_ENDPOINT`.
    pub scorer_endpoint: String,

    /// Deadline per scorer attempt in milliseconds.
    pub attempt_timeout_ms: u64,

    /// Maximum scorer attempts per selection.
    pub max_attempts: u32,

    /// Spacing between scorer attempts in milliseconds.
    pub retry_spacing_ms: u64,

    /// Overall scorer deadline across retries in milliseconds.
    pub overall_deadline_ms: u64,

    /// Circuit-breaker cool-down in seconds.
    pub cool_down_secs: u64,

    /// Prediction cache capacity (entries).
    pub cache_capacity: usize,

    /// Prediction cache TTL in milliseconds.
    pub cache_ttl_ms: u64,

    /// Strategy used while the scorer is unavailable.
    pub fallback: FallbackKind,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            scorer_endpoint: String::new(),
            attempt_timeout_ms: 100,
            max_attempts: 3,
            retry_spacing_ms: 100,
            overall_deadline_ms: 300,
            cool_down_secs: 30,
            cache_capacity: 1000,
            cache_ttl_ms: 2000,
            fallback: FallbackKind::WeightedRoundRobin,
        }
    }
}

/// Deterministic strategies usable as the predictive fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    RoundRobin,
    #[default]
    WeightedRoundRobin,
    LeastConnections,
    Random,
}

/// Health probe configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Probe period in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe on each backend.
    pub path: String,

    /// Consecutive failures before declaring not-alive.
    pub unhealthy_threshold: u32,

    /// Spacing between in-period probe retries in seconds.
    pub retry_spacing_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            timeout_secs: 3,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            retry_spacing_secs: 1,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Rolling outcome window in seconds.
    pub window_secs: u64,

    /// Resource sampler period in seconds.
    pub sample_interval_secs: u64,

    /// Per-scrape timeout in seconds.
    pub sample_timeout_secs: u64,

    /// Resource samples older than this are treated as unknown, in seconds.
    pub sample_stale_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            sample_interval_secs: 2,
            sample_timeout_secs: 2,
            sample_stale_secs: 30,
        }
    }
}

/// Dispatch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Default forward timeout in seconds. The effective deadline is the
    /// smaller of this and the caller's remaining budget.
    pub forward_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            forward_timeout_secs: 30,
        }
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Postgres connection URL. Overridden by `DATABASE_URL`. Empty disables
    /// the store; the router then runs on in-memory defaults.
    pub database_url: String,

    /// Per-query timeout in seconds.
    pub query_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            query_timeout_secs: 2,
        }
    }
}
