//! Backend selection strategies.
//!
//! # Data Flow
//! ```text
//! Dispatcher snapshot → alive candidates
//!     → Strategy::select:
//!         - round_robin.rs (rotate through candidates)
//!         - weighted.rs (smooth weighted round-robin)
//!         - least_conn.rs (fewest in-flight forwards)
//!         - random.rs (uniform choice)
//!         - predictive.rs (remote scorer + cache + circuit breaker)
//!     → chosen backend id or None
//! ```
//!
//! # Design Decisions
//! - Candidates are always the alive subset; strategies never consult the
//!   registry themselves
//! - Strategy state (counters, current-weight table, breaker) is owned by
//!   the strategy instance and guarded by its own lock
//! - Every strategy is total on non-empty input

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::schema::{FallbackKind, StrategyConfig, StrategyKind};
use crate::registry::{BackendId, BackendView};
use crate::telemetry::Collector;

pub mod cache;
pub mod least_conn;
pub mod predictive;
pub mod random;
pub mod round_robin;
pub mod weighted;

pub use cache::PredictionCache;
pub use least_conn::LeastConnections;
pub use predictive::Predictive;
pub use random::Random;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

/// A backend selection strategy.
///
/// `candidates` is the alive subset of the registry snapshot, ordered by id.
/// Implementations return `None` only on an empty candidate set, except the
/// predictive strategy whose admission rule may reject every candidate.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select(&self, candidates: &[BackendView]) -> Option<BackendId>;
}

/// Build the configured strategy.
pub fn build_strategy(config: &StrategyConfig, telemetry: Arc<Collector>) -> Arc<dyn Strategy> {
    match config.kind {
        StrategyKind::RoundRobin => Arc::new(RoundRobin::new()),
        StrategyKind::WeightedRoundRobin => Arc::new(WeightedRoundRobin::new()),
        StrategyKind::LeastConnections => Arc::new(LeastConnections::new()),
        StrategyKind::Random => Arc::new(Random::new()),
        StrategyKind::Ml => Arc::new(Predictive::new(&config.predictive, telemetry)),
    }
}

/// Build the deterministic fallback used while the scorer is unavailable.
pub fn build_fallback(kind: FallbackKind) -> Box<dyn Strategy> {
    match kind {
        FallbackKind::RoundRobin => Box::new(RoundRobin::new()),
        FallbackKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
        FallbackKind::LeastConnections => Box::new(LeastConnections::new()),
        FallbackKind::Random => Box::new(Random::new()),
    }
}

#[cfg(test)]
pub(crate) fn candidate(id: BackendId, weight: u32, capacity: u32, in_flight: u32) -> BackendView {
    BackendView {
        id,
        endpoint: format!("http://127.0.0.1:{}", 5000 + id),
        weight,
        capacity,
        alive: true,
        in_flight,
    }
}
