//! Telemetry subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher outcome
//!     → collector.rs (per-backend ring buffer, aggregate counters)
//!     → rolling success rate / latency percentiles, recomputed on read
//!
//! Resource sampler (sampler.rs):
//!     Periodic timer
//!     → GET <backend>/metrics
//!     → cpu/mem sample stored per backend, stale after 30s
//! ```
//!
//! # Design Decisions
//! - Aggregates are derived on read; only raw outcomes are stored
//! - Empty window reads as success_rate 1.0 so idle backends are not penalised
//! - Exposed values are clamped to their valid ranges

pub mod collector;
pub mod sampler;

pub use collector::{Collector, Outcome};
pub use sampler::ResourceSampler;
