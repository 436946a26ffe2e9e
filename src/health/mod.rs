//! Health probing subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (5s)
//!     → probe each backend's /health endpoint (3s timeout)
//!     → success: alive, failure counter reset
//!     → failure: retry with 1s spacing, not-alive after 3 consecutive
//!     → transitions update the registry and are emitted as events
//!       (picked up by the durable log sink)
//! ```
//!
//! # Design Decisions
//! - Hysteresis: one success revives, three consecutive failures demote
//! - A revived backend has its in-flight count reset; a demoted one keeps
//!   it for the dispatcher to drain
//! - Probe failures are never surfaced to clients

pub mod prober;

pub use prober::HealthProber;

use crate::registry::BackendId;

/// A liveness transition, emitted once per flip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEvent {
    pub backend_id: BackendId,
    pub endpoint: String,
    pub alive: bool,
}
