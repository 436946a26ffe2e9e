//! Request dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (body buffered once)
//!     → registry snapshot → alive candidates
//!     → strategy selects → registry reserves (RAII)
//!     → forward via pooled HTTP client, deadline-bounded
//!     → outcome recorded, reservation released
//!
//! Transport failure:
//!     → backend demoted immediately, failure recorded
//!     → one retry against one alternative, then 502
//!
//! Broadcast (separate path):
//!     → fan out to every alive backend, no reservation, no strategy
//! ```
//!
//! # Design Decisions
//! - `dispatch` never fans out; `broadcast` never reserves capacity
//! - Exactly one outcome record per completed forward
//! - A 5xx backend response is recorded as failure but returned verbatim

pub mod dispatcher;

pub use dispatcher::{
    BroadcastFailure, BroadcastOutcome, BroadcastResponse, DispatchError, Dispatcher,
};
