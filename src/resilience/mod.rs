//! Resilience subsystem.
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every outbound call carries a deadline
//!   (enforced at the call sites in `scorer`, `health`, and `dispatch`)
//! - The circuit breaker here guards the scorer dependency, not backends;
//!   backend failure handling lives in the prober and dispatcher

pub mod circuit_breaker;

pub use circuit_breaker::CircuitBreaker;
