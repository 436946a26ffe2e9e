//! Circuit breaker for the predictive scorer.
//!
//! # States
//! - Closed: normal operation, scorer calls pass through
//! - Open: scorer assumed down, calls suppressed until cool-down elapses
//!
//! # State Transitions
//! ```text
//! Closed → Open: any scorer failure
//! Open → Closed: one scorer success after the cool-down window
//! ```
//!
//! No half-open counting: once the cool-down elapses the next selection is
//! allowed to try the scorer, and a single success closes the breaker.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { opened_at: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<State>,
    cool_down: Duration,
}

impl CircuitBreaker {
    pub fn new(cool_down: Duration) -> Self {
        Self {
            state: Mutex::new(State::Closed),
            cool_down,
        }
    }

    /// Whether calls are currently suppressed.
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            State::Closed => false,
            State::Open { opened_at } => opened_at.elapsed() < self.cool_down,
        }
    }

    /// Trip the breaker. Restarts the cool-down even if already open.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*state, State::Closed) {
            tracing::warn!("scorer circuit breaker opened");
        }
        *state = State::Open {
            opened_at: Instant::now(),
        };
    }

    /// A successful call closes the breaker.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(*state, State::Closed) {
            tracing::info!("scorer circuit breaker closed");
        }
        *state = State::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new(Duration::from_secs(30));
        assert!(!cb.is_open());
    }

    #[test]
    fn failure_opens_until_cool_down() {
        let cb = CircuitBreaker::new(Duration::from_millis(20));
        cb.record_failure();
        assert!(cb.is_open());
        std::thread::sleep(Duration::from_millis(25));
        assert!(!cb.is_open());
    }

    #[test]
    fn single_success_closes() {
        let cb = CircuitBreaker::new(Duration::from_secs(30));
        cb.record_failure();
        assert!(cb.is_open());
        cb.record_success();
        assert!(!cb.is_open());
    }

    #[test]
    fn repeated_failure_restarts_cool_down() {
        let cb = CircuitBreaker::new(Duration::from_millis(50));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(30));
        // second failure reset the clock, still open
        assert!(cb.is_open());
    }
}
