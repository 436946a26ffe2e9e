//! Round-robin selection.
//!
//! Monotone counter modulo the candidate count; ties within a snapshot are
//! broken by id order. The counter is shared across requests and guarded by
//! a per-strategy lock.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::registry::{BackendId, BackendView};
use crate::strategy::Strategy;

#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: Mutex<u64>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Strategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    async fn select(&self, candidates: &[BackendView]) -> Option<BackendId> {
        if candidates.is_empty() {
            return None;
        }
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        let chosen = &candidates[(*counter % candidates.len() as u64) as usize];
        *counter = counter.wrapping_add(1);
        Some(chosen.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::candidate;

    #[tokio::test]
    async fn rotates_in_snapshot_order() {
        let rr = RoundRobin::new();
        let candidates = vec![
            candidate(1, 1, 1, 0),
            candidate(2, 1, 1, 0),
            candidate(3, 1, 1, 0),
        ];

        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(rr.select(&candidates).await.unwrap());
        }
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_candidates_yield_none() {
        let rr = RoundRobin::new();
        assert_eq!(rr.select(&[]).await, None);
    }

    #[tokio::test]
    async fn adapts_to_shrinking_pool() {
        let rr = RoundRobin::new();
        let three = vec![
            candidate(1, 1, 1, 0),
            candidate(2, 1, 1, 0),
            candidate(3, 1, 1, 0),
        ];
        let two = vec![candidate(1, 1, 1, 0), candidate(3, 1, 1, 0)];

        rr.select(&three).await; // counter -> 1
        rr.select(&three).await; // counter -> 2
        // pool shrank; counter keeps running modulo the new length
        assert_eq!(rr.select(&two).await, Some(1));
        assert_eq!(rr.select(&two).await, Some(3));
    }
}
