//! Smooth weighted round-robin selection.
//!
//! Classical smooth WRR: each step adds every candidate's weight to its
//! current value, selects the candidate with the highest current value, and
//! decrements the winner by the total weight. Produces an even interleaving
//! proportional to weights without bursts.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::registry::{BackendId, BackendView};
use crate::strategy::Strategy;

#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    current: Mutex<HashMap<BackendId, i64>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Strategy for WeightedRoundRobin {
    fn name(&self) -> &'static str {
        "weighted_round_robin"
    }

    async fn select(&self, candidates: &[BackendView]) -> Option<BackendId> {
        if candidates.is_empty() {
            return None;
        }

        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        // Backends that left the candidate set drop out of the table so a
        // later return starts them from zero.
        current.retain(|id, _| candidates.iter().any(|c| c.id == *id));

        let total: i64 = candidates.iter().map(|c| i64::from(c.weight)).sum();
        for c in candidates {
            *current.entry(c.id).or_insert(0) += i64::from(c.weight);
        }

        let winner = candidates
            .iter()
            .max_by(|a, b| {
                current[&a.id]
                    .cmp(&current[&b.id])
                    // ties go to the lowest id
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|c| c.id)?;

        if let Some(value) = current.get_mut(&winner) {
            *value -= total;
        }
        Some(winner)
    }
}
