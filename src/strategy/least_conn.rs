//! Least-connections selection.
//!
//! Picks the candidate with the fewest in-flight forwards; ties go to the
//! lowest id. Stateless: the load signal lives in the registry snapshot.

use async_trait::async_trait;

use crate::registry::{BackendId, BackendView};
use crate::strategy::Strategy;

#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Strategy for LeastConnections {
    fn name(&self) -> &'static str {
        "least_connections"
    }

    async fn select(&self, candidates: &[BackendView]) -> Option<BackendId> {
        candidates
            .iter()
            .min_by_key(|c| (c.in_flight, c.id))
            .map(|c| c.id)
    }
}
