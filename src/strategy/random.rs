//! Uniform random selection.

use async_trait::async_trait;
use rand::Rng;

use crate::registry::{BackendId, BackendView};
use crate::strategy::Strategy;

#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Strategy for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    async fn select(&self, candidates: &[BackendView]) -> Option<BackendId> {
        if candidates.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[index].id)
    }
}
