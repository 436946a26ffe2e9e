//! Predictive selection backed by the remote scorer.
//!
//! # Selection procedure
//! ```text
//! circuit open → fallback
//! cache hit on quantised features → use cached scores
//! else → scorer (100ms/attempt, ≤3 attempts, shared 300ms budget)
//!     failure or length mismatch → breaker failure → fallback
//!     success → breaker success → cache insert
//! argmin(score) over candidates admitting in_flight < 2·capacity
//! admissible set empty → fallback
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::PredictiveConfig;
use crate::registry::{BackendId, BackendView};
use crate::resilience::CircuitBreaker;
use crate::scorer::{FeatureRow, ScorerClient};
use crate::strategy::cache::{cache_key, PredictionCache, QuantisedFeatures};
use crate::strategy::{build_fallback, Strategy};
use crate::telemetry::Collector;

/// Candidates stay admissible up to twice their capacity.
const OVER_PROVISION: u32 = 2;

pub struct Predictive {
    scorer: ScorerClient,
    cache: PredictionCache,
    breaker: CircuitBreaker,
    fallback: Box<dyn Strategy>,
    telemetry: Arc<Collector>,
    overall_deadline: Duration,
}

impl Predictive {
    pub fn new(config: &PredictiveConfig, telemetry: Arc<Collector>) -> Self {
        Self {
            scorer: ScorerClient::new(config),
            cache: PredictionCache::new(
                config.cache_capacity,
                Duration::from_millis(config.cache_ttl_ms),
            ),
            breaker: CircuitBreaker::new(Duration::from_secs(config.cool_down_secs)),
            fallback: build_fallback(config.fallback),
            telemetry,
            overall_deadline: Duration::from_millis(config.overall_deadline_ms),
        }
    }

    /// Feature matrix in contract column order, one row per candidate.
    fn feature_rows(&self, candidates: &[BackendView]) -> Vec<FeatureRow> {
        candidates
            .iter()
            .map(|c| FeatureRow {
                cpu_usage: self.telemetry.cpu(c.id) as f32,
                memory_usage: self.telemetry.mem(c.id) as f32,
                active_conns: c.in_flight,
                error_rate: self.telemetry.error_rate(c.id) as f32,
                response_p95: self.telemetry.percentile(c.id, 0.95).as_secs_f32() * 1000.0,
                capacity: c.capacity,
            })
            .collect()
    }

    fn admissible_argmin(candidates: &[BackendView], scores: &[f32]) -> Option<BackendId> {
        candidates
            .iter()
            .zip(scores)
            .filter(|(c, _)| c.in_flight < OVER_PROVISION * c.capacity)
            .min_by(|(a, sa), (b, sb)| {
                sa.partial_cmp(sb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(c, _)| c.id)
    }
}

#[async_trait]
impl Strategy for Predictive {
    fn name(&self) -> &'static str {
        "ml"
    }

    async fn select(&self, candidates: &[BackendView]) -> Option<BackendId> {
        if candidates.is_empty() {
            return None;
        }

        if self.breaker.is_open() {
            return self.fallback.select(candidates).await;
        }

        let rows = self.feature_rows(candidates);
        let quantised: Vec<QuantisedFeatures> = candidates
            .iter()
            .zip(&rows)
            .map(|(c, row)| QuantisedFeatures::from_row(c, row))
            .collect();
        let key = cache_key(&quantised);

        let scores = match self.cache.get(key) {
            // a hashed-key collision across differently-sized candidate sets
            // must not produce a misaligned vector
            Some(hit) if hit.len() == candidates.len() => hit,
            _ => match self.scorer.score(&rows, self.overall_deadline).await {
                Ok(scores) => {
                    self.breaker.record_success();
                    self.cache.insert(key, scores.clone());
                    scores
                }
                Err(error) => {
                    tracing::warn!(%error, "scorer unavailable, using fallback strategy");
                    self.breaker.record_failure();
                    return self.fallback.select(candidates).await;
                }
            },
        };

        match Self::admissible_argmin(candidates, &scores) {
            Some(id) => Some(id),
            None => {
                tracing::debug!("no candidate within admission bounds, using fallback strategy");
                self.fallback.select(candidates).await
            }
        }
    }
}
