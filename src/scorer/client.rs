//! Batched feature submission to the remote scorer.
//!
//! Wire contract: `POST <scorer>/predict` with
//! `{"servers": [{cpu_usage, memory_usage, active_conns, error_rate,
//! response_p95, capacity}, …]}` answered by `{"scores": [f32, …]}` where
//! the array order defines correspondence. Lower score means better
//! candidate. Retries consume from one overall deadline budget.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::PredictiveConfig;

/// One feature row. Field order is the scorer contract:
/// `(cpu_pct, mem_pct, in_flight, error_rate, p95_latency_ms, capacity)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub active_conns: u32,
    pub error_rate: f32,
    pub response_p95: f32,
    pub capacity: u32,
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    servers: &'a [FeatureRow],
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    scores: Vec<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("scorer unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("scorer returned status {0}")]
    Status(u16),

    #[error("scorer deadline exceeded")]
    DeadlineExceeded,

    #[error("score vector length {got} does not match {expected} candidates")]
    LengthMismatch { expected: usize, got: usize },
}

/// HTTP client for the remote scorer.
#[derive(Debug, Clone)]
pub struct ScorerClient {
    http: reqwest::Client,
    predict_url: String,
    attempt_timeout: Duration,
    max_attempts: u32,
    retry_spacing: Duration,
}

impl ScorerClient {
    pub fn new(config: &PredictiveConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            predict_url: format!("{}/predict", config.scorer_endpoint.trim_end_matches('/')),
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            max_attempts: config.max_attempts.max(1),
            retry_spacing: Duration::from_millis(config.retry_spacing_ms),
        }
    }

    /// Score one feature row per candidate. The returned vector is validated
    /// to have exactly one entry per row.
    pub async fn score(
        &self,
        rows: &[FeatureRow],
        deadline: Duration,
    ) -> Result<Vec<f32>, ScorerError> {
        let started = Instant::now();
        let mut last_error = ScorerError::DeadlineExceeded;

        for attempt in 1..=self.max_attempts {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                break;
            };

            let attempt_started = Instant::now();
            match self.attempt(rows, remaining.min(self.attempt_timeout)).await {
                Ok(scores) => {
                    if scores.len() != rows.len() {
                        metrics::counter!("ml_errors_total").increment(1);
                        return Err(ScorerError::LengthMismatch {
                            expected: rows.len(),
                            got: scores.len(),
                        });
                    }
                    metrics::counter!("ml_predictions_total").increment(1);
                    metrics::histogram!("ml_inference_seconds")
                        .record(attempt_started.elapsed().as_secs_f64());
                    return Ok(scores);
                }
                Err(error) => {
                    tracing::debug!(attempt, %error, "scorer attempt failed");
                    last_error = error;
                }
            }

            if attempt < self.max_attempts {
                match deadline.checked_sub(started.elapsed()) {
                    Some(left) if left > self.retry_spacing => {
                        tokio::time::sleep(self.retry_spacing).await;
                    }
                    // not enough budget for another spaced attempt
                    _ => break,
                }
            }
        }

        metrics::counter!("ml_errors_total").increment(1);
        Err(last_error)
    }

    async fn attempt(&self, rows: &[FeatureRow], budget: Duration) -> Result<Vec<f32>, ScorerError> {
        let request = self
            .http
            .post(&self.predict_url)
            .json(&ScoreRequest { servers: rows })
            .send();

        let response = tokio::time::timeout(budget, request)
            .await
            .map_err(|_| ScorerError::DeadlineExceeded)??;

        if !response.status().is_success() {
            return Err(ScorerError::Status(response.status().as_u16()));
        }

        let body: ScoreResponse = response.json().await?;
        Ok(body.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ScorerClient {
        let mut config = PredictiveConfig::default();
        config.scorer_endpoint = server.uri();
        ScorerClient::new(&config)
    }

    fn rows(n: usize) -> Vec<FeatureRow> {
        (0..n)
            .map(|i| FeatureRow {
                cpu_usage: 10.0 * i as f32,
                memory_usage: 20.0,
                active_conns: i as u32,
                error_rate: 0.0,
                response_p95: 12.5,
                capacity: 4,
            })
            .collect()
    }

    #[tokio::test]
    async fn scores_are_returned_in_row_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .and(body_partial_json(serde_json::json!({
                "servers": [{"cpu_usage": 0.0}, {"cpu_usage": 10.0}, {"cpu_usage": 20.0}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "scores": [0.9, 0.1, 0.5]
                })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let scores = client
            .score(&rows(3), Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(scores, vec![0.9, 0.1, 0.5]);
    }

    #[tokio::test]
    async fn length_mismatch_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"scores": [0.5]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .score(&rows(3), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ScorerError::LengthMismatch { expected: 3, got: 1 }
        ));
    }

    #[tokio::test]
    async fn retries_stop_at_the_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"scores": [0.5, 0.5]}))
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let started = Instant::now();
        let err = client
            .score(&rows(2), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::DeadlineExceeded));
        // three 100ms attempts plus spacing must stay near the overall budget
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"scores": [0.3]})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let scores = client
            .score(&rows(1), Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(scores, vec![0.3]);
    }
}
