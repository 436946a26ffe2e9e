//! Periodic resource sampling of backend `/metrics` endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast;

use crate::config::TelemetryConfig;
use crate::registry::{BackendView, Registry};
use crate::telemetry::Collector;

/// Backend resource report, as served by `GET <backend>/metrics`.
#[derive(Debug, Deserialize)]
struct ResourceReport {
    cpu_usage: f64,
    memory_usage: f64,
}

/// Scrapes every registered backend's resource endpoint on a fixed period.
pub struct ResourceSampler {
    registry: Arc<Registry>,
    collector: Arc<Collector>,
    http: reqwest::Client,
    interval: Duration,
    timeout: Duration,
}

impl ResourceSampler {
    pub fn new(registry: Arc<Registry>, collector: Arc<Collector>, config: &TelemetryConfig) -> Self {
        let timeout = Duration::from_secs(config.sample_timeout_secs);
        Self {
            registry,
            collector,
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            interval: Duration::from_secs(config.sample_interval_secs),
            timeout,
        }
    }

    /// Run the sampler loop until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sample_all().await,
                _ = shutdown.recv() => {
                    tracing::debug!("resource sampler stopping");
                    return;
                }
            }
        }
    }

    async fn sample_all(&self) {
        let snapshot = self.registry.snapshot();
        let scrapes = snapshot.iter().map(|backend| self.sample_one(backend));
        futures::future::join_all(scrapes).await;
    }

    async fn sample_one(&self, backend: &BackendView) {
        match self.scrape(&backend.endpoint).await {
            Ok(report) => {
                self.collector
                    .update_resources(backend.id, report.cpu_usage, report.memory_usage);
            }
            Err(error) => {
                tracing::debug!(
                    backend_id = backend.id,
                    endpoint = %backend.endpoint,
                    %error,
                    "resource scrape failed; sample marked stale"
                );
                self.collector.mark_resources_stale(backend.id);
            }
        }
    }

    async fn scrape(&self, endpoint: &str) -> Result<ResourceReport, ScrapeError> {
        let url = format!("{}/metrics", endpoint);
        let response = tokio::time::timeout(self.timeout, self.http.get(&url).send())
            .await
            .map_err(|_| ScrapeError::Timeout)??;

        if !response.status().is_success() {
            return Err(ScrapeError::Status(response.status().as_u16()));
        }

        let report: ResourceReport = response.json().await?;
        if !(0.0..=100.0).contains(&report.cpu_usage) {
            return Err(ScrapeError::OutOfRange("cpu_usage", report.cpu_usage));
        }
        if !(0.0..=100.0).contains(&report.memory_usage) {
            return Err(ScrapeError::OutOfRange("memory_usage", report.memory_usage));
        }
        Ok(report)
    }
}

#[derive(Debug, thiserror::Error)]
enum ScrapeError {
    #[error("scrape timed out")]
    Timeout,

    #[error("metrics endpoint returned {0}")]
    Status(u16),

    #[error("{0} out of range: {1}")]
    OutOfRange(&'static str, f64),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}
