//! Active liveness probing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use crate::config::HealthCheckConfig;
use crate::health::HealthEvent;
use crate::registry::{BackendView, Registry};

/// Probes every registered backend on a fixed period and flips liveness
/// with hysteresis.
pub struct HealthProber {
    registry: Arc<Registry>,
    http: reqwest::Client,
    config: HealthCheckConfig,
    events: mpsc::UnboundedSender<HealthEvent>,
}

impl HealthProber {
    pub fn new(
        registry: Arc<Registry>,
        config: HealthCheckConfig,
        events: mpsc::UnboundedSender<HealthEvent>,
    ) -> Self {
        Self {
            registry,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            config,
            events,
        }
    }

    /// Run the probe loop until shutdown. The first round starts
    /// immediately so a cold pool converges fast.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.probe_round().await,
                _ = shutdown.recv() => {
                    tracing::debug!("health prober stopping");
                    return;
                }
            }
        }
    }

    async fn probe_round(&self) {
        let snapshot = self.registry.snapshot();
        let probes = snapshot.iter().map(|backend| self.probe_backend(backend));
        futures::future::join_all(probes).await;
    }

    /// Probe one backend. A failing probe of an alive backend is retried
    /// with in-period spacing until the failure threshold demotes it; an
    /// already-demoted backend gets a single probe per round.
    async fn probe_backend(&self, view: &BackendView) {
        let Some(backend) = self.registry.get(view.id) else {
            return; // deregistered since the snapshot
        };

        loop {
            let healthy = self.probe_once(&view.endpoint).await;
            let failures = backend.with_probe_state(|state| {
                state.last_probe_at = Some(Instant::now());
                if healthy {
                    state.consecutive_failures = 0;
                } else {
                    state.consecutive_failures += 1;
                }
                state.consecutive_failures
            });

            if healthy {
                self.transition(view, true);
                return;
            }

            if failures >= self.config.unhealthy_threshold {
                self.transition(view, false);
                return;
            }

            if !backend.is_alive() {
                // already demoted; keep counting across rounds instead of
                // hammering a dead backend
                return;
            }

            tokio::time::sleep(Duration::from_secs(self.config.retry_spacing_secs)).await;
        }
    }

    async fn probe_once(&self, endpoint: &str) -> bool {
        let url = format!("{}{}", endpoint, self.config.path);
        match self.http.get(&url).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(error) => {
                tracing::debug!(endpoint = %endpoint, %error, "health probe failed");
                false
            }
        }
    }

    fn transition(&self, view: &BackendView, alive: bool) {
        match self.registry.mark_alive(view.id, alive) {
            Ok(true) => {
                if alive {
                    // a restarted backend has no in-flight work from us
                    let _ = self.registry.reset_in_flight(view.id);
                }
                let _ = self.events.send(HealthEvent {
                    backend_id: view.id,
                    endpoint: view.endpoint.clone(),
                    alive,
                });
            }
            Ok(false) => {}
            Err(_) => {} // deregistered mid-round
        }
    }
}
