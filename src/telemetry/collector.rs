//! Per-backend outcome collection and rolling aggregates.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::registry::BackendId;

/// One completed forward.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub success: bool,
    pub latency: Duration,
    pub at: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct ResourceSample {
    cpu_pct: f64,
    mem_pct: f64,
    taken_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct BackendTelemetry {
    outcomes: Mutex<VecDeque<Outcome>>,
    resources: Mutex<ResourceSample>,
}

/// Records per-backend request outcomes and resource samples, and derives
/// rolling aggregates on read.
#[derive(Debug)]
pub struct Collector {
    window: Duration,
    stale_after: Duration,
    backends: RwLock<HashMap<BackendId, Arc<BackendTelemetry>>>,
}

impl Collector {
    pub fn new(window: Duration, stale_after: Duration) -> Self {
        Self {
            window,
            stale_after,
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, id: BackendId) -> Arc<BackendTelemetry> {
        if let Some(entry) = self
            .backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
        {
            return entry.clone();
        }
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        backends.entry(id).or_default().clone()
    }

    /// Record one completed forward.
    pub fn record(&self, id: BackendId, success: bool, latency: Duration) {
        let entry = self.entry(id);
        let now = Instant::now();
        {
            let mut outcomes = entry.outcomes.lock().unwrap_or_else(|e| e.into_inner());
            outcomes.push_back(Outcome {
                success,
                latency,
                at: now,
            });
            prune(&mut outcomes, now, self.window);
        }

        metrics::counter!("http_requests_total").increment(1);
        if success {
            metrics::counter!("http_requests_success_total").increment(1);
        } else {
            metrics::counter!("http_requests_failed_total").increment(1);
        }
        metrics::histogram!("http_response_time_seconds").record(latency.as_secs_f64());
    }

    /// Rolling success rate over the retention window. 1.0 on an empty
    /// window, clamped to [0, 1].
    pub fn success_rate(&self, id: BackendId) -> f64 {
        let entry = self.entry(id);
        let now = Instant::now();
        let mut outcomes = entry.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut outcomes, now, self.window);
        if outcomes.is_empty() {
            return 1.0;
        }
        let successes = outcomes.iter().filter(|o| o.success).count();
        (successes as f64 / outcomes.len() as f64).clamp(0.0, 1.0)
    }

    pub fn error_rate(&self, id: BackendId) -> f64 {
        1.0 - self.success_rate(id)
    }

    /// Nearest-rank latency percentile over the window. Zero when the window
    /// is empty.
    pub fn percentile(&self, id: BackendId, q: f64) -> Duration {
        let entry = self.entry(id);
        let now = Instant::now();
        let mut outcomes = entry.outcomes.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut outcomes, now, self.window);
        if outcomes.is_empty() {
            return Duration::ZERO;
        }
        let mut latencies: Vec<Duration> = outcomes.iter().map(|o| o.latency).collect();
        latencies.sort_unstable();
        let rank = ((q.clamp(0.0, 1.0) * latencies.len() as f64).ceil() as usize)
            .clamp(1, latencies.len());
        latencies[rank - 1]
    }

    /// Last scraped CPU percentage, clamped to [0, 100]. Samples older than
    /// the staleness threshold are unknown and read as 0.0.
    pub fn cpu(&self, id: BackendId) -> f64 {
        self.resource(id).map(|s| s.cpu_pct).unwrap_or(0.0)
    }

    /// Last scraped memory percentage, clamped to [0, 100]. Unknown reads
    /// as 0.0.
    pub fn mem(&self, id: BackendId) -> f64 {
        self.resource(id).map(|s| s.mem_pct).unwrap_or(0.0)
    }

    fn resource(&self, id: BackendId) -> Option<ResourceSample> {
        let entry = self.entry(id);
        let sample = *entry.resources.lock().unwrap_or_else(|e| e.into_inner());
        match sample.taken_at {
            Some(at) if at.elapsed() <= self.stale_after => Some(sample),
            _ => None,
        }
    }

    /// Store a fresh resource sample for a backend.
    pub fn update_resources(&self, id: BackendId, cpu_pct: f64, mem_pct: f64) {
        let entry = self.entry(id);
        let cpu_pct = cpu_pct.clamp(0.0, 100.0);
        let mem_pct = mem_pct.clamp(0.0, 100.0);
        {
            let mut resources = entry.resources.lock().unwrap_or_else(|e| e.into_inner());
            *resources = ResourceSample {
                cpu_pct,
                mem_pct,
                taken_at: Some(Instant::now()),
            };
        }
        metrics::gauge!("backend_cpu_pct", "backend_id" => id.to_string()).set(cpu_pct);
        metrics::gauge!("backend_mem_pct", "backend_id" => id.to_string()).set(mem_pct);
    }

    /// Invalidate the resource sample after a failed scrape.
    pub fn mark_resources_stale(&self, id: BackendId) {
        let entry = self.entry(id);
        let mut resources = entry.resources.lock().unwrap_or_else(|e| e.into_inner());
        resources.taken_at = None;
    }

    /// Drop all state for a deregistered backend.
    pub fn forget(&self, id: BackendId) {
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        backends.remove(&id);
    }
}

fn prune(outcomes: &mut VecDeque<Outcome>, now: Instant, window: Duration) {
    while let Some(front) = outcomes.front() {
        if now.duration_since(front.at) > window {
            outcomes.pop_front();
        } else {
            break;
        }
    }
}
