//! Prediction cache: bounded LRU with TTL.
//!
//! Keys are a stable hash over the candidate set's quantised features; cpu
//! and memory are bucketed to 5 units and error rate to 0.05 before hashing
//! so that nearby states share an entry. Values are per-backend score
//! vectors. One mutex guards the whole structure.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::registry::{BackendId, BackendView};
use crate::scorer::FeatureRow;

/// Quantised selection state for one candidate, the unit of cache keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuantisedFeatures {
    pub backend_id: BackendId,
    pub cpu_bucket: u32,
    pub mem_bucket: u32,
    pub in_flight: u32,
    pub error_bucket: u32,
}

impl QuantisedFeatures {
    pub fn from_row(candidate: &BackendView, row: &FeatureRow) -> Self {
        Self {
            backend_id: candidate.id,
            cpu_bucket: (row.cpu_usage / 5.0).floor() as u32,
            mem_bucket: (row.memory_usage / 5.0).floor() as u32,
            in_flight: candidate.in_flight,
            error_bucket: (row.error_rate / 0.05).floor() as u32,
        }
    }
}

/// Stable FNV-1a over the quantised candidate sequence. Deterministic across
/// processes, unlike the std hasher.
pub fn cache_key(features: &[QuantisedFeatures]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET;
    let mut mix = |value: u64| {
        for byte in value.to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(PRIME);
        }
    };
    for f in features {
        mix(u64::from(f.backend_id));
        mix(u64::from(f.cpu_bucket));
        mix(u64::from(f.mem_bucket));
        mix(u64::from(f.in_flight));
        mix(u64::from(f.error_bucket));
    }
    hash
}

#[derive(Debug)]
struct Entry {
    scores: Vec<f32>,
    inserted_at: Instant,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<u64, Entry>,
    tick: u64,
}

/// Bounded LRU score cache with per-entry TTL.
#[derive(Debug)]
pub struct PredictionCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl PredictionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Look up a score vector. Expired entries are dropped on access.
    pub fn get(&self, key: u64) -> Option<Vec<f32>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick += 1;
        let tick = inner.tick;

        let expired = inner.map.get(&key)?.inserted_at.elapsed() > self.ttl;
        if expired {
            inner.map.remove(&key);
            return None;
        }
        inner.map.get_mut(&key).map(|entry| {
            entry.last_used = tick;
            entry.scores.clone()
        })
    }

    /// Insert a score vector, evicting the least recently used entry when
    /// the cache is full.
    pub fn insert(&self, key: u64, scores: Vec<f32>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.map.contains_key(&key) && inner.map.len() >= self.capacity {
            if let Some(evict) = inner
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| *k)
            {
                inner.map.remove(&evict);
            }
        }

        inner.map.insert(
            key,
            Entry {
                scores,
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
