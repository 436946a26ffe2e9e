//! Backend registry.
//!
//! # Responsibilities
//! - Hold the mutable pool: identity, endpoint, weight, capacity, liveness
//! - Track in-flight forwards per backend
//! - Hand out RAII reservation guards to the dispatcher
//!
//! # Design Decisions
//! - Membership guarded by one `RwLock`; per-backend counters are atomics
//! - Snapshots copy out under the read lock; readers never mutate
//! - Backends leave the pool only by administrative deregistration

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Stable backend identifier, assigned at registration.
pub type BackendId = u32;

/// Registry failure modes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The backend id is not (or no longer) in the pool.
    #[error("backend {0} is not registered")]
    BackendGone(BackendId),

    /// Registration rejected: weight and capacity must both be >= 1.
    #[error("backend {endpoint} has no usable capacity (weight={weight}, capacity={capacity})")]
    CapacityUnset {
        endpoint: String,
        weight: u32,
        capacity: u32,
    },
}

/// Probe bookkeeping, owned by the health prober.
#[derive(Debug, Default)]
pub struct ProbeState {
    pub last_probe_at: Option<Instant>,
    pub consecutive_failures: u32,
}

/// A registered downstream HTTP service instance.
#[derive(Debug)]
pub struct Backend {
    pub id: BackendId,
    /// scheme+host+port, no trailing slash.
    pub endpoint: String,
    /// Administrator-set, immutable for the backend's pool lifetime.
    pub weight: u32,
    /// Administrator-set, immutable for the backend's pool lifetime.
    pub capacity: u32,
    alive: AtomicBool,
    in_flight: AtomicU32,
    probe: Mutex<ProbeState>,
}

impl Backend {
    fn new(id: BackendId, endpoint: String, weight: u32, capacity: u32) -> Self {
        Self {
            id,
            endpoint,
            weight,
            capacity,
            alive: AtomicBool::new(true),
            in_flight: AtomicU32::new(0),
            probe: Mutex::new(ProbeState::default()),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run `f` against the probe bookkeeping under the per-backend lock.
    pub fn with_probe_state<T>(&self, f: impl FnOnce(&mut ProbeState) -> T) -> T {
        let mut state = self.probe.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

/// Immutable copy of one backend's state at snapshot time.
#[derive(Debug, Clone)]
pub struct BackendView {
    pub id: BackendId,
    pub endpoint: String,
    pub weight: u32,
    pub capacity: u32,
    pub alive: bool,
    pub in_flight: u32,
}

/// RAII token for one reserved forward. Dropping it releases the slot,
/// also on panic, cancellation, or transport error.
#[derive(Debug)]
pub struct ReservationGuard {
    backend: Arc<Backend>,
}

impl ReservationGuard {
    pub fn backend_id(&self) -> BackendId {
        self.backend.id
    }

    pub fn endpoint(&self) -> &str {
        &self.backend.endpoint
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        // Saturating: a revival may have reset the counter while this
        // reservation was still out.
        let _ = self
            .backend
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
        metrics::gauge!(
            "backend_in_flight",
            "backend_id" => self.backend.id.to_string()
        )
        .decrement(1.0);
    }
}

/// The shared backend pool.
#[derive(Debug)]
pub struct Registry {
    backends: RwLock<BTreeMap<BackendId, Arc<Backend>>>,
    next_id: AtomicU32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Add a backend to the pool and return its id.
    ///
    /// Registering an endpoint that is already present is a no-op returning
    /// the existing id; weight and capacity stay as first registered.
    pub fn register(
        &self,
        endpoint: &str,
        weight: u32,
        capacity: u32,
    ) -> Result<BackendId, RegistryError> {
        if weight == 0 || capacity == 0 {
            return Err(RegistryError::CapacityUnset {
                endpoint: endpoint.to_string(),
                weight,
                capacity,
            });
        }

        let endpoint = endpoint.trim_end_matches('/').to_string();
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = backends.values().find(|b| b.endpoint == endpoint) {
            return Ok(existing.id);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        backends.insert(id, Arc::new(Backend::new(id, endpoint.clone(), weight, capacity)));
        tracing::info!(backend_id = id, endpoint = %endpoint, weight, capacity, "backend registered");
        Ok(id)
    }

    /// Register a backend under an id assigned elsewhere (the persistent
    /// store is authoritative for ids when reachable).
    pub fn register_with_id(
        &self,
        id: BackendId,
        endpoint: &str,
        weight: u32,
        capacity: u32,
    ) -> Result<BackendId, RegistryError> {
        if weight == 0 || capacity == 0 {
            return Err(RegistryError::CapacityUnset {
                endpoint: endpoint.to_string(),
                weight,
                capacity,
            });
        }

        let endpoint = endpoint.trim_end_matches('/').to_string();
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = backends.values().find(|b| b.endpoint == endpoint) {
            return Ok(existing.id);
        }

        // Keep locally-assigned ids ahead of store-assigned ones.
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
        backends.insert(id, Arc::new(Backend::new(id, endpoint.clone(), weight, capacity)));
        tracing::info!(backend_id = id, endpoint = %endpoint, weight, capacity, "backend registered");
        Ok(id)
    }

    /// Remove a backend from the pool.
    ///
    /// Idempotent: removing an id that is already gone reports
    /// [`RegistryError::BackendGone`] and changes nothing.
    pub fn deregister(&self, id: BackendId) -> Result<(), RegistryError> {
        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        match backends.remove(&id) {
            Some(backend) => {
                tracing::info!(backend_id = id, endpoint = %backend.endpoint, "backend deregistered");
                Ok(())
            }
            None => Err(RegistryError::BackendGone(id)),
        }
    }

    /// Copy the current pool state. Ordered by id, which is insertion order
    /// for locally registered backends.
    pub fn snapshot(&self) -> Vec<BackendView> {
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        backends
            .values()
            .map(|b| BackendView {
                id: b.id,
                endpoint: b.endpoint.clone(),
                weight: b.weight,
                capacity: b.capacity,
                alive: b.is_alive(),
                in_flight: b.in_flight(),
            })
            .collect()
    }

    pub fn get(&self, id: BackendId) -> Option<Arc<Backend>> {
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        backends.get(&id).cloned()
    }

    /// Flip the liveness flag. Returns whether the flag changed.
    pub fn mark_alive(&self, id: BackendId, alive: bool) -> Result<bool, RegistryError> {
        let backend = self.get(id).ok_or(RegistryError::BackendGone(id))?;
        let previous = backend.alive.swap(alive, Ordering::AcqRel);
        let changed = previous != alive;
        if changed {
            metrics::gauge!("backend_up", "backend_id" => id.to_string())
                .set(if alive { 1.0 } else { 0.0 });
            tracing::info!(backend_id = id, endpoint = %backend.endpoint, alive, "backend liveness changed");
        }
        Ok(changed)
    }

    /// Forget in-flight work. Called by the prober on a not-alive -> alive
    /// transition: a restarted backend has no forwards of ours in flight.
    pub fn reset_in_flight(&self, id: BackendId) -> Result<(), RegistryError> {
        let backend = self.get(id).ok_or(RegistryError::BackendGone(id))?;
        backend.in_flight.store(0, Ordering::Release);
        metrics::gauge!("backend_in_flight", "backend_id" => id.to_string()).set(0.0);
        Ok(())
    }

    /// Reserve one forward slot against a backend.
    ///
    /// Reservation against a non-alive backend is allowed; only the
    /// dispatcher's fallback path does that.
    pub fn reserve(&self, id: BackendId) -> Result<ReservationGuard, RegistryError> {
        let backend = self.get(id).ok_or(RegistryError::BackendGone(id))?;
        backend.in_flight.fetch_add(1, Ordering::AcqRel);
        metrics::gauge!("backend_in_flight", "backend_id" => id.to_string()).increment(1.0);
        Ok(ReservationGuard { backend })
    }

    pub fn len(&self) -> usize {
        self.backends.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_snapshot() {
        let registry = Registry::new();
        let a = registry.register("http://127.0.0.1:5000", 1, 1).unwrap();
        let b = registry.register("http://127.0.0.1:5001", 3, 2).unwrap();
        assert_ne!(a, b);

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().all(|v| v.alive && v.in_flight == 0));
        // id order is deterministic
        assert_eq!(snap[0].id, a);
        assert_eq!(snap[1].id, b);
    }

    #[test]
    fn register_is_idempotent_on_endpoint() {
        let registry = Registry::new();
        let a = registry.register("http://127.0.0.1:5000", 1, 1).unwrap();
        let again = registry.register("http://127.0.0.1:5000/", 5, 5).unwrap();
        assert_eq!(a, again);
        // first registration wins
        assert_eq!(registry.snapshot()[0].weight, 1);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let registry = Registry::new();
        let err = registry.register("http://127.0.0.1:5000", 1, 0).unwrap_err();
        assert!(matches!(err, RegistryError::CapacityUnset { .. }));
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = Registry::new();
        let id = registry.register("http://127.0.0.1:5000", 1, 1).unwrap();
        registry.deregister(id).unwrap();
        assert_eq!(registry.deregister(id), Err(RegistryError::BackendGone(id)));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn reserve_release_pairing() {
        let registry = Registry::new();
        let id = registry.register("http://127.0.0.1:5000", 1, 2).unwrap();

        let g1 = registry.reserve(id).unwrap();
        let g2 = registry.reserve(id).unwrap();
        assert_eq!(registry.get(id).unwrap().in_flight(), 2);

        drop(g1);
        assert_eq!(registry.get(id).unwrap().in_flight(), 1);
        drop(g2);
        assert_eq!(registry.get(id).unwrap().in_flight(), 0);
    }

    #[test]
    fn release_after_deregister_is_safe() {
        let registry = Registry::new();
        let id = registry.register("http://127.0.0.1:5000", 1, 1).unwrap();
        let guard = registry.reserve(id).unwrap();
        registry.deregister(id).unwrap();
        assert_eq!(registry.reserve(id).unwrap_err(), RegistryError::BackendGone(id));
        drop(guard); // must not underflow or panic
    }

    #[test]
    fn revival_reset_keeps_counter_non_negative() {
        let registry = Registry::new();
        let id = registry.register("http://127.0.0.1:5000", 1, 1).unwrap();
        let guard = registry.reserve(id).unwrap();
        registry.reset_in_flight(id).unwrap();
        drop(guard);
        assert_eq!(registry.get(id).unwrap().in_flight(), 0);
    }

    #[test]
    fn mark_alive_reports_transitions() {
        let registry = Registry::new();
        let id = registry.register("http://127.0.0.1:5000", 1, 1).unwrap();
        assert!(registry.mark_alive(id, false).unwrap());
        assert!(!registry.mark_alive(id, false).unwrap());
        assert!(registry.mark_alive(id, true).unwrap());
        assert_eq!(
            registry.mark_alive(99, true),
            Err(RegistryError::BackendGone(99))
        );
    }
}
