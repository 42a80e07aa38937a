//! Advisory leases used as liveness beacons.
//!
//! A serving context holds its lease for its whole lifetime; the lease
//! is released only when the holder terminates. Anyone else acquiring
//! the same lease therefore learns the holder died — a dead-man's
//! switch, never mutual exclusion of a resource.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held by the serving side; dropping it (or the task that owns it)
/// signals death to every watcher.
#[derive(Debug)]
pub struct LeaseGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl LeaseGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Named leases shared by the clients and servers of one process tree.
#[derive(Debug, Default)]
pub struct LeaseSet {
    leases: DashMap<String, Arc<Mutex<()>>>,
}

impl LeaseSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Arc<Mutex<()>> {
        self.leases
            .entry(name.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Take the lease; resolves once any previous holder is gone.
    pub async fn hold(&self, name: &str) -> LeaseGuard {
        let guard = self.entry(name).lock_owned().await;
        tracing::debug!(lease = name, "lease held");
        LeaseGuard {
            name: name.to_string(),
            _guard: guard,
        }
    }

    /// Block until the lease can be acquired, then let go immediately.
    ///
    /// While a holder exists, the holder terminating is the only way
    /// this resolves.
    pub async fn wait_released(&self, name: &str) {
        drop(self.entry(name).lock_owned().await);
        tracing::debug!(lease = name, "lease released");
    }

    /// Whether the lease is currently held.
    pub fn is_held(&self, name: &str) -> bool {
        self.entry(name).try_lock().is_err()
    }
}
