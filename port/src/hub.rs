//! Hub: hosts named worker contexts and hands out connections.
//!
//! A worker is an isolated execution context (a tokio task standing in
//! for a dedicated worker): it owns a handshake inbox, serves every
//! channel end handed to it, and holds its lease for its whole
//! lifetime. Terminating the worker — idle shutdown or a hard kill —
//! releases the lease, which is exactly what clients observe as death.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::{JoinHandle, JoinSet};

use crate::endpoint::{context_channel, ContextHandle, Handshake};
use crate::error::{PortError, Result};
use crate::lease::LeaseSet;
use crate::server::{serve_port, Handler, KeepAlivePin, WorkerState, IDLE_TIMEOUT};

/// Options for hosting a worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Self-terminate after a quiet period with no in-flight work
    pub auto_close: bool,
    /// Length of that quiet period
    pub idle_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            auto_close: true,
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

/// Registry of worker contexts plus the lease set they share with
/// their clients.
#[derive(Debug, Default)]
pub struct Hub {
    workers: DashMap<String, ContextHandle>,
    leases: Arc<LeaseSet>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The lease set shared by everything attached to this hub.
    pub fn leases(&self) -> Arc<LeaseSet> {
        self.leases.clone()
    }

    /// Connect to a named worker.
    pub fn connect(&self, name: &str) -> Result<ContextHandle> {
        self.workers
            .get(name)
            .map(|handle| handle.value().clone())
            .ok_or_else(|| PortError::UnknownWorker(name.to_string()))
    }

    /// Spawn a worker context serving the given handler.
    pub fn spawn_worker(&self, name: &str, handler: Handler, opts: WorkerOptions) -> WorkerHandle {
        let (handle, mut inbox) = context_channel();
        let state = WorkerState::new(opts.auto_close, opts.idle_timeout);
        let leases = self.leases.clone();
        let lease_name = name.to_string();
        let worker_state = state.clone();

        let join = tokio::spawn(async move {
            // Held for the whole worker lifetime; released only by
            // termination.
            let _lease = leases.hold(&lease_name).await;
            tracing::info!(worker = %lease_name, "worker started");
            let mut ports = JoinSet::new();
            loop {
                tokio::select! {
                    handshake = inbox.recv() => {
                        let Some(Handshake { once, port, .. }) = handshake else {
                            break;
                        };
                        tracing::debug!(worker = %lease_name, once, "port attached");
                        ports.spawn(serve_port(
                            port,
                            handler.clone(),
                            worker_state.clone(),
                            once,
                        ));
                    }
                    _ = worker_state.wait_shutdown() => {
                        tracing::info!(worker = %lease_name, "worker idle, terminating");
                        break;
                    }
                }
            }
            // Open ports die with the worker.
            ports.abort_all();
        });

        self.workers.insert(name.to_string(), handle.clone());
        WorkerHandle {
            name: name.to_string(),
            state,
            handle,
            join,
        }
    }
}

/// Control handle for a hosted worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    state: Arc<WorkerState>,
    handle: ContextHandle,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handshake handle, same as `Hub::connect` returns.
    pub fn context(&self) -> ContextHandle {
        self.handle.clone()
    }

    /// Pin the worker alive regardless of idle time.
    pub fn keep_alive(&self) -> KeepAlivePin {
        self.state.clone().keep_alive()
    }

    /// Whether the worker task has terminated.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Hard-kill the worker, as if its process died.
    pub fn kill(&self) {
        self.join.abort();
    }

    /// Wait for the worker to terminate on its own.
    pub async fn terminated(self) {
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_requires_a_registered_worker() {
        let hub = Hub::new();
        let result = hub.connect("nobody");
        assert!(matches!(result, Err(PortError::UnknownWorker(_))));
    }

    #[tokio::test]
    async fn spawned_worker_holds_its_lease() {
        let hub = Hub::new();
        let worker = hub.spawn_worker(
            "background",
            Handler::single(|_args| async move { Ok(serde_json::Value::Null) }),
            WorkerOptions::default(),
        );
        // Give the worker task a beat to take the lease.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(hub.leases().is_held("background"));

        worker.kill();
        tokio::time::timeout(Duration::from_secs(1), async {
            hub.leases().wait_released("background").await
        })
        .await
        .unwrap();
    }
}
