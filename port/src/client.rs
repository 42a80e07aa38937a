//! Port client: request/response multiplexing over one channel.
//!
//! A client lazily establishes its channel on the first call, assigns
//! every call a strictly increasing sequence number, and keys the
//! pending table by that number so responses may resolve out of send
//! order. After the first response on a persistent channel the client
//! watches the target's lease: the lease becoming acquirable means the
//! target died, every pending call is rejected with the origin it was
//! issued from, and the channel is discarded so the next call
//! reconnects.
//!
//! There is no cancellation and no built-in timeout; a caller wanting a
//! timeout races the call against its own timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::endpoint::{channel_pair, ContextHandle, Endpoint, EndpointReceiver, EndpointSender, Handshake};
use crate::error::{CallOrigin, PortError, Result};
use crate::frame::{CallId, Frame, Request};
use crate::hub::Hub;

/// Where a client connects to.
pub enum Target {
    /// Named worker hosted by the hub; the name doubles as the lease
    /// used for liveness tracking
    Worker(String),
    /// An established channel endpoint, used directly
    Port(Endpoint),
    /// A context that accepts a transferred channel end
    Context(ContextHandle),
}

/// Deferred target resolution; runs once per channel establishment.
pub type TargetResolver = Box<dyn Fn() -> BoxFuture<'static, Result<Target>> + Send + Sync>;

/// Client behavior knobs.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Lease watched for liveness; worker targets default to their name
    pub lock: Option<String>,
    /// Tear the channel down after the first response
    pub once: bool,
}

struct PendingCall {
    origin: CallOrigin,
    tx: oneshot::Sender<Result<Value>>,
}

/// Pending table plus the id counter, under one lock so the
/// step-back-on-latest-response bookkeeping stays consistent.
#[derive(Default)]
struct CallTable {
    calls: HashMap<CallId, PendingCall>,
    last_id: CallId,
}

#[derive(Default)]
struct Shared {
    table: StdMutex<CallTable>,
}

struct Connection {
    sender: EndpointSender,
    shared: Arc<Shared>,
}

type ConnSlot = Arc<Mutex<Option<Connection>>>;

/// Multiplexes named remote calls over a lazily established channel.
pub struct PortClient {
    hub: Arc<Hub>,
    resolver: TargetResolver,
    opts: ClientOptions,
    conn: ConnSlot,
}

impl PortClient {
    /// Client over a deferred target, resolved on first use.
    pub fn new(hub: Arc<Hub>, resolver: TargetResolver, opts: ClientOptions) -> Self {
        Self {
            hub,
            resolver,
            opts,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Client to a named hub worker.
    pub fn to_worker(hub: Arc<Hub>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            hub,
            Box::new(move || {
                let name = name.clone();
                async move { Ok(Target::Worker(name)) }.boxed()
            }),
            ClientOptions::default(),
        )
    }

    /// Client over an already established endpoint.
    pub fn direct(hub: Arc<Hub>, endpoint: Endpoint, opts: ClientOptions) -> Self {
        let endpoint = StdMutex::new(Some(endpoint));
        Self::new(
            hub,
            Box::new(move || {
                let endpoint = endpoint.lock().unwrap().take();
                async move { endpoint.map(Target::Port).ok_or(PortError::Closed) }.boxed()
            }),
            opts,
        )
    }

    /// Invoke a named remote operation.
    ///
    /// The caller is never blocked; the result is delivered when the
    /// response arrives.
    #[track_caller]
    pub fn call(
        &self,
        command: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<Value>> + Send + '_ {
        let origin = CallOrigin::capture();
        let mut args = vec![Value::String(command.to_string())];
        args.extend(params);
        async move { self.exec_from(origin, args).await }
    }

    /// Invoke with a raw argument list (first element names the
    /// operation on command-table targets).
    #[track_caller]
    pub fn exec(&self, args: Vec<Value>) -> impl Future<Output = Result<Value>> + Send + '_ {
        let origin = CallOrigin::capture();
        async move { self.exec_from(origin, args).await }
    }

    /// Whether a channel is currently established.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Number of calls awaiting a response.
    pub async fn pending_count(&self) -> usize {
        match self.conn.lock().await.as_ref() {
            Some(conn) => conn.shared.table.lock().unwrap().calls.len(),
            None => 0,
        }
    }

    async fn exec_from(&self, origin: CallOrigin, args: Vec<Value>) -> Result<Value> {
        let (sender, shared) = self.ensure_connected().await?;

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut table = shared.table.lock().unwrap();
            table.last_id += 1;
            let id = table.last_id;
            table.calls.insert(id, PendingCall { origin, tx });
            id
        };
        tracing::debug!(id, "exec send");

        if let Err(err) = sender.post(Frame::Request(Request { id, args })) {
            shared.table.lock().unwrap().calls.remove(&id);
            return Err(err);
        }
        // The reader task resolves this; a dropped sender means the
        // channel died before any response.
        rx.await.unwrap_or(Err(PortError::Disconnected { origin }))
    }

    /// Establish the channel once; concurrent first calls share the
    /// in-flight initialization behind the slot lock.
    async fn ensure_connected(&self) -> Result<(EndpointSender, Arc<Shared>)> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok((conn.sender.clone(), conn.shared.clone()));
        }

        let target = (self.resolver)().await?;
        let (lock, endpoint) = match target {
            Target::Worker(name) => {
                let handle = self.hub.connect(&name)?;
                let (near, far) = channel_pair();
                handle.post(Handshake {
                    lock: Some(name.clone()),
                    once: self.opts.once,
                    port: far,
                })?;
                (Some(name), near)
            }
            Target::Port(endpoint) => (self.opts.lock.clone(), endpoint),
            Target::Context(handle) => {
                let (near, far) = channel_pair();
                let lock = self.opts.lock.clone();
                handle.post(Handshake {
                    lock: lock.clone(),
                    once: self.opts.once,
                    port: far,
                })?;
                (lock, near)
            }
        };

        let (sender, receiver) = endpoint.split();
        let shared = Arc::new(Shared::default());
        self.spawn_reader(receiver, shared.clone(), lock);
        *slot = Some(Connection {
            sender: sender.clone(),
            shared: shared.clone(),
        });
        Ok((sender, shared))
    }

    fn spawn_reader(&self, mut receiver: EndpointReceiver, shared: Arc<Shared>, lock: Option<String>) {
        let leases = self.hub.leases();
        let once = self.opts.once;
        let conn = self.conn.clone();
        tokio::spawn(async move {
            let mut tracking = false;
            while let Some(frame) = receiver.recv().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!("undecodable frame: {err}");
                        continue;
                    }
                };
                // The calling side only ever sees responses.
                let Frame::Response(response) = frame else {
                    continue;
                };

                // The first response proves the target is alive and
                // holding its lease; from here on the lease becoming
                // acquirable means it died.
                if !tracking && !once {
                    if let Some(name) = lock.clone() {
                        tracking = true;
                        tokio::spawn(track_target(
                            leases.clone(),
                            name,
                            shared.clone(),
                            conn.clone(),
                        ));
                    }
                }

                let call = {
                    let mut table = shared.table.lock().unwrap();
                    let call = table.calls.remove(&response.id);
                    // Keep ids compact while nothing is outstanding.
                    if response.id == table.last_id {
                        table.last_id -= 1;
                    }
                    call
                };
                let Some(call) = call else {
                    tracing::warn!(id = response.id, "response for unknown call");
                    continue;
                };
                let outcome = match response.error {
                    Some(err) => Err(PortError::Remote {
                        message: err.message,
                        kind: err.kind,
                        origin: call.origin,
                    }),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = call.tx.send(outcome);

                if once {
                    break;
                }
            }
            // Channel gone (or one-shot complete): drop the connection
            // and fail whatever is still outstanding.
            reject_pending(&shared, None);
            clear_connection(&conn, &shared).await;
        });
    }
}

/// Watch the target's lease; its release is the death signal.
async fn track_target(
    leases: Arc<crate::lease::LeaseSet>,
    name: String,
    shared: Arc<Shared>,
    conn: ConnSlot,
) {
    leases.wait_released(&name).await;
    tracing::warn!(lease = %name, "target disconnected");
    reject_pending(&shared, Some(&name));
    clear_connection(&conn, &shared).await;
}

fn reject_pending(shared: &Arc<Shared>, lease: Option<&str>) {
    let calls: Vec<PendingCall> = {
        let mut table = shared.table.lock().unwrap();
        table.calls.drain().map(|(_, call)| call).collect()
    };
    if calls.is_empty() {
        return;
    }
    tracing::debug!(count = calls.len(), lease, "rejecting pending calls");
    for call in calls {
        let origin = call.origin;
        let _ = call.tx.send(Err(PortError::Disconnected { origin }));
    }
}

async fn clear_connection(conn: &ConnSlot, shared: &Arc<Shared>) {
    let mut slot = conn.lock().await;
    if slot
        .as_ref()
        .is_some_and(|c| Arc::ptr_eq(&c.shared, shared))
    {
        *slot = None;
    }
}
