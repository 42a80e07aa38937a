//! Remote serving side: command dispatch, idle shutdown, keep-alive.
//!
//! A receiving context registers one serve loop per channel end it is
//! handed. Inbound requests are dispatched through a command table
//! built at startup (or a single catch-all function), and the response
//! echoes the request id with either the result or an error stripped to
//! its serializable fields.
//!
//! Worker-hosted contexts track an in-flight job counter: when it
//! returns to zero and no keep-alive pin is held, a timer schedules
//! self-termination after a fixed quiet period; any new inbound call
//! cancels a pending timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::endpoint::Endpoint;
use crate::frame::{Frame, Request, Response, WireError};

/// Default quiet period before a worker shuts itself down.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What a command handler produces.
pub type CommandResult = std::result::Result<Value, WireError>;

/// Boxed async command handler.
pub type CommandFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, CommandResult> + Send + Sync>;

/// Named command table, built once at startup and validated per call by
/// a plain map lookup.
#[derive(Default, Clone)]
pub struct CommandSet {
    commands: HashMap<String, CommandFn>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command handler under a name.
    pub fn register<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        self.commands
            .insert(name.into(), Arc::new(move |args| handler(args).boxed()));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&CommandFn> {
        self.commands.get(name)
    }
}

/// How a serving context dispatches inbound requests.
#[derive(Clone)]
pub enum Handler {
    /// Registered command table; the first argument names the command
    Commands(Arc<CommandSet>),
    /// Single catch-all function receiving the full argument list
    Single(CommandFn),
}

impl Handler {
    /// Catch-all handler from a plain async function.
    pub fn single<F, Fut>(handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        Handler::Single(Arc::new(move |args| handler(args).boxed()))
    }

    pub fn commands(set: CommandSet) -> Self {
        Handler::Commands(Arc::new(set))
    }
}

/// Shared lifecycle state of one serving context.
#[derive(Debug)]
pub struct WorkerState {
    jobs: AtomicUsize,
    pins: AtomicUsize,
    auto_close: bool,
    idle_timeout: Duration,
    shutdown: Notify,
    timer: Mutex<Option<AbortHandle>>,
}

impl WorkerState {
    pub fn new(auto_close: bool, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            jobs: AtomicUsize::new(0),
            pins: AtomicUsize::new(0),
            auto_close,
            idle_timeout,
            shutdown: Notify::new(),
            timer: Mutex::new(None),
        })
    }

    /// Keep the context alive regardless of in-flight work; dropping
    /// the pin re-arms idle shutdown.
    pub fn keep_alive(self: Arc<Self>) -> KeepAlivePin {
        self.pins.fetch_add(1, Ordering::SeqCst);
        self.cancel_timer();
        KeepAlivePin { state: self }
    }

    /// Resolves when the idle timer fires.
    pub async fn wait_shutdown(&self) {
        self.shutdown.notified().await;
    }

    pub fn job_count(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }

    fn job_started(&self) {
        self.jobs.fetch_add(1, Ordering::SeqCst);
        self.cancel_timer();
    }

    fn cancel_timer(&self) {
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.abort();
        }
    }
}

fn finish_job(state: &Arc<WorkerState>) {
    if state.jobs.fetch_sub(1, Ordering::SeqCst) == 1 {
        schedule_shutdown(state);
    }
}

fn schedule_shutdown(state: &Arc<WorkerState>) {
    if !state.auto_close
        || state.pins.load(Ordering::SeqCst) > 0
        || state.jobs.load(Ordering::SeqCst) > 0
    {
        return;
    }
    let task_state = Arc::clone(state);
    let timer = tokio::spawn(async move {
        tokio::time::sleep(task_state.idle_timeout).await;
        if task_state.jobs.load(Ordering::SeqCst) == 0
            && task_state.pins.load(Ordering::SeqCst) == 0
        {
            tracing::debug!("quiet period elapsed, shutting down");
            task_state.shutdown.notify_one();
        }
    });
    *state.timer.lock().unwrap() = Some(timer.abort_handle());
}

/// RAII keep-alive pin; see [`WorkerState::keep_alive`].
#[derive(Debug)]
pub struct KeepAlivePin {
    state: Arc<WorkerState>,
}

impl Drop for KeepAlivePin {
    fn drop(&mut self) {
        if self.state.pins.fetch_sub(1, Ordering::SeqCst) == 1 {
            schedule_shutdown(&self.state);
        }
    }
}

/// Serve one channel endpoint until it closes.
///
/// Requests are dispatched concurrently — a slow handler never blocks
/// later requests on the same channel, which is why responses may
/// resolve out of send order. With `once` set, a single request is
/// answered and the channel is dropped.
pub async fn serve_port(endpoint: Endpoint, handler: Handler, state: Arc<WorkerState>, once: bool) {
    let (sender, mut receiver) = endpoint.split();
    while let Some(frame) = receiver.recv().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("undecodable frame: {err}");
                continue;
            }
        };
        // The serving side only ever sees requests.
        let Frame::Request(request) = frame else {
            continue;
        };
        let id = request.id;
        state.job_started();
        let job = {
            let handler = handler.clone();
            let sender = sender.clone();
            let state = state.clone();
            async move {
                let response = dispatch(&handler, request).await;
                finish_job(&state);
                tracing::trace!(id, "served request");
                let _ = sender.post(Frame::Response(response));
            }
        };
        if once {
            job.await;
            break;
        }
        // Detached: an in-flight job survives the port closing, so the
        // job counter always returns to zero.
        tokio::spawn(job);
    }
}

async fn dispatch(handler: &Handler, request: Request) -> Response {
    let Request { id, mut args } = request;
    let result = match handler {
        Handler::Single(handler) => handler(args).await,
        Handler::Commands(set) => {
            if args.is_empty() {
                Err(WireError::with_kind("empty request", "codec"))
            } else {
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => other.to_string(),
                };
                match set.get(&name) {
                    Some(handler) => handler(args).await,
                    None => Err(WireError::with_kind(
                        format!("unknown command: {name}"),
                        "unknownCommand",
                    )),
                }
            }
        }
    };
    match result {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::err(id, err),
    }
}
