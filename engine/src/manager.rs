//! Sync controller: the connect/login/sync/disconnect lifecycle.
//!
//! States move `Pending -> Connecting -> Connected -> Disconnecting ->
//! Disconnected`, re-entering `Connecting` on the next start. The
//! controller is the only writer of the status record; every other
//! context sees read-only snapshots over the broadcast bus.
//!
//! A persisted active-drive preference arms a deferred start: the next
//! operation connects using the stored credentials without prompting
//! for login. A `stop()` racing a `start()` is honored by checking the
//! `Disconnecting` state between the start steps.

use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::document::{RemoteDoc, SaveSource, StyleDoc};
use crate::drive::{DriveRegistry, TokenManager, NO_LOGIN};
use crate::hooks::{PrefStore, Progress, PutOutcome, StyleStore, SyncHooks};
use crate::link::CloudLink;
use crate::retry::RetryConfig;
use crate::revision::compare_revision;
use crate::status::{self, ErrorBadge, StatusBus, StatusUpdate, SyncState, SyncStatus};
use crate::{Error, Result, Revision, SyncId};

/// Preference key holding the active drive name (`"none"` when off).
pub const PREF_ENABLED: &str = "sync.enabled";
/// Key prefix for the per-drive resumption cursor blobs.
pub const STATE_PREFIX: &str = "sync/state/";
/// Key prefix for persisted drive options.
pub const DRIVE_OPTIONS_PREFIX: &str = "secure/sync/driveOptions/";
/// How often the embedder should schedule incremental syncs.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30 * 60);

type BoxedStart<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Status record plus its broadcast bus; the one place status mutates.
struct StatusCell {
    status: std::sync::Mutex<SyncStatus>,
    last_error: std::sync::Mutex<Option<Error>>,
    bus: StatusBus,
}

impl StatusCell {
    fn new() -> Self {
        Self {
            status: std::sync::Mutex::new(SyncStatus::default()),
            last_error: std::sync::Mutex::new(None),
            bus: StatusBus::new(),
        }
    }

    fn snapshot(&self) -> SyncStatus {
        self.status.lock().unwrap().clone()
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        f(&mut self.status.lock().unwrap());
    }

    fn set_error(&self, err: Option<Error>) {
        self.update(|s| s.error_message = err.as_ref().map(Error::user_message));
        *self.last_error.lock().unwrap() = err;
    }

    fn has_error(&self) -> bool {
        self.last_error.lock().unwrap().is_some()
    }

    fn last_error(&self) -> Option<Error> {
        self.last_error.lock().unwrap().clone()
    }

    /// Broadcast the current snapshot.
    fn emit(&self) {
        self.bus.publish(self.snapshot());
    }
}

/// The currently connected drive session.
struct ActiveSession {
    name: String,
    link: Arc<CloudLink>,
}

/// Orchestrates the sync lifecycle against one drive at a time.
///
/// All shared state lives behind `Arc`s, so clones are cheap handles
/// onto the same controller.
#[derive(Clone)]
pub struct SyncManager {
    registry: DriveRegistry,
    tokens: Arc<dyn TokenManager>,
    prefs: Arc<dyn PrefStore>,
    hooks: Arc<IndexHooks>,
    retry: RetryConfig,
    cell: Arc<StatusCell>,
    active: Arc<tokio::sync::Mutex<Option<ActiveSession>>>,
    delayed_init: Arc<std::sync::Mutex<Option<String>>>,
}

impl SyncManager {
    pub fn new(
        registry: DriveRegistry,
        tokens: Arc<dyn TokenManager>,
        store: Arc<dyn StyleStore>,
        prefs: Arc<dyn PrefStore>,
    ) -> Self {
        let cell = Arc::new(StatusCell::new());
        let hooks = Arc::new(IndexHooks {
            store,
            prefs: prefs.clone(),
            cell: cell.clone(),
        });
        Self {
            registry,
            tokens,
            prefs,
            hooks,
            retry: RetryConfig::default(),
            cell,
            active: Arc::new(tokio::sync::Mutex::new(None)),
            delayed_init: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Override the per-operation retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Arm the deferred start from the persisted preference, if it
    /// names a registered drive. The next operation connects.
    pub async fn resume_from_prefs(&self) {
        match self.prefs.get_value(PREF_ENABLED).await {
            Some(Value::String(name)) if self.registry.contains(&name) => {
                tracing::debug!(drive = %name, "deferred sync start armed");
                *self.delayed_init.lock().unwrap() = Some(name);
            }
            _ => self.cell.update(|s| s.state = SyncState::Disconnected),
        }
    }

    /// Connect to a drive and run a full sync.
    ///
    /// `None` consumes the armed deferred start. A session that is
    /// already active makes this a no-op; an unknown provider fails
    /// without touching the status record.
    pub async fn start(&self, name: Option<&str>) -> Result<()> {
        let armed = self.delayed_init.lock().unwrap().take();
        let (name, is_init) = match name {
            Some(n) => (n.to_string(), armed.as_deref() == Some(n)),
            None => match armed {
                Some(n) => (n, true),
                None => return Err(Error::Other("no sync drive configured".into())),
            },
        };

        let link = {
            let mut active = self.active.lock().await;
            if active.is_some() {
                // Drive already active: no second session.
                return Ok(());
            }
            let options = self.drive_options(&name).await;
            let drive = self.registry.create(&name, options)?;
            let link = Arc::new(CloudLink::new(
                drive,
                self.hooks.clone() as Arc<dyn SyncHooks>,
                self.retry,
            ));
            *active = Some(ActiveSession {
                name: name.clone(),
                link: link.clone(),
            });
            link
        };

        self.cell.update(|s| {
            s.state = SyncState::Connecting;
            s.current_drive_name = Some(name.clone());
        });
        self.cell.emit();

        if is_init || NO_LOGIN.contains(&name.as_str()) {
            self.cell.update(|s| s.login = true);
        } else if let Err(err) = self.login(Some(&name)).await {
            tracing::error!(drive = %name, "login failed: {err}");
            self.cell.set_error(Some(err.clone()));
            self.cell.emit();
            self.stop().await;
            return Err(err);
        }

        link.init().await?;
        if self.cell.snapshot().state == SyncState::Disconnecting {
            // A concurrent stop() is unwinding; let it finish.
            return Ok(());
        }

        self.sync_now().await;
        self.prefs
            .set_value(PREF_ENABLED, Value::String(name.clone()))
            .await?;
        self.cell.update(|s| s.state = SyncState::Connected);
        self.cell.emit();
        tracing::info!(drive = %name, "sync connected");
        Ok(())
    }

    /// Disconnect, revoke the grant, and clear persisted state.
    ///
    /// Each teardown step is attempted even if earlier ones fail.
    pub fn stop(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.delayed_init.lock().unwrap().is_some() {
                // An armed start never produced a session; run it once so
                // there is something real to unwind.
                self.cell.update(|s| s.state = SyncState::Disconnecting);
                let start: BoxedStart<'_> = Box::pin(self.start(None));
                if let Err(err) = start.await {
                    tracing::debug!("deferred start during stop failed: {err}");
                }
            }
            let session = { self.active.lock().await.take() };
            let Some(session) = session else { return };

            self.cell.update(|s| s.state = SyncState::Disconnecting);
            self.cell.emit();

            session.link.uninit().await;
            if let Err(err) = self.tokens.revoke_token(&session.name).await {
                tracing::warn!(drive = %session.name, "token revocation failed: {err}");
            }
            if let Err(err) = self
                .prefs
                .remove_value(&format!("{STATE_PREFIX}{}", session.name))
                .await
            {
                tracing::warn!(drive = %session.name, "failed to clear sync cursor: {err}");
            }
            if let Err(err) = self
                .prefs
                .set_value(PREF_ENABLED, Value::String("none".into()))
                .await
            {
                tracing::warn!("failed to persist sync preference: {err}");
            }

            self.cell.update(|s| {
                s.state = SyncState::Disconnected;
                s.current_drive_name = None;
                s.login = false;
            });
            self.cell.emit();
            tracing::info!(drive = %session.name, "sync disconnected");
        })
    }

    /// Revoke and re-acquire the grant for a drive, interactively.
    pub async fn login(&self, name: Option<&str>) -> Result<()> {
        self.ensure_started().await;
        let name = match name {
            Some(n) => n.to_string(),
            None => {
                let active = self.active.lock().await;
                active
                    .as_ref()
                    .map(|s| s.name.clone())
                    .ok_or_else(|| Error::Other("no drive connected".into()))?
            }
        };
        self.tokens.revoke_token(&name).await?;
        let result = self.tokens.get_token(&name, true).await;
        self.cell.update(|s| s.login = result.is_ok());
        self.cell.emit();
        result.map(|_| ())
    }

    /// Run a full reconciliation pass.
    ///
    /// Syncing while disconnected or logged out is a benign no-op.
    /// Failures never propagate: they are absorbed into the status
    /// record and the next scheduled sync proceeds normally.
    pub async fn sync_now(&self) {
        self.ensure_started().await;
        let link = { self.active.lock().await.as_ref().map(|s| s.link.clone()) };
        let link = match link {
            Some(link) if self.cell.snapshot().login => link,
            _ => {
                tracing::warn!("cannot sync when disconnected");
                return;
            }
        };
        match link.sync_now().await {
            Ok(()) => self.cell.set_error(None),
            Err(err) => {
                tracing::warn!("sync failed: {err}");
                if err.is_grant() {
                    self.cell.update(|s| s.login = false);
                }
                self.cell.set_error(Some(err));
            }
        }
        self.cell.emit();
    }

    /// Queue a locally saved document for upload.
    pub async fn put_doc(&self, doc: &StyleDoc) {
        self.ensure_started().await;
        let link = { self.active.lock().await.as_ref().map(|s| s.link.clone()) };
        if let Some(link) = link {
            link.put(doc.sync_id.clone(), doc.revision).await;
        }
    }

    /// Queue a local deletion for upload.
    pub async fn remove(&self, id: &SyncId, revision: Revision) {
        self.ensure_started().await;
        let link = { self.active.lock().await.as_ref().map(|s| s.link.clone()) };
        if let Some(link) = link {
            link.delete(id.clone(), revision).await;
        }
    }

    /// Current status snapshot.
    ///
    /// An armed deferred start is kicked off in the background; its
    /// updates flow out over the broadcast bus rather than blocking the
    /// caller.
    pub fn get_status(&self) -> SyncStatus {
        if self.delayed_init.lock().unwrap().is_some() {
            let manager = self.clone();
            tokio::spawn(async move { manager.ensure_started().await });
        }
        self.cell.snapshot()
    }

    /// Subscribe to status snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.cell.bus.subscribe()
    }

    /// Visible error indicator, if the connection is broken.
    pub fn error_badge(&self) -> Option<ErrorBadge> {
        let snapshot = self.cell.snapshot();
        let last_error = self.cell.last_error();
        status::error_badge(&snapshot, last_error.as_ref())
    }

    /// Persist options for a drive under its scoped key.
    pub async fn set_drive_options(&self, drive: &str, options: Value) -> Result<()> {
        self.prefs
            .set_value(&format!("{DRIVE_OPTIONS_PREFIX}{drive}"), options)
            .await
    }

    /// Stored options for a drive; empty object when none.
    pub async fn drive_options(&self, drive: &str) -> Value {
        self.prefs
            .get_value(&format!("{DRIVE_OPTIONS_PREFIX}{drive}"))
            .await
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    fn ensure_started(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.delayed_init.lock().unwrap().is_some() {
                let start: BoxedStart<'_> = Box::pin(self.start(None));
                if let Err(err) = start.await {
                    tracing::warn!("deferred sync start failed: {err}");
                }
            }
        })
    }
}

/// Hook wiring between the reconciliation layer and the style index.
///
/// Carries the controller's conflict policy: last write wins by
/// revision, ties favor no change, and a remote deletion never clobbers
/// a newer local edit.
struct IndexHooks {
    store: Arc<dyn StyleStore>,
    prefs: Arc<dyn PrefStore>,
    cell: Arc<StatusCell>,
}

#[async_trait::async_trait]
impl SyncHooks for IndexHooks {
    async fn on_get(&self, id: &SyncId) -> Option<StyleDoc> {
        self.store.get_by_sync_id(id).await
    }

    async fn on_put(&self, doc: Option<RemoteDoc>) -> Result<PutOutcome> {
        // A tombstone-like null update carries nothing to apply.
        let Some(doc) = doc else {
            return Ok(PutOutcome::Skipped);
        };
        let local = self.store.get_by_sync_id(&doc.sync_id).await;
        match local {
            Some(local) => match compare_revision(local.revision, doc.revision) {
                Ordering::Greater => Ok(PutOutcome::PushBack(local)),
                Ordering::Equal => Ok(PutOutcome::Unchanged),
                Ordering::Less => {
                    // Accept the remote copy, re-keyed to the local id.
                    let incoming = StyleDoc {
                        id: local.id,
                        sync_id: doc.sync_id,
                        revision: doc.revision,
                        payload: doc.payload,
                    };
                    let id = self.store.save(incoming.clone(), SaveSource::Sync).await?;
                    Ok(PutOutcome::Stored(StyleDoc {
                        id: Some(id),
                        ..incoming
                    }))
                }
            },
            None => {
                // New document: the local store assigns the identity.
                let incoming = StyleDoc {
                    id: None,
                    sync_id: doc.sync_id,
                    revision: doc.revision,
                    payload: doc.payload,
                };
                let id = self.store.save(incoming.clone(), SaveSource::Sync).await?;
                Ok(PutOutcome::Stored(StyleDoc {
                    id: Some(id),
                    ..incoming
                }))
            }
        }
    }

    async fn on_delete(&self, id: &SyncId, revision: Revision) -> Result<bool> {
        let Some(local) = self.store.get_by_sync_id(id).await else {
            return Ok(false);
        };
        // A remote deletion must not clobber a newer local edit.
        if compare_revision(local.revision, revision) == Ordering::Greater {
            return Ok(false);
        }
        match local.id {
            Some(doc_id) => {
                self.store.remove(doc_id, SaveSource::Sync).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn on_first_sync(&self) -> Result<Vec<StyleDoc>> {
        Ok(self.store.all().await)
    }

    fn on_progress(&self, progress: Progress) {
        self.cell.update(|s| match &progress {
            Progress::Start => s.syncing = true,
            Progress::End => {
                s.syncing = false;
                s.progress = None;
            }
            other => s.progress = Some(other.clone()),
        });
        // A progressing sync means the previous error is stale.
        if self.cell.has_error() {
            self.cell.set_error(None);
        }
        self.cell.emit();
    }

    async fn get_state(&self, drive: &str) -> Option<Value> {
        self.prefs.get_value(&format!("{STATE_PREFIX}{drive}")).await
    }

    async fn set_state(&self, drive: &str, state: Option<Value>) -> Result<()> {
        let key = format!("{STATE_PREFIX}{drive}");
        match state {
            Some(value) => self.prefs.set_value(&key, value).await,
            None => self.prefs.remove_value(&key).await,
        }
    }
}
