//! Cloud link: the reconciliation layer between the local index and a
//! drive.
//!
//! # Sync pass
//!
//! 1. A drive with no remote history and a fresh cursor is seeded with
//!    every local document (`on_first_sync`)
//! 2. Push: locally queued puts and deletes go up, unless the cursor
//!    already knows a newer remote revision (the pull will reconcile)
//! 3. Pull: page through the listing, fetch every entry whose revision
//!    differs from the cursor, resolve through `on_put`, and perform
//!    any push-back it requests
//! 4. Deletion detection: cursor entries absent from a complete listing
//!    go through `on_delete`
//!
//! The per-drive cursor (last seen remote revision per document plus
//! the page token of an interrupted listing) is persisted through the
//! state hooks so a sync resumes where it left off. Every remote
//! operation runs under the bounded exponential retry wrapper; this
//! layer reports only final outcomes.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::document::RemoteDoc;
use crate::drive::Drive;
use crate::hooks::{Progress, PutOutcome, SyncHooks};
use crate::retry::{with_retry, RetryConfig};
use crate::{Error, Result, Revision, SyncId};

/// Locally queued changes awaiting the next push phase.
#[derive(Debug, Default, Clone, PartialEq)]
struct PendingChanges {
    puts: HashMap<SyncId, Revision>,
    deletes: HashMap<SyncId, Revision>,
}

/// Persisted per-drive resumption cursor.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cursor {
    /// Last remote revision seen per document
    revisions: HashMap<SyncId, Revision>,
    /// Page token of an interrupted listing pass
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<Value>,
}

/// Mirrors a remote document store into the local index and back.
pub struct CloudLink {
    drive: Arc<dyn Drive>,
    hooks: Arc<dyn SyncHooks>,
    retry: RetryConfig,
    pending: Mutex<PendingChanges>,
    cursor: Mutex<Cursor>,
}

impl CloudLink {
    pub fn new(drive: Arc<dyn Drive>, hooks: Arc<dyn SyncHooks>, retry: RetryConfig) -> Self {
        Self {
            drive,
            hooks,
            retry,
            pending: Mutex::new(PendingChanges::default()),
            cursor: Mutex::new(Cursor::default()),
        }
    }

    /// Name of the drive this link mirrors.
    pub fn drive_name(&self) -> &str {
        self.drive.name()
    }

    /// Load the persisted cursor for this drive.
    pub async fn init(&self) -> Result<()> {
        let state = self.hooks.get_state(self.drive.name()).await;
        let cursor = state
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        *self.cursor.lock().await = cursor;
        Ok(())
    }

    /// Drop in-memory state; the persisted cursor is left to the caller.
    pub async fn uninit(&self) {
        *self.pending.lock().await = PendingChanges::default();
        *self.cursor.lock().await = Cursor::default();
    }

    /// Queue a local document for upload on the next push phase.
    pub async fn put(&self, id: SyncId, revision: Revision) {
        let mut pending = self.pending.lock().await;
        pending.deletes.remove(&id);
        pending.puts.insert(id, revision);
    }

    /// Queue a local deletion for the next push phase.
    pub async fn delete(&self, id: SyncId, revision: Revision) {
        let mut pending = self.pending.lock().await;
        pending.puts.remove(&id);
        pending.deletes.insert(id, revision);
    }

    /// Number of queued local changes (diagnostics).
    pub async fn pending_count(&self) -> usize {
        let pending = self.pending.lock().await;
        pending.puts.len() + pending.deletes.len()
    }

    /// Run a full reconciliation pass.
    pub async fn sync_now(&self) -> Result<()> {
        self.hooks.on_progress(Progress::Start);
        let outcome = self.run_sync().await;
        self.hooks.on_progress(Progress::End);
        outcome
    }

    async fn run_sync(&self) -> Result<()> {
        if self.is_first_contact().await? {
            return self.first_sync().await;
        }
        self.push_pending().await?;
        self.pull_changes().await
    }

    /// A drive with no remote history and no cursor gets seeded instead
    /// of reconciled.
    async fn is_first_contact(&self) -> Result<bool> {
        {
            let cursor = self.cursor.lock().await;
            if !cursor.revisions.is_empty() || cursor.page.is_some() {
                return Ok(false);
            }
        }
        let first = with_retry(&self.retry, || self.drive.list(None)).await?;
        Ok(first.entries.is_empty() && first.next.is_none())
    }

    async fn first_sync(&self) -> Result<()> {
        let docs = self.hooks.on_first_sync().await?;
        let total = docs.len();
        tracing::info!(drive = self.drive.name(), total, "seeding empty remote");
        for (done, doc) in docs.into_iter().enumerate() {
            let upload = RemoteDoc {
                sync_id: doc.sync_id.clone(),
                revision: doc.revision,
                payload: doc.payload,
            };
            let revision = with_retry(&self.retry, || self.drive.put(&upload)).await?;
            self.cursor
                .lock()
                .await
                .revisions
                .insert(upload.sync_id.clone(), revision);
            self.hooks.on_progress(Progress::Push {
                done: done + 1,
                total,
            });
        }
        self.save_cursor().await
    }

    async fn push_pending(&self) -> Result<()> {
        let snapshot = { self.pending.lock().await.clone() };
        let total = snapshot.puts.len() + snapshot.deletes.len();
        if total == 0 {
            return Ok(());
        }
        let mut done = 0;

        for (id, revision) in &snapshot.puts {
            let known = { self.cursor.lock().await.revisions.get(id).copied() };
            let superseded = known
                .is_some_and(|r| self.hooks.compare_revision(r, *revision) == Ordering::Greater);
            if !superseded {
                // A document can disappear locally between the queueing
                // and the push; nothing to upload then.
                if let Some(doc) = self.hooks.on_get(id).await {
                    let upload = RemoteDoc {
                        sync_id: id.clone(),
                        revision: doc.revision,
                        payload: doc.payload,
                    };
                    let new_revision = with_retry(&self.retry, || self.drive.put(&upload)).await?;
                    self.cursor
                        .lock()
                        .await
                        .revisions
                        .insert(id.clone(), new_revision);
                }
            }
            done += 1;
            self.hooks.on_progress(Progress::Push { done, total });
        }

        for (id, revision) in &snapshot.deletes {
            let known = { self.cursor.lock().await.revisions.get(id).copied() };
            let superseded = known
                .is_some_and(|r| self.hooks.compare_revision(r, *revision) == Ordering::Greater);
            if !superseded {
                with_retry(&self.retry, || self.drive.delete(id)).await?;
                self.cursor.lock().await.revisions.remove(id);
            }
            done += 1;
            self.hooks.on_progress(Progress::Push { done, total });
        }

        // Drop only what this pass processed; changes queued meanwhile
        // stay for the next one.
        {
            let mut pending = self.pending.lock().await;
            pending
                .puts
                .retain(|id, rev| snapshot.puts.get(id) != Some(rev));
            pending
                .deletes
                .retain(|id, rev| snapshot.deletes.get(id) != Some(rev));
        }
        self.save_cursor().await
    }

    async fn pull_changes(&self) -> Result<()> {
        let mut token = { self.cursor.lock().await.page.clone() };
        // Resuming mid-listing means this pass never saw the earlier
        // pages, so deletion detection has to wait for a full one.
        let resumed = token.is_some();
        let mut seen = Vec::new();
        let mut done = 0;
        let mut total = 0;

        loop {
            let current = token.clone();
            let page = with_retry(&self.retry, || self.drive.list(current.clone())).await?;
            total += page.entries.len();

            for entry in &page.entries {
                seen.push(entry.sync_id.clone());
                let known = { self.cursor.lock().await.revisions.get(&entry.sync_id).copied() };
                if known.is_some_and(|r| {
                    self.hooks.compare_revision(r, entry.revision) == Ordering::Equal
                }) {
                    continue;
                }
                let doc = with_retry(&self.retry, || self.drive.get(&entry.sync_id)).await?;
                match self.hooks.on_put(Some(doc)).await? {
                    PutOutcome::PushBack(local) => {
                        let upload = RemoteDoc {
                            sync_id: entry.sync_id.clone(),
                            revision: local.revision,
                            payload: local.payload,
                        };
                        let revision = with_retry(&self.retry, || self.drive.put(&upload)).await?;
                        self.cursor
                            .lock()
                            .await
                            .revisions
                            .insert(entry.sync_id.clone(), revision);
                    }
                    _ => {
                        self.cursor
                            .lock()
                            .await
                            .revisions
                            .insert(entry.sync_id.clone(), entry.revision);
                    }
                }
                done += 1;
                self.hooks.on_progress(Progress::Pull { done, total });
            }

            token = page.next;
            self.cursor.lock().await.page = token.clone();
            self.save_cursor().await?;
            if token.is_none() {
                break;
            }
        }

        if !resumed {
            self.detect_deletions(&seen).await?;
        }
        Ok(())
    }

    /// Anything the cursor knows that a complete listing no longer
    /// mentions was deleted remotely.
    async fn detect_deletions(&self, seen: &[SyncId]) -> Result<()> {
        let gone: Vec<(SyncId, Revision)> = {
            let cursor = self.cursor.lock().await;
            cursor
                .revisions
                .iter()
                .filter(|(id, _)| !seen.contains(*id))
                .map(|(id, rev)| (id.clone(), *rev))
                .collect()
        };
        if gone.is_empty() {
            return Ok(());
        }
        for (id, revision) in gone {
            let removed = self.hooks.on_delete(&id, revision).await?;
            tracing::debug!(sync_id = %id, removed, "remote deletion");
            self.cursor.lock().await.revisions.remove(&id);
        }
        self.save_cursor().await
    }

    async fn save_cursor(&self) -> Result<()> {
        let snapshot = { self.cursor.lock().await.clone() };
        let value = serde_json::to_value(&snapshot).map_err(|e| Error::Other(e.to_string()))?;
        self.hooks.set_state(self.drive.name(), Some(value)).await
    }
}
