//! Hook contracts between the sync engine and its local collaborators.
//!
//! The engine does not own storage. It reads and writes the local style
//! index through [`StyleStore`], persists preferences and cursors
//! through [`PrefStore`], and drives reconciliation through the
//! [`SyncHooks`] callbacks supplied by the controller.

use crate::document::{RemoteDoc, SaveSource, StyleDoc};
use crate::{DocId, Result, Revision, SyncId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// What the local side decided about an incoming remote document.
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// The remote copy was accepted and stored locally
    Stored(StyleDoc),
    /// Local and remote revisions match; nothing to do
    Unchanged,
    /// The local copy is newer; push it back to the remote side
    PushBack(StyleDoc),
    /// Nothing usable arrived (tombstone-like null update); ignored
    Skipped,
}

/// Progress of a running sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum Progress {
    Start,
    Pull { done: usize, total: usize },
    Push { done: usize, total: usize },
    End,
}

/// Callbacks the reconciliation layer drives.
///
/// `on_put` returns an explicit [`PutOutcome`] rather than calling back
/// into the engine; the cloud link performs any push-back itself.
#[async_trait]
pub trait SyncHooks: Send + Sync {
    /// Current local content and revision for a sync id, if any.
    async fn on_get(&self, id: &SyncId) -> Option<StyleDoc>;

    /// Conflict resolution for an incoming remote document.
    async fn on_put(&self, doc: Option<RemoteDoc>) -> Result<PutOutcome>;

    /// Remote deletion; returns whether a local document was removed.
    async fn on_delete(&self, id: &SyncId, revision: Revision) -> Result<bool>;

    /// Called once when the drive has no remote-side history: every
    /// local document is pushed up as the initial seed.
    async fn on_first_sync(&self) -> Result<Vec<StyleDoc>>;

    /// Phase transitions of a running sync pass.
    fn on_progress(&self, progress: Progress);

    /// Total order over revisions.
    fn compare_revision(&self, a: Revision, b: Revision) -> Ordering {
        crate::revision::compare_revision(a, b)
    }

    /// Opaque per-drive resumption cursor.
    async fn get_state(&self, drive: &str) -> Option<Value>;

    /// Persist (`Some`) or clear (`None`) the per-drive cursor.
    async fn set_state(&self, drive: &str, state: Option<Value>) -> Result<()>;
}

/// The local document index the engine reads and writes through.
#[async_trait]
pub trait StyleStore: Send + Sync {
    /// Look a document up by its stable sync id.
    async fn get_by_sync_id(&self, id: &SyncId) -> Option<StyleDoc>;

    /// Look a document up by its local id.
    async fn get(&self, id: DocId) -> Option<StyleDoc>;

    /// Persist a document, assigning a local id if it has none, and
    /// notify downstream style handling of the save source.
    async fn save(&self, doc: StyleDoc, source: SaveSource) -> Result<DocId>;

    /// Remove a document.
    async fn remove(&self, id: DocId, source: SaveSource) -> Result<()>;

    /// Every document in the index.
    async fn all(&self) -> Vec<StyleDoc>;
}

/// Persisted key/value preferences: the active-drive choice, per-drive
/// options and resumption cursors.
#[async_trait]
pub trait PrefStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Option<Value>;
    async fn set_value(&self, key: &str, value: Value) -> Result<()>;
    async fn remove_value(&self, key: &str) -> Result<()>;
}
