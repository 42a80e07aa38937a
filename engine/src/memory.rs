//! In-memory reference implementations of the collaborator traits.
//!
//! These back the test suites and give embedders a working starting
//! point: a style index, a preference store, a token manager with
//! injectable failures, and a drive that mimics a paginated remote
//! document store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::document::{DocPage, RemoteDoc, RemoteEntry, SaveSource, StyleDoc};
use crate::drive::{AccessToken, Drive, TokenManager};
use crate::hooks::{PrefStore, StyleStore};
use crate::{DocId, Error, Result, Revision, SyncId};

/// In-memory style index with a sync-id lookup table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: DashMap<DocId, StyleDoc>,
    by_sync_id: DashMap<SyncId, DocId>,
    next_id: AtomicI64,
    save_log: Mutex<Vec<(DocId, SaveSource)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Insert a document directly, as a user edit would.
    pub fn insert(&self, doc: StyleDoc) -> DocId {
        let id = doc
            .id
            .unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut doc = doc;
        doc.id = Some(id);
        self.by_sync_id.insert(doc.sync_id.clone(), id);
        self.docs.insert(id, doc);
        id
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Saves that arrived through the sync engine.
    pub fn sync_saves(&self) -> usize {
        self.save_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, source)| *source == SaveSource::Sync)
            .count()
    }
}

#[async_trait]
impl StyleStore for MemoryStore {
    async fn get_by_sync_id(&self, id: &SyncId) -> Option<StyleDoc> {
        let doc_id = *self.by_sync_id.get(id)?;
        self.docs.get(&doc_id).map(|d| d.value().clone())
    }

    async fn get(&self, id: DocId) -> Option<StyleDoc> {
        self.docs.get(&id).map(|d| d.value().clone())
    }

    async fn save(&self, doc: StyleDoc, source: SaveSource) -> Result<DocId> {
        let id = self.insert(doc);
        self.save_log.lock().unwrap().push((id, source));
        Ok(id)
    }

    async fn remove(&self, id: DocId, _source: SaveSource) -> Result<()> {
        if let Some((_, doc)) = self.docs.remove(&id) {
            self.by_sync_id.remove(&doc.sync_id);
        }
        Ok(())
    }

    async fn all(&self) -> Vec<StyleDoc> {
        self.docs.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// In-memory preference store.
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: DashMap<String, Value>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek for assertions.
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }
}

#[async_trait]
impl PrefStore for MemoryPrefs {
    async fn get_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    async fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_value(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Token manager handing out a static token, with switchable failures.
#[derive(Debug, Default)]
pub struct StaticTokens {
    deny: AtomicBool,
    revoke_fails: AtomicBool,
    grants: AtomicI64,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `get_token` fail with a grant error.
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Make `revoke_token` fail.
    pub fn fail_revoke(&self, fail: bool) {
        self.revoke_fails.store(fail, Ordering::SeqCst);
    }

    /// Number of successful grants handed out.
    pub fn grant_count(&self) -> i64 {
        self.grants.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenManager for StaticTokens {
    async fn get_token(&self, drive: &str, _interactive: bool) -> Result<AccessToken> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(Error::Http {
                code: 401,
                message: format!("grant rejected for {drive}"),
            });
        }
        self.grants.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken(format!("token-{drive}")))
    }

    async fn revoke_token(&self, drive: &str) -> Result<()> {
        if self.revoke_fails.load(Ordering::SeqCst) {
            return Err(Error::Other(format!("revocation endpoint down for {drive}")));
        }
        Ok(())
    }
}

/// In-memory drive mimicking a paginated remote document store.
///
/// Stored revisions are whatever the pushed documents carry, so the
/// last-write-wins comparison stays on one scale. Failures can be
/// injected per operation.
#[derive(Debug)]
pub struct MemoryDrive {
    name: String,
    docs: DashMap<SyncId, (Revision, Value)>,
    page_size: usize,
    failures: Mutex<VecDeque<Error>>,
}

impl MemoryDrive {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_page_size(name, 1000)
    }

    pub fn with_page_size(name: impl Into<String>, page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            docs: DashMap::new(),
            page_size,
            failures: Mutex::new(VecDeque::new()),
        })
    }

    /// Place a document remotely with an explicit revision.
    pub fn seed(&self, id: SyncId, revision: Revision, payload: Value) {
        self.docs.insert(id, (revision, payload));
    }

    /// Remove a document remotely, as another device would.
    pub fn erase(&self, id: &SyncId) {
        self.docs.remove(id);
    }

    pub fn contents(&self, id: &SyncId) -> Option<(Revision, Value)> {
        self.docs.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Queue `count` copies of an error; each operation consumes one.
    pub fn inject_failures(&self, err: Error, count: usize) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(err.clone());
        }
    }

    fn take_failure(&self) -> Option<Error> {
        self.failures.lock().unwrap().pop_front()
    }

    fn sorted_entries(&self) -> Vec<RemoteEntry> {
        let mut entries: Vec<RemoteEntry> = self
            .docs
            .iter()
            .map(|entry| RemoteEntry {
                sync_id: entry.key().clone(),
                revision: entry.value().0,
            })
            .collect();
        entries.sort_by_key(|e| e.sync_id.to_string());
        entries
    }
}

#[async_trait]
impl Drive for MemoryDrive {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &SyncId) -> Result<RemoteDoc> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let entry = self.docs.get(id).ok_or_else(|| Error::Http {
            code: 404,
            message: format!("no document {id}"),
        })?;
        Ok(RemoteDoc {
            sync_id: id.clone(),
            revision: entry.0,
            payload: entry.1.clone(),
        })
    }

    async fn put(&self, doc: &RemoteDoc) -> Result<Revision> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.docs
            .insert(doc.sync_id.clone(), (doc.revision, doc.payload.clone()));
        Ok(doc.revision)
    }

    async fn delete(&self, id: &SyncId) -> Result<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.docs.remove(id);
        Ok(())
    }

    async fn list(&self, page: Option<Value>) -> Result<DocPage> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let offset = page.and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let entries = self.sorted_entries();
        let slice: Vec<RemoteEntry> = entries
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let next = if offset + slice.len() < entries.len() {
            Some(Value::from((offset + self.page_size) as u64))
        } else {
            None
        };
        Ok(DocPage {
            entries: slice,
            next,
        })
    }
}
