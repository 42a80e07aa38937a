//! Drive abstraction: pluggable remote document stores.
//!
//! A drive exposes the narrow surface the sync engine needs
//! (`get`/`put`/`delete`/`list`) plus token acquisition keyed by drive
//! name. Concrete backends (Google Drive, Dropbox, OneDrive, WebDAV,
//! ...) live outside this crate; the registry maps names to factories
//! and is populated once at startup.

use crate::document::{DocPage, RemoteDoc};
use crate::{DriveName, Error, Result, Revision, SyncId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Drives that authenticate out of band (e.g. self-hosted WebDAV) and
/// skip token acquisition on connect.
pub const NO_LOGIN: &[&str] = &["webdav"];

/// Bearer token for a drive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

/// A remote document store.
///
/// The sync engine is agnostic to which backend is plugged in; at most
/// one drive is active at a time.
#[async_trait]
pub trait Drive: Send + Sync {
    /// Registered name of this drive.
    fn name(&self) -> &str;

    /// Fetch a document's revision and content.
    async fn get(&self, id: &SyncId) -> Result<RemoteDoc>;

    /// Store a document (content plus its revision marker), returning
    /// the revision the remote side recorded.
    async fn put(&self, doc: &RemoteDoc) -> Result<Revision>;

    /// Delete a document.
    async fn delete(&self, id: &SyncId) -> Result<()>;

    /// One page of the remote listing; pass the previous page's `next`
    /// token to continue, `None` to start from the beginning.
    async fn list(&self, page: Option<Value>) -> Result<DocPage>;
}

/// Token acquisition and revocation, keyed by drive name.
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Acquire an access token; `interactive` allows prompting the user.
    async fn get_token(&self, drive: &str, interactive: bool) -> Result<AccessToken>;

    /// Revoke whatever grant is held for the drive.
    async fn revoke_token(&self, drive: &str) -> Result<()>;
}

/// Factory producing a drive instance from its persisted options.
pub type DriveFactory = Arc<dyn Fn(Value) -> Result<Arc<dyn Drive>> + Send + Sync>;

/// Static name-to-factory mapping, populated once at startup.
#[derive(Default, Clone)]
pub struct DriveRegistry {
    factories: HashMap<DriveName, DriveFactory>,
}

impl DriveRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a drive factory under a name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Value) -> Result<Arc<dyn Drive>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Whether a drive name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate a drive by name.
    pub fn create(&self, name: &str, options: Value) -> Result<Arc<dyn Drive>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))?;
        factory(options)
    }
}
