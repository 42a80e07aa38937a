//! # Stylesync Engine
//!
//! Cloud synchronization engine for user styles.
//!
//! This crate reconciles a local style database against a remote,
//! possibly multi-device, possibly offline-edited document store. It
//! owns no storage of its own: the local index, preference store and
//! token handling are supplied by the embedder as trait objects, and
//! remote backends plug in behind the narrow [`Drive`] interface.
//!
//! ## Design Principles
//!
//! - **Latest wins**: conflicts are resolved by revision comparison,
//!   never merged
//! - **Single writer**: the controller is the only mutator of the sync
//!   status; everyone else sees read-only snapshots over a broadcast bus
//! - **Absorb sync failures**: a failed sync pass lands in the status
//!   record, not in the caller's lap; the next scheduled pass proceeds
//! - **Transient vs. broken**: network-class failures are retried with
//!   bounded exponential backoff and never shown to the user
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! A [`StyleDoc`] carries a local numeric id (renumberable), a stable
//! UUID-like [`SyncId`] (immutable once minted), a [`Revision`]
//! timestamp and an opaque payload.
//!
//! ### Drives
//!
//! A [`Drive`] is a pluggable remote document store exposing
//! `get`/`put`/`delete`/`list`. Drives are produced by name through the
//! [`DriveRegistry`], populated once at startup.
//!
//! ### The controller
//!
//! The [`SyncManager`] walks the connect → authenticate → full-sync →
//! incremental-sync → disconnect lifecycle and publishes every status
//! transition on its bus.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stylesync_engine::{
//!     Drive, DriveRegistry, MemoryDrive, MemoryPrefs, MemoryStore, StaticTokens, SyncManager,
//! };
//!
//! # async fn demo() -> stylesync_engine::Result<()> {
//! let drive = MemoryDrive::new("dropbox");
//! let mut registry = DriveRegistry::new();
//! {
//!     let drive = Arc::clone(&drive);
//!     registry.register("dropbox", move |_options| {
//!         Ok(Arc::clone(&drive) as Arc<dyn Drive>)
//!     });
//! }
//!
//! let manager = Arc::new(SyncManager::new(
//!     registry,
//!     Arc::new(StaticTokens::new()),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryPrefs::new()),
//! ));
//!
//! let mut updates = manager.subscribe();
//! manager.start(Some("dropbox")).await?;
//! manager.sync_now().await;
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod drive;
pub mod error;
pub mod hooks;
pub mod link;
pub mod manager;
pub mod memory;
pub mod retry;
pub mod revision;
pub mod status;

// Re-export main types at crate root
pub use document::{DocPage, RemoteDoc, RemoteEntry, SaveSource, StyleDoc, SyncId};
pub use drive::{AccessToken, Drive, DriveFactory, DriveRegistry, TokenManager, NO_LOGIN};
pub use error::{Error, Result};
pub use hooks::{PrefStore, Progress, PutOutcome, StyleStore, SyncHooks};
pub use link::CloudLink;
pub use manager::{
    SyncManager, DRIVE_OPTIONS_PREFIX, PREF_ENABLED, STATE_PREFIX, SYNC_INTERVAL,
};
pub use memory::{MemoryDrive, MemoryPrefs, MemoryStore, StaticTokens};
pub use retry::{with_retry, RetryConfig};
pub use revision::{compare_revision, revision_now, Revision};
pub use status::{
    error_badge, ErrorBadge, StatusBus, StatusUpdate, SyncState, SyncStatus, STATUS_METHOD,
};

/// Type aliases for clarity
pub type DocId = i64;
pub type DriveName = String;
