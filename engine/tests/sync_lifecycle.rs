//! Integration tests for the sync controller lifecycle.

use std::sync::Arc;

use serde_json::{json, Value};
use stylesync_engine::{
    Drive, DriveRegistry, Error, MemoryDrive, MemoryPrefs, MemoryStore, PrefStore, RetryConfig,
    SaveSource, StaticTokens, StyleDoc, StyleStore, SyncId, SyncManager, SyncState, PREF_ENABLED,
    STATE_PREFIX,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stylesync_engine=debug".into()),
        )
        .try_init();
}

struct Fixture {
    drive: Arc<MemoryDrive>,
    tokens: Arc<StaticTokens>,
    store: Arc<MemoryStore>,
    prefs: Arc<MemoryPrefs>,
    manager: Arc<SyncManager>,
}

/// Wire a manager against in-memory collaborators and a single
/// registered drive named `drivex` (plus a login-less `webdav`).
fn fixture() -> Fixture {
    init_tracing();
    let drive = MemoryDrive::new("drivex");
    let webdav = MemoryDrive::new("webdav");
    let tokens = Arc::new(StaticTokens::new());
    let store = Arc::new(MemoryStore::new());
    let prefs = Arc::new(MemoryPrefs::new());

    let mut registry = DriveRegistry::new();
    {
        let drive = Arc::clone(&drive);
        registry.register("drivex", move |_options| {
            Ok(Arc::clone(&drive) as Arc<dyn Drive>)
        });
    }
    {
        let webdav = Arc::clone(&webdav);
        registry.register("webdav", move |_options| {
            Ok(Arc::clone(&webdav) as Arc<dyn Drive>)
        });
    }

    let manager = Arc::new(
        SyncManager::new(
            registry,
            tokens.clone(),
            store.clone(),
            prefs.clone(),
        )
        .with_retry_config(RetryConfig {
            max_attempts: 2,
            exp: 1.0,
            delay: 0.0,
        }),
    );

    Fixture {
        drive,
        tokens,
        store,
        prefs,
        manager,
    }
}

#[tokio::test]
async fn start_connects_and_persists_preference() {
    let f = fixture();
    f.store.insert(StyleDoc::new(json!({"name": "a"}), 1000));
    f.store.insert(StyleDoc::new(json!({"name": "b"}), 2000));

    f.manager.start(Some("drivex")).await.unwrap();

    let status = f.manager.get_status();
    assert_eq!(status.state, SyncState::Connected);
    assert_eq!(status.current_drive_name.as_deref(), Some("drivex"));
    assert!(status.login);
    assert_eq!(f.prefs.peek(PREF_ENABLED), Some(Value::from("drivex")));
    // Empty remote: the first sync seeded both local documents.
    assert_eq!(f.drive.len(), 2);
}

#[tokio::test]
async fn start_unknown_provider_fails_without_state_change() {
    let f = fixture();
    let before = f.manager.get_status();

    let result = f.manager.start(Some("nimbus")).await;
    assert!(matches!(result, Err(Error::UnknownProvider(name)) if name == "nimbus"));
    assert_eq!(f.manager.get_status(), before);
}

#[tokio::test]
async fn start_twice_is_a_noop() {
    let f = fixture();
    f.manager.start(Some("drivex")).await.unwrap();
    let grants = f.tokens.grant_count();

    // Same drive or another: both are rejected by the active-session guard.
    f.manager.start(Some("drivex")).await.unwrap();
    f.manager.start(Some("webdav")).await.unwrap();

    assert_eq!(f.tokens.grant_count(), grants);
    let status = f.manager.get_status();
    assert_eq!(status.current_drive_name.as_deref(), Some("drivex"));
}

#[tokio::test]
async fn stop_clears_state_even_if_revocation_fails() {
    let f = fixture();
    f.manager.start(Some("drivex")).await.unwrap();
    assert!(f.prefs.peek(&format!("{STATE_PREFIX}drivex")).is_some());

    f.tokens.fail_revoke(true);
    f.manager.stop().await;

    let status = f.manager.get_status();
    assert_eq!(status.state, SyncState::Disconnected);
    assert!(status.current_drive_name.is_none());
    assert!(!status.login);
    assert_eq!(f.prefs.peek(PREF_ENABLED), Some(Value::from("none")));
    assert!(f.prefs.peek(&format!("{STATE_PREFIX}drivex")).is_none());
}

#[tokio::test]
async fn sync_while_disconnected_is_a_benign_noop() {
    let f = fixture();
    let before = f.manager.get_status();
    f.manager.sync_now().await;
    assert_eq!(f.manager.get_status(), before);
}

#[tokio::test]
async fn login_failure_unwinds_start() {
    let f = fixture();
    f.tokens.deny(true);

    let result = f.manager.start(Some("drivex")).await;
    assert!(matches!(result, Err(Error::Http { code: 401, .. })));

    let status = f.manager.get_status();
    assert_eq!(status.state, SyncState::Disconnected);
    assert!(!status.login);
}

#[tokio::test]
async fn pull_applies_remote_documents() {
    let f = fixture();
    let id = SyncId::new();
    f.drive.seed(id.clone(), 5000, json!({"name": "remote"}));

    f.manager.start(Some("drivex")).await.unwrap();

    assert_eq!(f.store.len(), 1);
    assert_eq!(f.store.sync_saves(), 1);
}

#[tokio::test]
async fn newer_local_copy_is_pushed_back() {
    let f = fixture();
    let local = StyleDoc::new(json!({"name": "local, newer"}), 9000);
    let id = local.sync_id.clone();
    f.store.insert(local);
    f.drive.seed(id.clone(), 1000, json!({"name": "remote, stale"}));

    f.manager.start(Some("drivex")).await.unwrap();

    let (_, payload) = f.drive.contents(&id).unwrap();
    assert_eq!(payload, json!({"name": "local, newer"}));
    // Local side untouched, no sync-sourced save happened.
    assert_eq!(f.store.sync_saves(), 0);
}

#[tokio::test]
async fn remote_deletion_respects_newer_local_edit() {
    let f = fixture();
    let id = SyncId::new();
    f.drive.seed(id.clone(), 5000, json!({"name": "shared"}));
    f.manager.start(Some("drivex")).await.unwrap();
    assert_eq!(f.store.len(), 1);

    // Another device deletes it remotely, but the local copy has moved on.
    f.drive.erase(&id);
    let mut newer = f.store.get_by_sync_id(&id).await.unwrap();
    newer.revision = 9000;
    f.store.insert(newer);

    f.manager.sync_now().await;
    assert_eq!(f.store.len(), 1, "newer local edit must survive");
}

#[tokio::test]
async fn remote_deletion_removes_stale_local_copy() {
    let f = fixture();
    let id = SyncId::new();
    f.drive.seed(id.clone(), 5000, json!({"name": "shared"}));
    f.manager.start(Some("drivex")).await.unwrap();
    assert_eq!(f.store.len(), 1);

    f.drive.erase(&id);
    f.manager.sync_now().await;
    assert_eq!(f.store.len(), 0);
}

#[tokio::test]
async fn grant_error_demotes_login() {
    let f = fixture();
    f.manager.start(Some("drivex")).await.unwrap();

    f.drive.seed(SyncId::new(), 7000, json!({"name": "x"}));
    f.drive.inject_failures(
        Error::Http {
            code: 401,
            message: "unauthorized".into(),
        },
        1,
    );
    f.manager.sync_now().await;

    let status = f.manager.get_status();
    assert!(!status.login);
    let badge = f.manager.error_badge().unwrap();
    assert_eq!(badge.text, "x");
    assert!(badge.title.contains("re-login"));
}

#[tokio::test]
async fn network_errors_keep_login_and_badge_silent() {
    let f = fixture();
    f.manager.start(Some("drivex")).await.unwrap();

    f.drive.seed(SyncId::new(), 7000, json!({"name": "x"}));
    // Exhaust every retry attempt with transient failures.
    f.drive.inject_failures(Error::Network("failed to fetch".into()), 4);
    f.manager.sync_now().await;

    let status = f.manager.get_status();
    assert!(status.login, "transient failures must not demote login");
    assert!(status.error_message.is_some());
    assert!(f.manager.error_badge().is_none());
    assert_eq!(status.state, SyncState::Connected);
}

#[tokio::test]
async fn lock_error_renders_expiry_in_message() {
    let f = fixture();
    f.manager.start(Some("drivex")).await.unwrap();

    f.drive.seed(SyncId::new(), 7000, json!({"name": "x"}));
    f.drive.inject_failures(
        Error::RemoteLocked {
            expire: 1706745600000,
        },
        1,
    );
    f.manager.sync_now().await;

    let status = f.manager.get_status();
    let message = status.error_message.unwrap();
    assert!(message.contains("locked by another sync session"));
    assert!(!message.contains("1706745600000"));
}

#[tokio::test]
async fn successful_sync_clears_previous_error() {
    let f = fixture();
    f.manager.start(Some("drivex")).await.unwrap();

    f.drive.seed(SyncId::new(), 7000, json!({"name": "x"}));
    f.drive
        .inject_failures(Error::Other("remote exploded".into()), 1);
    f.manager.sync_now().await;
    assert!(f.manager.get_status().error_message.is_some());

    f.manager.sync_now().await;
    assert!(f.manager.get_status().error_message.is_none());
    assert!(f.manager.error_badge().is_none());
}

#[tokio::test]
async fn webdav_connects_without_login() {
    let f = fixture();
    f.tokens.deny(true);

    f.manager.start(Some("webdav")).await.unwrap();

    let status = f.manager.get_status();
    assert_eq!(status.state, SyncState::Connected);
    assert!(status.login);
    assert_eq!(f.tokens.grant_count(), 0);
}

#[tokio::test]
async fn deferred_init_skips_login_prompt() {
    let f = fixture();
    f.prefs
        .set_value(PREF_ENABLED, Value::from("drivex"))
        .await
        .unwrap();
    f.manager.resume_from_prefs().await;

    // Credentials are assumed valid on the init path; denying new
    // grants proves no prompt happened.
    f.tokens.deny(true);
    f.manager.sync_now().await;

    let status = f.manager.get_status();
    assert_eq!(status.state, SyncState::Connected);
    assert!(status.login);
    assert_eq!(f.tokens.grant_count(), 0);
}

#[tokio::test]
async fn paginated_listing_pulls_every_page() {
    let f = fixture();
    let drive = MemoryDrive::with_page_size("paged", 1);
    for revision in [1000, 2000, 3000] {
        drive.seed(SyncId::new(), revision, json!({"rev": revision}));
    }
    let mut registry = DriveRegistry::new();
    {
        let drive = Arc::clone(&drive);
        registry.register("paged", move |_options| {
            Ok(Arc::clone(&drive) as Arc<dyn Drive>)
        });
    }
    let manager = Arc::new(SyncManager::new(
        registry,
        f.tokens.clone(),
        f.store.clone(),
        f.prefs.clone(),
    ));

    manager.start(Some("paged")).await.unwrap();

    assert_eq!(f.store.len(), 3);
    // The resumption cursor was persisted under the drive-scoped key.
    assert!(f.prefs.peek(&format!("{STATE_PREFIX}paged")).is_some());
}

#[tokio::test]
async fn status_updates_flow_over_the_bus() {
    let f = fixture();
    let mut updates = f.manager.subscribe();

    f.manager.start(Some("drivex")).await.unwrap();

    let mut states = Vec::new();
    while let Ok(update) = updates.try_recv() {
        assert_eq!(update.method, "syncStatusUpdate");
        states.push(update.status.state);
    }
    assert!(states.contains(&SyncState::Connecting));
    assert_eq!(states.last(), Some(&SyncState::Connected));
}

#[tokio::test]
async fn locally_saved_doc_is_uploaded_on_next_sync() {
    let f = fixture();
    f.manager.start(Some("drivex")).await.unwrap();

    let doc = StyleDoc::new(json!({"name": "fresh"}), 4000);
    let id = doc.sync_id.clone();
    f.store.insert(doc.clone());
    f.manager.put_doc(&doc).await;
    f.manager.sync_now().await;

    assert!(f.drive.contents(&id).is_some());
}

#[tokio::test]
async fn local_removal_deletes_remote_copy() {
    let f = fixture();
    let doc = StyleDoc::new(json!({"name": "doomed"}), 4000);
    let id = doc.sync_id.clone();
    f.store.insert(doc.clone());
    f.manager.start(Some("drivex")).await.unwrap();
    assert!(f.drive.contents(&id).is_some());

    let local_id = f.store.get_by_sync_id(&id).await.unwrap().id.unwrap();
    f.store.remove(local_id, SaveSource::User).await.unwrap();
    f.manager.remove(&id, 9000).await;
    f.manager.sync_now().await;

    assert!(f.drive.contents(&id).is_none());
}
