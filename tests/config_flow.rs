// Config flow and entry setup against a scripted cloud.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;

use alula_bridge::config_flow::{FIELD_BASE, FIELD_PASSWORD, FIELD_USERNAME};
use alula_bridge::{
    ConfigEntry, ConfigEntryStore, ConfigFlow, CoordinatorConfig, FileEntryStore, FlowResult,
    MemoryEntryStore, Result, SetupError, UserInput, remove_entry, setup_entry, unload_entry,
};

use common::{ScriptedClient, Step, panel, status};

fn client() -> Arc<ScriptedClient> {
    Arc::new(ScriptedClient::new(status(vec![panel("p1")], vec![])))
}

fn input(username: &str, password: &str) -> Option<UserInput> {
    Some(UserInput {
        username: username.into(),
        password: password.into(),
    })
}

fn form_errors(result: FlowResult) -> Vec<(&'static str, &'static str)> {
    match result {
        FlowResult::ShowForm { errors } => errors.into_iter().collect(),
        other => panic!("expected form, got {other:?}"),
    }
}

// ============================================================================
// Config flow
// ============================================================================

#[tokio::test]
async fn test_first_step_shows_empty_form() {
    let flow = ConfigFlow::new(client(), Arc::new(MemoryEntryStore::new()));
    assert!(form_errors(flow.step_user(None).await.unwrap()).is_empty());
}

#[tokio::test]
async fn test_valid_credentials_create_one_entry() {
    let client = client();
    let store = Arc::new(MemoryEntryStore::new());
    let flow = ConfigFlow::new(client.clone(), store.clone());

    let result = flow.step_user(input("Me@Example.com", "hunter2")).await.unwrap();
    let FlowResult::CreateEntry(entry) = result else {
        panic!("expected entry, got {result:?}");
    };
    assert_eq!(entry.unique_id, "me@example.com");
    assert_eq!(entry.title, "Cove Security (Me@Example.com)");
    assert_eq!(entry.data.refresh_token.as_deref(), Some("refresh-1"));

    let stored = store.entries().await.unwrap();
    assert_eq!(stored, vec![entry]);
}

#[tokio::test]
async fn test_missing_fields_are_required() {
    let client = client();
    let flow = ConfigFlow::new(client.clone(), Arc::new(MemoryEntryStore::new()));

    let errors = form_errors(flow.step_user(input("  ", "hunter2")).await.unwrap());
    assert_eq!(errors, vec![(FIELD_USERNAME, "required")]);
    let errors = form_errors(flow.step_user(input("me", "")).await.unwrap());
    assert_eq!(errors, vec![(FIELD_PASSWORD, "required")]);
    assert_eq!(client.auth_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_auth_persists_nothing() {
    let store = Arc::new(MemoryEntryStore::new());
    let flow = ConfigFlow::new(client(), store.clone());

    let errors = form_errors(flow.step_user(input("me", "wrong")).await.unwrap());
    assert_eq!(errors, vec![(FIELD_BASE, "invalid_auth")]);
    assert!(store.entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cannot_connect_persists_nothing() {
    let client = client();
    client.fail_login(Some(Step::Offline));
    let store = Arc::new(MemoryEntryStore::new());
    let flow = ConfigFlow::new(client.clone(), store.clone());

    let errors = form_errors(flow.step_user(input("me", "hunter2")).await.unwrap());
    assert_eq!(errors, vec![(FIELD_BASE, "cannot_connect")]);
    assert!(store.entries().await.unwrap().is_empty());

    // Same form succeeds once the cloud is back
    client.fail_login(None);
    let result = flow.step_user(input("me", "hunter2")).await.unwrap();
    assert!(matches!(result, FlowResult::CreateEntry(_)));
}

#[tokio::test]
async fn test_duplicate_account_aborts() {
    let client = client();
    let store = Arc::new(MemoryEntryStore::new());
    let flow = ConfigFlow::new(client.clone(), store.clone());

    flow.step_user(input("me@example.com", "hunter2")).await.unwrap();
    let result = flow.step_user(input(" ME@example.COM", "hunter2")).await.unwrap();
    assert_eq!(
        result,
        FlowResult::Abort {
            reason: "already_configured"
        }
    );
    assert_eq!(store.entries().await.unwrap().len(), 1);
    assert_eq!(client.auth_calls.load(Ordering::SeqCst), 1);
}

/// Store whose lookups miss entries added by another flow, as when two
/// submissions for one account race past the duplicate check.
struct StaleLookupStore {
    inner: MemoryEntryStore,
}

#[async_trait]
impl ConfigEntryStore for StaleLookupStore {
    async fn entries(&self) -> Result<Vec<ConfigEntry>> {
        self.inner.entries().await
    }

    async fn find_by_unique_id(&self, _unique_id: &str) -> Result<Option<ConfigEntry>> {
        Ok(None)
    }

    async fn add(&self, entry: ConfigEntry) -> Result<bool> {
        self.inner.add(entry).await
    }

    async fn update(&self, entry: &ConfigEntry) -> Result<()> {
        self.inner.update(entry).await
    }

    async fn remove(&self, entry_id: &str) -> Result<bool> {
        self.inner.remove(entry_id).await
    }
}

#[tokio::test]
async fn test_concurrent_duplicate_aborts_at_store() {
    let store = Arc::new(StaleLookupStore {
        inner: MemoryEntryStore::new(),
    });
    let flow = ConfigFlow::new(client(), store.clone());

    let first = flow.step_user(input("me@example.com", "hunter2")).await.unwrap();
    assert!(matches!(first, FlowResult::CreateEntry(_)));
    let second = flow.step_user(input("Me@Example.com", "hunter2")).await.unwrap();
    assert_eq!(
        second,
        FlowResult::Abort {
            reason: "already_configured"
        }
    );
    assert_eq!(store.entries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_entry_survives_in_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state/entries.json");

    let flow = ConfigFlow::new(client(), Arc::new(FileEntryStore::new(&path)));
    let result = flow.step_user(input("me", "hunter2")).await.unwrap();
    let FlowResult::CreateEntry(created) = result else {
        panic!("expected entry, got {result:?}");
    };

    let reopened = FileEntryStore::new(&path);
    let found = reopened.find_by_unique_id("me").await.unwrap();
    assert_eq!(found, Some(created));
}

// ============================================================================
// Entry setup
// ============================================================================

async fn stored_entry(
    store: &Arc<MemoryEntryStore>,
    password: &str,
    token: Option<&str>,
) -> ConfigEntry {
    let entry = ConfigEntry::new("me", password, token.map(str::to_string));
    store.add(entry.clone()).await.unwrap();
    entry
}

#[tokio::test]
async fn test_setup_restores_stored_session() {
    let client = client();
    let store = Arc::new(MemoryEntryStore::new());
    let entry = stored_entry(&store, "hunter2", Some("stored-token")).await;

    let loaded = setup_entry(entry, client.clone(), store.clone(), CoordinatorConfig::default())
        .await
        .unwrap();
    assert_eq!(client.restored_token().as_deref(), Some("stored-token"));
    assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.auth_calls.load(Ordering::SeqCst), 0);
    assert!(loaded.coordinator.is_available());
    assert_eq!(loaded.coordinator.snapshot().unwrap().panels.len(), 1);

    // Rotated token written back to the store
    let stored = store.entries().await.unwrap();
    assert_eq!(stored[0].data.refresh_token.as_deref(), Some("refresh-1"));

    let coordinator = loaded.coordinator.clone();
    unload_entry(loaded);
    assert!(coordinator.is_shut_down());
    assert!(!coordinator.is_available());
}

#[tokio::test]
async fn test_setup_falls_back_to_password() {
    let client = client();
    client.expire_sessions();
    let store = Arc::new(MemoryEntryStore::new());
    let entry = stored_entry(&store, "hunter2", Some("stale")).await;

    let loaded = setup_entry(entry, client.clone(), store, CoordinatorConfig::default())
        .await
        .unwrap();
    assert_eq!(client.auth_calls.load(Ordering::SeqCst), 1);
    assert!(loaded.coordinator.is_available());
    unload_entry(loaded);
}

#[tokio::test]
async fn test_setup_bad_password_is_auth_failed() {
    let client = client();
    let store = Arc::new(MemoryEntryStore::new());
    let entry = stored_entry(&store, "changed", None).await;

    let err = setup_entry(entry, client.clone(), store, CoordinatorConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SetupError::AuthFailed(_)));
    assert!(!err.is_retryable());
    assert_eq!(client.fetches(), 0);
}

#[tokio::test]
async fn test_setup_offline_is_not_ready() {
    let client = client();
    client.fail_login(Some(Step::Offline));
    let store = Arc::new(MemoryEntryStore::new());
    let entry = stored_entry(&store, "hunter2", None).await;

    let err = setup_entry(entry, client, store, CoordinatorConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SetupError::NotReady(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_setup_first_refresh_failure_is_not_ready() {
    let client = client();
    client.fail_next([Step::Offline]);
    let store = Arc::new(MemoryEntryStore::new());
    let entry = stored_entry(&store, "hunter2", None).await;

    let err = setup_entry(entry.clone(), client.clone(), store.clone(), CoordinatorConfig::default())
        .await
        .err()
        .unwrap();
    assert!(err.is_retryable());

    // Retrying once the cloud answers succeeds
    let loaded = setup_entry(entry, client, store, CoordinatorConfig::default())
        .await
        .unwrap();
    assert!(loaded.coordinator.is_available());
    unload_entry(loaded);
}

#[tokio::test]
async fn test_remove_entry_unloads_and_deletes() {
    let client = client();
    let store = Arc::new(MemoryEntryStore::new());
    let entry = stored_entry(&store, "hunter2", None).await;

    let loaded = setup_entry(entry, client, store.clone(), CoordinatorConfig::default())
        .await
        .unwrap();
    let coordinator = loaded.coordinator.clone();
    assert!(remove_entry(loaded, &*store).await.unwrap());
    assert!(coordinator.is_shut_down());
    assert!(store.entries().await.unwrap().is_empty());
}
