//! Persisted store behaviour: hydration, allow-listing, notification

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use taxdesk_core::{
    storage_error, PendingTwoFactor, PortalContact, TaxdeskError, TaxdeskResult, UserProfile,
    UserRole,
};
use taxdesk_store::{
    AuthState, AuthStore, FileStorage, MemoryStorage, PersistedStore, PortalStore, SessionStore,
    StorageAdapter, Theme, UiState, UiStore,
};
use tokio::sync::Notify;

fn sample_user() -> UserProfile {
    UserProfile {
        id: "42".to_string(),
        email: "ana@example.com".to_string(),
        first_name: "Ana".to_string(),
        last_name: "Lopez".to_string(),
        role: UserRole::Preparer,
        permissions: vec!["cases.view".to_string()],
        two_factor_enabled: true,
    }
}

/// Storage whose reads block until released, to observe pre-hydration state
struct GatedStorage {
    inner: MemoryStorage,
    gate: Arc<Notify>,
}

#[async_trait]
impl StorageAdapter for GatedStorage {
    async fn read(&self, key: &str) -> TaxdeskResult<Option<String>> {
        self.gate.notified().await;
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, value: &str) -> TaxdeskResult<()> {
        self.inner.write(key, value).await
    }

    async fn remove(&self, key: &str) -> TaxdeskResult<()> {
        self.inner.remove(key).await
    }
}

/// Storage that fails every operation
struct BrokenStorage;

#[async_trait]
impl StorageAdapter for BrokenStorage {
    async fn read(&self, _key: &str) -> TaxdeskResult<Option<String>> {
        Err(storage_error!("disk unavailable", "broken_storage"))
    }

    async fn write(&self, _key: &str, _value: &str) -> TaxdeskResult<()> {
        Err(storage_error!("disk unavailable", "broken_storage"))
    }

    async fn remove(&self, _key: &str) -> TaxdeskResult<()> {
        Err(storage_error!("disk unavailable", "broken_storage"))
    }
}

#[tokio::test]
async fn test_hydration_flag_flips_once_after_read_completes() {
    let memory = MemoryStorage::new();
    {
        let previous = AuthStore::new(Arc::new(memory.clone()));
        previous.set_user(sample_user()).await.unwrap();
    }

    let gate = Arc::new(Notify::new());
    let store = Arc::new(AuthStore::new(Arc::new(GatedStorage {
        inner: memory.clone(),
        gate: gate.clone(),
    })));

    let mut flags = Vec::new();
    flags.push(store.has_hydrated());

    let hydrating = {
        let store = store.clone();
        tokio::spawn(async move { store.hydrate().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    // Pre-hydration state is provisional: defaults, flag still false
    flags.push(store.has_hydrated());
    assert!(!store.is_authenticated());

    gate.notify_one();
    hydrating.await.unwrap();
    flags.push(store.has_hydrated());

    // A second hydration is a no-op and the flag never reverts
    store.hydrate().await;
    store.clear().await.unwrap();
    flags.push(store.has_hydrated());

    assert_eq!(flags, vec![false, false, true, true]);
}

#[tokio::test]
async fn test_reload_restores_only_allow_listed_fields() {
    let memory = MemoryStorage::new();
    let store = AuthStore::new(Arc::new(memory.clone()));
    store.hydrate().await;

    store
        .set(|state| {
            state.user = Some(sample_user());
            state.csrf_token = Some("csrf-secret-value".to_string());
            state.is_loading = true;
            state.error = Some("transient".to_string());
        })
        .await
        .unwrap();

    let raw = memory.get("auth-storage").expect("auth blob written");
    assert!(!raw.contains("csrf"));
    assert!(!raw.contains("csrf-secret-value"));
    assert!(!raw.contains("transient"));
    assert!(raw.contains("ana@example.com"));

    // Simulated reload: a fresh instance over the same storage
    let reloaded = AuthStore::load(Arc::new(memory.clone())).await;
    let state = reloaded.get();
    assert!(reloaded.has_hydrated());
    assert_eq!(state.user, Some(sample_user()));
    assert_eq!(state.csrf_token, None);
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn test_set_notifies_subscribers_before_returning() {
    let store = UiStore::load(Arc::new(MemoryStorage::new())).await;
    let mut changes = store.subscribe();
    changes.borrow_and_update();

    store.set_theme(Theme::Dark).await.unwrap();

    assert!(changes.has_changed().unwrap());
    assert_eq!(changes.borrow_and_update().theme, Theme::Dark);
    assert_eq!(store.get().theme, Theme::Dark);
}

#[tokio::test]
async fn test_clear_restores_defaults_and_persists_them() {
    let memory = MemoryStorage::new();
    let store = AuthStore::load(Arc::new(memory.clone())).await;
    store
        .set_pending_two_factor(PendingTwoFactor {
            email: "ana@example.com".to_string(),
            method: "totp".to_string(),
            expires_at: None,
        })
        .await
        .unwrap();
    assert!(store.get().pending_two_factor.is_some());

    store.clear().await.unwrap();
    assert_eq!(store.get(), AuthState::default());

    let reloaded = AuthStore::load(Arc::new(memory)).await;
    assert_eq!(reloaded.get(), AuthState::default());
}

#[tokio::test]
async fn test_ui_preferences_survive_reload_but_modal_does_not() {
    let memory = MemoryStorage::new();
    let store = UiStore::load(Arc::new(memory.clone())).await;
    store
        .set(|state| {
            state.page_size = 50;
            state.language = "es".to_string();
            state.active_modal = Some("new-case".to_string());
        })
        .await
        .unwrap();
    store.toggle_sidebar().await.unwrap();

    let reloaded = UiStore::load(Arc::new(memory)).await;
    let state = reloaded.get();
    assert_eq!(state.page_size, 50);
    assert_eq!(state.language, "es");
    assert!(state.sidebar_collapsed);
    assert_eq!(state.active_modal, None);
}

#[tokio::test]
async fn test_corrupt_blob_is_ignored_and_store_still_hydrates() {
    let memory = MemoryStorage::new().with_entry("ui-storage", "{not json");
    let store = UiStore::load(Arc::new(memory)).await;

    assert!(store.has_hydrated());
    assert_eq!(store.get(), UiState::default());
}

#[tokio::test]
async fn test_blob_with_other_version_is_discarded() {
    let memory = MemoryStorage::new().with_entry(
        "ui-storage",
        r#"{"state":{"sidebar_collapsed":true,"theme":"dark","language":"fr","page_size":10},"version":7}"#,
    );
    let store = UiStore::load(Arc::new(memory)).await;

    assert!(store.has_hydrated());
    assert_eq!(store.get().theme, Theme::System);
}

#[tokio::test]
async fn test_unreadable_storage_still_marks_hydrated() {
    let store = AuthStore::new(Arc::new(BrokenStorage));
    store.hydrate().await;
    assert!(store.has_hydrated());

    // Writes fail but the in-memory change stays
    let result = store.set_user(sample_user()).await;
    assert!(matches!(result, Err(TaxdeskError::Storage { .. })));
    assert!(store.is_authenticated());
}

#[tokio::test]
async fn test_wait_for_hydration_resolves_for_late_waiters() {
    let store = Arc::new(PortalStore::new(Arc::new(MemoryStorage::new())));
    let waiter = {
        let store = store.clone();
        tokio::spawn(async move {
            store.wait_for_hydration().await;
            store.has_hydrated()
        })
    };

    store.hydrate().await;
    assert!(tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap());
    // Waiting after the fact returns immediately
    store.wait_for_hydration().await;
}

#[tokio::test]
async fn test_abandoned_hydration_can_be_retried() {
    let memory = MemoryStorage::new();
    {
        let previous = UiStore::new(Arc::new(memory.clone()));
        previous.set_theme(Theme::Dark).await.unwrap();
    }

    let gate = Arc::new(Notify::new());
    let store = UiStore::new(Arc::new(GatedStorage {
        inner: memory,
        gate: gate.clone(),
    }));

    // The first attempt is dropped while its read is still pending
    let abandoned = tokio::time::timeout(Duration::from_millis(10), store.hydrate()).await;
    assert!(abandoned.is_err());
    assert!(!store.has_hydrated());

    gate.notify_one();
    tokio::time::timeout(Duration::from_secs(2), store.hydrate())
        .await
        .expect("second hydration should not hang");
    assert!(store.has_hydrated());
    assert_eq!(store.get().theme, Theme::Dark);

    tokio::time::timeout(Duration::from_secs(1), store.wait_for_hydration())
        .await
        .expect("waiters resolve once hydrated");
}

#[tokio::test]
async fn test_set_during_hydration_leaves_memory_and_storage_in_agreement() {
    let memory = MemoryStorage::new();
    {
        let previous = UiStore::new(Arc::new(memory.clone()));
        previous.set_theme(Theme::Dark).await.unwrap();
    }

    let gate = Arc::new(Notify::new());
    let store = Arc::new(UiStore::new(Arc::new(GatedStorage {
        inner: memory.clone(),
        gate: gate.clone(),
    })));

    let hydrating = {
        let store = store.clone();
        tokio::spawn(async move { store.hydrate().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let setting = {
        let store = store.clone();
        tokio::spawn(async move { store.set_theme(Theme::Light).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    gate.notify_one();
    hydrating.await.unwrap();
    setting.await.unwrap().unwrap();

    // Whatever won, a reload sees exactly what the live store holds
    let reloaded = UiStore::load(Arc::new(memory)).await;
    assert_eq!(reloaded.get().theme, store.get().theme);
}

#[tokio::test]
async fn test_session_payload_updates_profiles() {
    let auth = AuthStore::load(Arc::new(MemoryStorage::new())).await;
    auth.apply_session_payload(&serde_json::json!({
        "user": {
            "id": "42",
            "email": "ana@example.com",
            "first_name": "Ana",
            "last_name": "Lopez",
            "role": "preparer",
            "permissions": ["cases.view"],
            "two_factor_enabled": true
        }
    }))
    .await
    .unwrap();
    assert_eq!(auth.current_user(), Some(sample_user()));

    // Payloads without a profile leave the store alone
    auth.apply_session_payload(&serde_json::json!({"detail": "ok"}))
        .await
        .unwrap();
    assert!(auth.is_authenticated());

    let portal = PortalStore::load(Arc::new(MemoryStorage::new())).await;
    portal
        .apply_session_payload(&serde_json::json!({
            "contact": {"id": "c-7", "email": "client@example.com", "first_name": "Lee"}
        }))
        .await
        .unwrap();
    assert_eq!(
        portal.current_contact().map(|c| c.id),
        Some("c-7".to_string())
    );

    portal.end_session().await.unwrap();
    assert_eq!(portal.current_contact(), None::<PortalContact>);
}

#[tokio::test]
async fn test_file_storage_backs_a_store_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
        let store: PersistedStore<UiState> = PersistedStore::load(storage).await;
        store.set_theme(Theme::Light).await.unwrap();
    }

    let storage = Arc::new(FileStorage::new(dir.path()).unwrap());
    let store = UiStore::load(storage).await;
    assert_eq!(store.get().theme, Theme::Light);
    assert!(dir.path().join("ui-storage.json").exists());
}

#[tokio::test]
async fn test_expired_pending_two_factor_is_detectable_after_reload() {
    let memory = MemoryStorage::new();
    let store = AuthStore::load(Arc::new(memory.clone())).await;
    store
        .set_pending_two_factor(PendingTwoFactor {
            email: "ana@example.com".to_string(),
            method: "email".to_string(),
            expires_at: Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
        })
        .await
        .unwrap();

    let reloaded = AuthStore::load(Arc::new(memory)).await;
    let pending = reloaded.get().pending_two_factor.unwrap();
    assert!(pending.is_expired());
}
