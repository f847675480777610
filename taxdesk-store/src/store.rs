//! Generic persisted store
//!
//! State lives in a `watch` channel so reads are synchronous and subscribers
//! see every change. Only the [`PersistedState::partialize`] projection ever
//! reaches storage.

use crate::storage::StorageAdapter;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use taxdesk_core::TaxdeskResult;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// State shape that knows which of its fields survive a restart
pub trait PersistedState: Clone + Default + Send + Sync + 'static {
    /// Name of the blob in storage
    const STORAGE_KEY: &'static str;

    /// Blobs written with another version are discarded on hydration
    const VERSION: u32 = 0;

    /// The allow-listed fields
    type Persisted: Serialize + DeserializeOwned + Send;

    fn partialize(&self) -> Self::Persisted;

    fn merge_persisted(&mut self, persisted: Self::Persisted);
}

#[derive(Serialize, Deserialize)]
struct StoredBlob<P> {
    state: P,
    version: u32,
}

/// In-memory state with write-through persistence of allow-listed fields
pub struct PersistedStore<S: PersistedState> {
    state: watch::Sender<S>,
    hydrated: watch::Sender<bool>,
    storage: Arc<dyn StorageAdapter>,
    write_lock: Mutex<()>,
}

impl<S: PersistedState> PersistedStore<S> {
    /// Create a store holding `S::default()`; call [`Self::hydrate`] to restore
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        let (state, _) = watch::channel(S::default());
        let (hydrated, _) = watch::channel(false);

        Self {
            state,
            hydrated,
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Create and hydrate in one step
    pub async fn load(storage: Arc<dyn StorageAdapter>) -> Self {
        let store = Self::new(storage);
        store.hydrate().await;
        store
    }

    pub fn storage_key(&self) -> &'static str {
        S::STORAGE_KEY
    }

    /// Current snapshot
    pub fn get(&self) -> S {
        self.state.borrow().clone()
    }

    /// Read a value from the current state without cloning all of it
    pub fn select<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.borrow())
    }

    /// Apply `update`, notify subscribers, then persist.
    ///
    /// Subscribers are notified before storage is touched; a storage failure
    /// leaves the in-memory change in place and is returned.
    pub async fn set<F>(&self, update: F) -> TaxdeskResult<()>
    where
        F: FnOnce(&mut S) + Send,
    {
        self.state.send_modify(update);
        self.persist().await
    }

    /// Reset to the construction-time defaults
    pub async fn clear(&self) -> TaxdeskResult<()> {
        self.state.send_replace(S::default());
        debug!(key = S::STORAGE_KEY, "Store cleared");
        self.persist().await
    }

    /// Receiver notified on every change
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.state.subscribe()
    }

    pub fn has_hydrated(&self) -> bool {
        *self.hydrated.borrow()
    }

    /// Restore the persisted blob, once per instance.
    ///
    /// Unreadable, corrupt or outdated blobs are logged and skipped; the store
    /// is marked hydrated either way. Later calls wait for the first one.
    ///
    /// The write lock is held from the read until the flag flips, so a
    /// concurrent `set` persists only after the blob has been merged. A
    /// hydration dropped mid-read releases the lock and the next call retries.
    pub async fn hydrate(&self) {
        let _guard = self.write_lock.lock().await;
        if self.has_hydrated() {
            return;
        }

        match self.storage.read(S::STORAGE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<StoredBlob<S::Persisted>>(&raw) {
                Ok(blob) if blob.version == S::VERSION => {
                    self.state
                        .send_modify(|state| state.merge_persisted(blob.state));
                    debug!(key = S::STORAGE_KEY, "Restored persisted state");
                }
                Ok(blob) => {
                    warn!(
                        key = S::STORAGE_KEY,
                        stored_version = blob.version,
                        expected_version = S::VERSION,
                        "Discarding persisted state with unexpected version"
                    );
                }
                Err(e) => {
                    warn!(key = S::STORAGE_KEY, error = %e, "Discarding corrupt persisted state");
                }
            },
            Ok(None) => {
                debug!(key = S::STORAGE_KEY, "No persisted state found");
            }
            Err(e) => {
                warn!(key = S::STORAGE_KEY, error = %e, "Failed to read persisted state");
            }
        }

        self.hydrated.send_replace(true);
        info!(key = S::STORAGE_KEY, "Store hydrated");
    }

    /// Resolve once hydration has completed
    pub async fn wait_for_hydration(&self) {
        let mut hydrated = self.hydrated.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = hydrated.wait_for(|done| *done).await;
    }

    async fn persist(&self) -> TaxdeskResult<()> {
        let _guard = self.write_lock.lock().await;

        // Always write the latest snapshot so the last writer wins
        let blob = StoredBlob {
            state: self.state.borrow().partialize(),
            version: S::VERSION,
        };
        let raw = serde_json::to_string(&blob)?;

        self.storage.write(S::STORAGE_KEY, &raw).await.map_err(|e| {
            e.log();
            e
        })
    }
}

/// Store holding the state of a signed-in principal.
///
/// The HTTP client ends sessions and applies refreshed profiles through this
/// trait without knowing the state shape.
#[async_trait]
pub trait SessionStore: Send + Sync {
    fn storage_key(&self) -> &'static str;

    /// Drop all session state
    async fn end_session(&self) -> TaxdeskResult<()>;

    /// Apply a profile carried by a login or refresh response, if any
    async fn apply_session_payload(&self, _payload: &serde_json::Value) -> TaxdeskResult<()> {
        Ok(())
    }
}
