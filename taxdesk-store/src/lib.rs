//! Taxdesk Store - Persisted client-side state
//!
//! Small in-memory state holders that serialize an allow-listed subset of
//! their fields to durable storage and restore it on the next start:
//!
//! - [`AuthStore`] caches the signed-in staff user and any pending 2FA challenge
//! - [`UiStore`] keeps interface preferences
//! - [`PortalStore`] caches the signed-in portal contact
//!
//! Stores start un-hydrated; consumers should wait for
//! [`PersistedStore::wait_for_hydration`] before making decisions such as
//! "the user is signed out".

pub mod auth;
pub mod portal;
pub mod storage;
pub mod store;
pub mod ui;

pub use auth::{AuthState, AuthStore};
pub use portal::{PortalState, PortalStore};
pub use storage::{FileStorage, MemoryStorage, StorageAdapter};
pub use store::{PersistedState, PersistedStore, SessionStore};
pub use ui::{Theme, UiState, UiStore};
