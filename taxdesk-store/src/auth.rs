//! Staff authentication store

use crate::store::{PersistedState, PersistedStore, SessionStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taxdesk_core::{PendingTwoFactor, TaxdeskResult, UserProfile};
use tracing::debug;

/// Client-side view of the staff session.
///
/// Credentials stay in the cookie jar; `csrf_token` is kept for request
/// decoration only and is never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<UserProfile>,
    pub pending_two_factor: Option<PendingTwoFactor>,
    pub csrf_token: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPersisted {
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub pending_two_factor: Option<PendingTwoFactor>,
}

impl PersistedState for AuthState {
    const STORAGE_KEY: &'static str = "auth-storage";
    type Persisted = AuthPersisted;

    fn partialize(&self) -> AuthPersisted {
        AuthPersisted {
            user: self.user.clone(),
            pending_two_factor: self.pending_two_factor.clone(),
        }
    }

    fn merge_persisted(&mut self, persisted: AuthPersisted) {
        self.user = persisted.user;
        self.pending_two_factor = persisted.pending_two_factor;
    }
}

pub type AuthStore = PersistedStore<AuthState>;

impl PersistedStore<AuthState> {
    pub fn current_user(&self) -> Option<UserProfile> {
        self.select(|state| state.user.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.select(AuthState::is_authenticated)
    }

    /// Record a completed login; any pending challenge is resolved
    pub async fn set_user(&self, user: UserProfile) -> TaxdeskResult<()> {
        self.set(|state| {
            state.user = Some(user);
            state.pending_two_factor = None;
            state.is_loading = false;
            state.error = None;
        })
        .await
    }

    /// Record a second-factor challenge; the user is not signed in yet
    pub async fn set_pending_two_factor(&self, pending: PendingTwoFactor) -> TaxdeskResult<()> {
        self.set(|state| {
            state.user = None;
            state.pending_two_factor = Some(pending);
            state.is_loading = false;
            state.error = None;
        })
        .await
    }

    pub async fn set_loading(&self, is_loading: bool) -> TaxdeskResult<()> {
        self.set(|state| state.is_loading = is_loading).await
    }

    pub async fn set_error(&self, error: impl Into<String> + Send) -> TaxdeskResult<()> {
        let error = error.into();
        self.set(|state| {
            state.is_loading = false;
            state.error = Some(error);
        })
        .await
    }
}

#[async_trait]
impl SessionStore for PersistedStore<AuthState> {
    fn storage_key(&self) -> &'static str {
        AuthState::STORAGE_KEY
    }

    async fn end_session(&self) -> TaxdeskResult<()> {
        self.clear().await
    }

    async fn apply_session_payload(&self, payload: &serde_json::Value) -> TaxdeskResult<()> {
        let Some(user) = payload.get("user") else {
            return Ok(());
        };
        match serde_json::from_value::<UserProfile>(user.clone()) {
            Ok(user) => self.set_user(user).await,
            Err(e) => {
                debug!(error = %e, "Session payload carried an unreadable user");
                Ok(())
            }
        }
    }
}
