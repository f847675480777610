//! Client-portal contact store

use crate::store::{PersistedState, PersistedStore, SessionStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taxdesk_core::{PortalContact, TaxdeskResult};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalState {
    pub contact: Option<PortalContact>,
    pub is_loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalPersisted {
    #[serde(default)]
    pub contact: Option<PortalContact>,
}

impl PersistedState for PortalState {
    const STORAGE_KEY: &'static str = "portal-auth-storage";
    type Persisted = PortalPersisted;

    fn partialize(&self) -> PortalPersisted {
        PortalPersisted {
            contact: self.contact.clone(),
        }
    }

    fn merge_persisted(&mut self, persisted: PortalPersisted) {
        self.contact = persisted.contact;
    }
}

pub type PortalStore = PersistedStore<PortalState>;

impl PersistedStore<PortalState> {
    pub fn current_contact(&self) -> Option<PortalContact> {
        self.select(|state| state.contact.clone())
    }

    pub async fn set_contact(&self, contact: PortalContact) -> TaxdeskResult<()> {
        self.set(|state| {
            state.contact = Some(contact);
            state.is_loading = false;
            state.error = None;
        })
        .await
    }
}

#[async_trait]
impl SessionStore for PersistedStore<PortalState> {
    fn storage_key(&self) -> &'static str {
        PortalState::STORAGE_KEY
    }

    async fn end_session(&self) -> TaxdeskResult<()> {
        self.clear().await
    }

    async fn apply_session_payload(&self, payload: &serde_json::Value) -> TaxdeskResult<()> {
        let Some(contact) = payload.get("contact") else {
            return Ok(());
        };
        match serde_json::from_value::<PortalContact>(contact.clone()) {
            Ok(contact) => self.set_contact(contact).await,
            Err(e) => {
                debug!(error = %e, "Session payload carried an unreadable contact");
                Ok(())
            }
        }
    }
}
