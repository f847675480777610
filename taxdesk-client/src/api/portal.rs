//! Client-portal sign-in

use super::Credentials;
use crate::client::AuthenticatedClient;
use serde::Deserialize;
use std::sync::Arc;
use taxdesk_core::{ErrorContext, PortalContact, TaxdeskError, TaxdeskResult};
use taxdesk_store::PortalStore;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContactResponse {
    Wrapped { contact: PortalContact },
    Bare(PortalContact),
}

impl From<ContactResponse> for PortalContact {
    fn from(response: ContactResponse) -> Self {
        match response {
            ContactResponse::Wrapped { contact } | ContactResponse::Bare(contact) => contact,
        }
    }
}

/// Portal authentication against the portal store.
///
/// Expects a client built with [`crate::SessionEndpoints::portal`].
pub struct PortalAuthApi {
    client: Arc<AuthenticatedClient>,
    store: Arc<PortalStore>,
}

impl PortalAuthApi {
    pub fn new(client: Arc<AuthenticatedClient>, store: Arc<PortalStore>) -> Self {
        Self { client, store }
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> TaxdeskResult<PortalContact> {
        self.store.set(|state| state.is_loading = true).await?;

        let endpoint = self.client.endpoints().login.clone();
        let result: TaxdeskResult<serde_json::Value> = self
            .client
            .post_json(&endpoint, &Credentials { email, password })
            .await;

        let contact = match result {
            Ok(payload) => match payload.get("contact") {
                Some(contact) => serde_json::from_value(contact.clone()).map_err(TaxdeskError::from),
                None => self.fetch_contact().await,
            },
            Err(e) => Err(e),
        };

        match contact {
            Ok(contact) => {
                self.store.set_contact(contact.clone()).await?;
                info!(contact_id = %contact.id, "Portal contact signed in");
                Ok(contact)
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .set(|state| {
                        state.is_loading = false;
                        state.error = Some(message);
                    })
                    .await?;
                Err(e)
            }
        }
    }

    /// Fetch the signed-in contact and cache it
    pub async fn current_contact(&self) -> TaxdeskResult<PortalContact> {
        let contact = self.fetch_contact().await?;
        self.store.set_contact(contact.clone()).await?;
        Ok(contact)
    }

    pub async fn logout(&self) -> TaxdeskResult<()> {
        self.client.logout().await
    }

    async fn fetch_contact(&self) -> TaxdeskResult<PortalContact> {
        let endpoint = self.client.endpoints().me.clone();
        let response: ContactResponse = self.client.get_json(&endpoint).await.map_err(|e| {
            match e {
                TaxdeskError::Serialization(source) => TaxdeskError::Internal {
                    message: format!("Unexpected portal profile shape: {}", source),
                    source: Some(Box::new(source)),
                    context: ErrorContext::new("portal_auth_api").with_operation("current_contact"),
                },
                other => other,
            }
        })?;
        Ok(response.into())
    }
}
