//! Staff sign-in flows

use super::Credentials;
use crate::client::AuthenticatedClient;
use crate::transport::ApiRequest;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use taxdesk_core::{ErrorContext, PendingTwoFactor, TaxdeskError, TaxdeskResult, UserProfile};
use taxdesk_store::AuthStore;
use tracing::{info, instrument};

/// Result of a password login
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated(UserProfile),
    /// The server wants a second factor before issuing a session
    TwoFactorRequired(PendingTwoFactor),
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    user: Option<UserProfile>,
    #[serde(default, alias = "requires_two_factor")]
    requires_2fa: bool,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// `/auth/me/` answers either with the profile or with `{"user": {...}}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MeResponse {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

impl From<MeResponse> for UserProfile {
    fn from(response: MeResponse) -> Self {
        match response {
            MeResponse::Wrapped { user } | MeResponse::Bare(user) => user,
        }
    }
}

/// Staff authentication against the auth store
pub struct AuthApi {
    client: Arc<AuthenticatedClient>,
    store: Arc<AuthStore>,
}

impl AuthApi {
    pub fn new(client: Arc<AuthenticatedClient>, store: Arc<AuthStore>) -> Self {
        Self { client, store }
    }

    pub fn store(&self) -> &Arc<AuthStore> {
        &self.store
    }

    /// Exchange a password for a session, or for a second-factor challenge
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> TaxdeskResult<LoginOutcome> {
        self.store.set_loading(true).await?;
        let result = self.try_login(email, password).await;
        self.finish(&result).await?;
        result
    }

    async fn try_login(&self, email: &str, password: &str) -> TaxdeskResult<LoginOutcome> {
        let endpoint = self.client.endpoints().login.clone();
        let response: LoginResponse = self
            .client
            .post_json(&endpoint, &Credentials { email, password })
            .await?;

        if response.requires_2fa {
            let pending = PendingTwoFactor {
                email: email.to_string(),
                method: response.method.unwrap_or_else(|| "totp".to_string()),
                expires_at: response.expires_at,
            };
            self.store.set_pending_two_factor(pending.clone()).await?;
            info!(method = %pending.method, "Second factor required");
            return Ok(LoginOutcome::TwoFactorRequired(pending));
        }

        let user = match response.user {
            Some(user) => user,
            None => self.fetch_me().await?,
        };
        self.store.set_user(user.clone()).await?;
        info!(user_id = %user.id, "Signed in");
        Ok(LoginOutcome::Authenticated(user))
    }

    /// Answer the pending second-factor challenge
    #[instrument(skip(self, code))]
    pub async fn verify_two_factor(&self, code: &str) -> TaxdeskResult<UserProfile> {
        let pending = self
            .store
            .select(|state| state.pending_two_factor.clone())
            .ok_or_else(|| two_factor_error("No second-factor challenge is pending"))?;
        if pending.is_expired() {
            self.store.set(|state| state.pending_two_factor = None).await?;
            return Err(two_factor_error("The second-factor challenge has expired"));
        }

        self.store.set_loading(true).await?;
        let result = self.try_verify(&pending, code).await;
        self.finish(&result).await?;
        result
    }

    async fn try_verify(&self, pending: &PendingTwoFactor, code: &str) -> TaxdeskResult<UserProfile> {
        let endpoint = self.client.endpoints().two_factor_verify.clone();
        let body = serde_json::json!({ "email": pending.email, "code": code });
        let response = self
            .client
            .request(ApiRequest::post(endpoint).with_body(body))
            .await?;

        let user = match response.json::<LoginResponse>().ok().and_then(|r| r.user) {
            Some(user) => user,
            None => self.fetch_me().await?,
        };
        self.store.set_user(user.clone()).await?;
        info!(user_id = %user.id, "Second factor accepted");
        Ok(user)
    }

    /// Fetch the signed-in profile and cache it
    pub async fn current_user(&self) -> TaxdeskResult<UserProfile> {
        let user = self.fetch_me().await?;
        self.store.set_user(user.clone()).await?;
        Ok(user)
    }

    pub async fn logout(&self) -> TaxdeskResult<()> {
        self.client.logout().await
    }

    async fn fetch_me(&self) -> TaxdeskResult<UserProfile> {
        let endpoint = self.client.endpoints().me.clone();
        let response: MeResponse = self.client.get_json(&endpoint).await?;
        Ok(response.into())
    }

    async fn finish<T>(&self, result: &TaxdeskResult<T>) -> TaxdeskResult<()> {
        match result {
            Ok(_) => {
                self.store
                    .set(|state| {
                        state.is_loading = false;
                        state.error = None;
                    })
                    .await
            }
            // Session-ending errors already cleared the store
            Err(e) if e.is_session_ending() => Ok(()),
            Err(e) => {
                let message = e.to_string();
                self.store
                    .set(|state| {
                        state.is_loading = false;
                        state.error = Some(message);
                    })
                    .await
            }
        }
    }
}

fn two_factor_error(message: &str) -> TaxdeskError {
    TaxdeskError::Validation {
        message: message.to_string(),
        status: None,
        field: Some("code".to_string()),
        errors: None,
        context: ErrorContext::new("auth_api")
            .with_operation("verify_two_factor")
            .with_suggestion("Sign in again to request a new code"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_two_factor_challenge() {
        let response: LoginResponse = serde_json::from_str(
            r#"{"requires_2fa":true,"method":"email","expires_at":"2030-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(response.requires_2fa);
        assert!(response.user.is_none());
        assert_eq!(response.method.as_deref(), Some("email"));
    }

    #[test]
    fn test_me_response_accepts_both_shapes() {
        let profile = r#"{"id":"1","email":"a@b.c","first_name":"A","last_name":"B","role":"admin"}"#;
        let bare: UserProfile = serde_json::from_str::<MeResponse>(profile).unwrap().into();
        let wrapped: UserProfile =
            serde_json::from_str::<MeResponse>(&format!(r#"{{"user":{profile}}}"#))
                .unwrap()
                .into();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.email, "a@b.c");
    }
}
