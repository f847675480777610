//! Authenticated client
//!
//! Every response passes through [`AuthenticatedClient::request`]:
//!
//! 1. 2xx responses are returned as-is.
//! 2. A 401 whose detail carries a session-invalidation marker ends the session
//!    immediately, tagged with the reason. No refresh is attempted.
//! 3. Any other 401 on an ordinary request that has not been replayed yet goes
//!    through the single-flight refresh and is replayed exactly once.
//! 4. Everything else is mapped to an error and handed back untouched.

use crate::navigation::{login_location, Navigator, RecordingNavigator};
use crate::refresh::{RefreshCoordinator, RefreshFailure, RefreshTicket};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use taxdesk_core::{ClientConfig, ErrorContext, SessionEndReason, TaxdeskError, TaxdeskResult};
use taxdesk_store::SessionStore;
use tracing::{debug, info, warn};

const UNAUTHORIZED: u16 = 401;

/// Session-related API paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
    pub me: String,
    pub two_factor_verify: String,
}

impl SessionEndpoints {
    /// Staff dashboard endpoints
    pub fn staff() -> Self {
        Self {
            login: "/auth/login/".to_string(),
            refresh: "/auth/refresh/".to_string(),
            logout: "/auth/logout/".to_string(),
            me: "/auth/me/".to_string(),
            two_factor_verify: "/auth/2fa/verify/".to_string(),
        }
    }

    /// Client portal endpoints
    pub fn portal() -> Self {
        Self {
            login: "/portal/auth/login/".to_string(),
            refresh: "/portal/auth/refresh/".to_string(),
            logout: "/portal/auth/logout/".to_string(),
            me: "/portal/auth/me/".to_string(),
            two_factor_verify: "/portal/auth/2fa/verify/".to_string(),
        }
    }

    /// Whether a 401 on `path` means bad credentials rather than an expired session
    pub fn is_credential_exchange(&self, path: &str) -> bool {
        let path = normalize(path);
        [&self.login, &self.refresh, &self.two_factor_verify]
            .into_iter()
            .any(|endpoint| normalize(endpoint) == path)
    }
}

fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.trim_matches('/')
}

/// HTTP client that keeps a cookie-based session alive
pub struct AuthenticatedClient {
    transport: Arc<dyn HttpTransport>,
    endpoints: SessionEndpoints,
    login_route: String,
    navigator: Arc<dyn Navigator>,
    session_stores: Vec<Arc<dyn SessionStore>>,
    refresh: RefreshCoordinator,
}

/// Builder for [`AuthenticatedClient`]
pub struct AuthenticatedClientBuilder {
    transport: Arc<dyn HttpTransport>,
    endpoints: SessionEndpoints,
    login_route: String,
    navigator: Option<Arc<dyn Navigator>>,
    session_stores: Vec<Arc<dyn SessionStore>>,
}

impl AuthenticatedClientBuilder {
    pub fn endpoints(mut self, endpoints: SessionEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn login_route(mut self, login_route: impl Into<String>) -> Self {
        self.login_route = login_route.into();
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Store cleared when the session ends and updated from refresh payloads
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_stores.push(store);
        self
    }

    pub fn build(self) -> AuthenticatedClient {
        AuthenticatedClient {
            transport: self.transport,
            endpoints: self.endpoints,
            login_route: self.login_route,
            navigator: self.navigator.unwrap_or_else(|| Arc::new(RecordingNavigator::new())),
            session_stores: self.session_stores,
            refresh: RefreshCoordinator::new(),
        }
    }
}

impl AuthenticatedClient {
    pub fn builder(transport: Arc<dyn HttpTransport>) -> AuthenticatedClientBuilder {
        AuthenticatedClientBuilder {
            transport,
            endpoints: SessionEndpoints::staff(),
            login_route: "/login".to_string(),
            navigator: None,
            session_stores: Vec::new(),
        }
    }

    /// Staff client over a fresh `reqwest` transport
    pub fn from_config(
        config: &ClientConfig,
        navigator: Arc<dyn Navigator>,
        session_store: Arc<dyn SessionStore>,
    ) -> TaxdeskResult<Self> {
        let transport = ReqwestTransport::new(&config.api)?;
        Ok(Self::builder(Arc::new(transport))
            .login_route(config.session.login_route.clone())
            .navigator(navigator)
            .session_store(session_store)
            .build())
    }

    pub fn endpoints(&self) -> &SessionEndpoints {
        &self.endpoints
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.refresh.in_flight()
    }

    /// Requests parked behind the outstanding refresh
    pub fn queued_requests(&self) -> usize {
        self.refresh.queued()
    }

    /// Send a request, recovering once from an expired session
    pub async fn request(&self, request: ApiRequest) -> TaxdeskResult<ApiResponse> {
        let mut request = request;
        loop {
            let response = self.transport.send(&request).await?;
            if response.is_success() {
                return Ok(response);
            }
            if response.status != UNAUTHORIZED {
                return Err(response_error(&request, &response));
            }

            let detail = response.error_detail();
            if let Some(reason) = detail.as_deref().and_then(SessionEndReason::from_detail) {
                warn!(path = %request.path, reason = %reason, "Server invalidated the session");
                self.end_session(Some(reason)).await;
                return Err(TaxdeskError::SessionInvalidated {
                    reason,
                    message: detail.unwrap_or_default(),
                    context: ErrorContext::new("authenticated_client")
                        .with_operation("request")
                        .with_metadata("path", &request.path)
                        .with_suggestion("Sign in again"),
                });
            }

            if request.retried || self.endpoints.is_credential_exchange(&request.path) {
                return Err(TaxdeskError::AuthExpired {
                    message: detail.unwrap_or_else(|| response.canonical_reason().to_string()),
                    path: request.path.clone(),
                    context: ErrorContext::new("authenticated_client")
                        .with_operation("request")
                        .with_metadata("retried", &request.retried.to_string()),
                });
            }

            debug!(path = %request.path, "Credential expired, refreshing session");
            self.refresh_session().await?;
            request = request.into_retried();
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> TaxdeskResult<T> {
        self.request(ApiRequest::get(path)).await?.json()
    }

    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Vec<(String, String)>,
    ) -> TaxdeskResult<T> {
        self.request(ApiRequest::get(path).with_query_pairs(query))
            .await?
            .json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> TaxdeskResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.request(ApiRequest::post(path).with_body(body))
            .await?
            .json()
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> TaxdeskResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.request(ApiRequest::put(path).with_body(body))
            .await?
            .json()
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> TaxdeskResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        self.request(ApiRequest::patch(path).with_body(body))
            .await?
            .json()
    }

    pub async fn delete(&self, path: &str) -> TaxdeskResult<()> {
        self.request(ApiRequest::delete(path)).await?;
        Ok(())
    }

    /// Apply a login/refresh payload to every session store
    pub async fn apply_session_payload(&self, payload: &serde_json::Value) {
        for store in &self.session_stores {
            if let Err(e) = store.apply_session_payload(payload).await {
                e.log();
            }
        }
    }

    /// Explicit sign-out. Local state is cleared even when the server call fails.
    pub async fn logout(&self) -> TaxdeskResult<()> {
        let request = ApiRequest::post(self.endpoints.logout.clone());
        let outcome = match self.transport.send(&request).await {
            Ok(response) if response.is_success() => {
                info!("Signed out");
                Ok(())
            }
            Ok(response) => {
                warn!(status = response.status, "Logout refused, clearing local session anyway");
                Err(response_error(&request, &response))
            }
            Err(e) => {
                warn!(error = %e, "Logout request failed, clearing local session anyway");
                Err(e)
            }
        };

        self.end_session(None).await;
        outcome
    }

    async fn refresh_session(&self) -> TaxdeskResult<()> {
        match self.refresh.join() {
            RefreshTicket::Follower(wait) => {
                debug!("Waiting for in-flight session refresh");
                wait.wait().await.map_err(RefreshFailure::into_error)
            }
            RefreshTicket::Leader(lease) => match self.perform_refresh().await {
                Ok(payload) => {
                    if let Some(payload) = payload {
                        self.apply_session_payload(&payload).await;
                    }
                    let resumed = lease.settle(Ok(()));
                    info!(resumed, "Session refreshed");
                    Ok(())
                }
                Err(failure) => {
                    warn!(error = %failure.message, "Session refresh failed");
                    // The refresh endpoint reports invalidated sessions too
                    let reason = failure
                        .status
                        .and_then(|_| SessionEndReason::from_detail(&failure.message));
                    self.end_session(reason).await;
                    let rejected = lease.settle(Err(failure.clone()));
                    debug!(rejected, "Rejected queued requests");
                    Err(failure.into_error())
                }
            },
        }
    }

    async fn perform_refresh(&self) -> Result<Option<serde_json::Value>, RefreshFailure> {
        let request = ApiRequest::post(self.endpoints.refresh.clone());
        match self.transport.send(&request).await {
            Ok(response) if response.is_success() => Ok(response.json_value()),
            Ok(response) => Err(RefreshFailure::new(
                response
                    .error_detail()
                    .unwrap_or_else(|| response.canonical_reason().to_string()),
                Some(response.status),
            )),
            Err(e) => Err(RefreshFailure::new(e.to_string(), None)),
        }
    }

    async fn end_session(&self, reason: Option<SessionEndReason>) {
        for store in &self.session_stores {
            if let Err(e) = store.end_session().await {
                e.log();
            }
        }

        let location = login_location(&self.login_route, reason);
        info!(location = %location, "Session ended");
        self.navigator.navigate(&location);
    }
}

/// Map a non-auth failure to the error handed to the caller
fn response_error(request: &ApiRequest, response: &ApiResponse) -> TaxdeskError {
    let body = response.json_value();
    let detail = response.error_detail();

    match response.status {
        400 | 422 => {
            let field = body
                .as_ref()
                .and_then(|b| b.as_object())
                .and_then(|fields| fields.keys().find(|k| k.as_str() != "detail").cloned());
            TaxdeskError::Validation {
                message: detail.unwrap_or_else(|| "Request validation failed".to_string()),
                status: Some(response.status),
                field,
                errors: body,
                context: ErrorContext::new("authenticated_client")
                    .with_operation("request")
                    .with_metadata("path", &request.path)
                    .with_suggestion("Check the submitted fields"),
            }
        }
        status => TaxdeskError::Server {
            status,
            message: detail.unwrap_or_else(|| response.canonical_reason().to_string()),
            body,
            context: ErrorContext::new("authenticated_client")
                .with_operation("request")
                .with_metadata("path", &request.path)
                .with_suggestion(match status {
                    403 => "Check your permissions for this resource",
                    404 => "The resource does not exist or is not visible to you",
                    429 => "Slow down and try again later",
                    _ => "Check network connectivity and API status",
                }),
        },
    }
}
