//! Shared fixtures for the client integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;
use taxdesk_client::{
    ApiRequest, ApiResponse, AuthenticatedClient, HttpTransport, RecordingNavigator,
    SessionEndpoints,
};
use taxdesk_core::{TaxdeskResult, UserProfile, UserRole};
use taxdesk_store::{AuthStore, MemoryStorage};
use tokio::sync::Notify;

pub const INACTIVITY_DETAIL: &str = "Session expired due to inactivity. Please log in again.";
pub const TERMINATED_DETAIL: &str = "Session terminated by an administrator.";
pub const PASSWORD: &str = "correct-horse";
pub const TWO_FACTOR_CODE: &str = "123456";

static TRACING: LazyLock<()> = LazyLock::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
});

pub fn init_tracing() {
    LazyLock::force(&TRACING);
}

pub fn sample_user() -> UserProfile {
    UserProfile {
        id: "42".to_string(),
        email: "ana@example.com".to_string(),
        first_name: "Ana".to_string(),
        last_name: "Lopez".to_string(),
        role: UserRole::Preparer,
        permissions: vec!["cases.view".to_string()],
        two_factor_enabled: false,
    }
}

fn respond(status: u16, body: serde_json::Value) -> ApiResponse {
    ApiResponse::new(status, body.to_string())
}

/// In-process stand-in for the CRM API.
///
/// Ordinary paths answer 401 while the session is expired and echo the
/// request once it is valid. Paths under `/timeout/` and `/terminated/` always
/// answer with the server's invalidation details; `/always-401/` never
/// accepts the session.
pub struct ScriptedTransport {
    session_valid: Mutex<bool>,
    refresh_succeeds: bool,
    refresh_failure_detail: String,
    two_factor_required: bool,
    refresh_gate: Option<Arc<Notify>>,
    routes: Mutex<HashMap<String, ApiResponse>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl ScriptedTransport {
    pub fn new(session_valid: bool) -> Self {
        Self {
            session_valid: Mutex::new(session_valid),
            refresh_succeeds: true,
            refresh_failure_detail: "Token is invalid or expired".to_string(),
            two_factor_required: false,
            refresh_gate: None,
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Session expired; the next refresh restores it
    pub fn expired() -> Self {
        Self::new(false)
    }

    pub fn failing_refresh(mut self) -> Self {
        self.refresh_succeeds = false;
        self
    }

    /// Refresh answers 401 with the given detail
    pub fn refresh_rejected_with(mut self, detail: &str) -> Self {
        self.refresh_succeeds = false;
        self.refresh_failure_detail = detail.to_string();
        self
    }

    pub fn requiring_two_factor(mut self) -> Self {
        self.two_factor_required = true;
        self
    }

    /// Hold every refresh until the gate is notified
    pub fn gated_refresh(mut self, gate: Arc<Notify>) -> Self {
        self.refresh_gate = Some(gate);
        self
    }

    pub fn with_route(self, path: &str, status: u16, body: serde_json::Value) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), respond(status, body));
        self
    }

    pub fn expire_session(&self) {
        *self.session_valid.lock().unwrap() = false;
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls().iter().filter(|(p, _)| p == path).count()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls_to("/auth/refresh/")
    }

    fn session_valid(&self) -> bool {
        *self.session_valid.lock().unwrap()
    }

    fn route(&self, path: &str) -> Option<ApiResponse> {
        self.routes.lock().unwrap().get(path).cloned()
    }

    fn set_session(&self, valid: bool) {
        *self.session_valid.lock().unwrap() = valid;
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> TaxdeskResult<ApiResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((request.path.clone(), request.retried));

        let path = request.path.as_str();
        let user = serde_json::to_value(sample_user()).unwrap();

        let response = match path {
            "/auth/refresh/" => {
                if let Some(gate) = &self.refresh_gate {
                    gate.notified().await;
                }
                if self.refresh_succeeds {
                    self.set_session(true);
                    respond(200, serde_json::json!({ "user": user }))
                } else {
                    respond(
                        401,
                        serde_json::json!({ "detail": self.refresh_failure_detail }),
                    )
                }
            }
            "/auth/login/" => {
                let password = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("password"))
                    .and_then(|p| p.as_str());
                if password != Some(PASSWORD) {
                    respond(
                        401,
                        serde_json::json!({ "detail": "No active account found with the given credentials" }),
                    )
                } else if self.two_factor_required {
                    respond(
                        200,
                        serde_json::json!({ "requires_2fa": true, "method": "totp" }),
                    )
                } else {
                    self.set_session(true);
                    respond(200, serde_json::json!({ "user": user }))
                }
            }
            "/auth/2fa/verify/" => {
                let code = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("code"))
                    .and_then(|c| c.as_str());
                if code == Some(TWO_FACTOR_CODE) {
                    self.set_session(true);
                    respond(200, serde_json::json!({ "user": user }))
                } else {
                    respond(400, serde_json::json!({ "code": ["Invalid verification code."] }))
                }
            }
            "/auth/logout/" => {
                self.set_session(false);
                ApiResponse::new(204, "")
            }
            p if p.starts_with("/timeout/") => {
                respond(401, serde_json::json!({ "detail": INACTIVITY_DETAIL }))
            }
            p if p.starts_with("/terminated/") => {
                respond(401, serde_json::json!({ "detail": TERMINATED_DETAIL }))
            }
            p if p.starts_with("/always-401/") => respond(
                401,
                serde_json::json!({ "detail": "Given token not valid for any token type" }),
            ),
            _ if !self.session_valid() => respond(
                401,
                serde_json::json!({ "detail": "Given token not valid for any token type" }),
            ),
            "/auth/me/" => respond(200, user),
            p => match self.route(p) {
                Some(response) => response,
                None => respond(
                    200,
                    serde_json::json!({ "path": p, "retried": request.retried }),
                ),
            },
        };

        Ok(response)
    }
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub navigator: RecordingNavigator,
    pub storage: MemoryStorage,
    pub auth: Arc<AuthStore>,
    pub client: Arc<AuthenticatedClient>,
}

/// Client wired to a scripted transport and a signed-in auth store
pub async fn harness(transport: ScriptedTransport) -> Harness {
    init_tracing();

    let transport = Arc::new(transport);
    let navigator = RecordingNavigator::new();
    let storage = MemoryStorage::new();
    let auth = Arc::new(AuthStore::load(Arc::new(storage.clone())).await);
    auth.set_user(sample_user()).await.unwrap();

    let client = AuthenticatedClient::builder(transport.clone())
        .endpoints(SessionEndpoints::staff())
        .login_route("/login")
        .navigator(Arc::new(navigator.clone()))
        .session_store(auth.clone())
        .build();

    Harness {
        transport,
        navigator,
        storage,
        auth,
        client: Arc::new(client),
    }
}

/// Poll until `condition` holds, failing the test after a second
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
