//! HTTP transport
//!
//! A transport performs one exchange and reports whatever status came back;
//! only failures to get a response at all are errors here.

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use taxdesk_core::{network_error, ApiConfig, ErrorContext, TaxdeskError, TaxdeskResult};
use tracing::debug;

/// A request against the API, relative to the configured base URL
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Set once the request has been replayed after a session refresh
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_query_pairs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    /// The same request carrying the retry marker
    pub fn into_retried(mut self) -> Self {
        self.retried = true;
        self
    }
}

/// Status and raw body of a completed exchange
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body
    pub fn json<T: DeserializeOwned>(&self) -> TaxdeskResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Body as JSON, `None` when empty or not JSON
    pub fn json_value(&self) -> Option<serde_json::Value> {
        if self.body.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&self.body).ok()
    }

    /// Human-readable error detail from `detail`, `error` or `message`
    pub fn error_detail(&self) -> Option<String> {
        let value = self.json_value()?;
        ["detail", "error", "message"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
    }

    pub fn canonical_reason(&self) -> &'static str {
        reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown error")
    }
}

/// One HTTP exchange
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> TaxdeskResult<ApiResponse>;
}

/// `reqwest` transport with a cookie jar carrying the session credentials
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    cookies: Arc<Jar>,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> TaxdeskResult<Self> {
        Self::with_cookie_jar(config, Arc::new(Jar::default()))
    }

    /// Build on an existing jar, e.g. one restored from disk
    pub fn with_cookie_jar(config: &ApiConfig, cookies: Arc<Jar>) -> TaxdeskResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .cookie_provider(cookies.clone())
            .build()
            .map_err(|e| TaxdeskError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_transport").with_operation("create_client"),
            })?;

        debug!("Created HTTP transport for {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            cookies,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cookie_jar(&self) -> Arc<Jar> {
        self.cookies.clone()
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> TaxdeskResult<ApiResponse> {
        let url = self.url_for(&request.path);
        debug!(method = %request.method, url = %url, retried = request.retried, "Sending request");

        let mut builder = self.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            network_error!(
                format!("Request to {} failed: {}", url, e),
                "http_transport",
                e
            )
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            network_error!(
                format!("Failed to read response from {}: {}", url, e),
                "http_transport",
                e
            )
        })?;

        debug!(status, url = %url, "Received response");
        Ok(ApiResponse { status, body })
    }
}
