//! End-to-end refresh over real HTTP: the refreshed cookie must reach the replay

mod common;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taxdesk_client::{
    AuthenticatedClient, ListParams, RecordingNavigator, ReqwestTransport, ResourceClient,
    ResourceKind,
};
use taxdesk_core::ApiConfig;
use taxdesk_store::{AuthStore, MemoryStorage};
use tokio::net::TcpListener;

#[derive(Default)]
struct ServerState {
    refreshes: AtomicUsize,
}

async fn refresh(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.refreshes.fetch_add(1, Ordering::SeqCst);
    (
        [(header::SET_COOKIE, "access_token=fresh; Path=/; HttpOnly")],
        Json(json!({ "detail": "Token refreshed" })),
    )
}

async fn cases(headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|cookies| cookies.contains("access_token=fresh"));

    if authorized {
        Json(json!([{ "id": 1, "title": "2024 return" }])).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Given token not valid for any token type" })),
        )
            .into_response()
    }
}

async fn spawn_api() -> (String, Arc<ServerState>) {
    common::init_tracing();

    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/api/auth/refresh/", post(refresh))
        .route("/api/cases/", get(cases))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{}/api", addr), state)
}

#[tokio::test]
async fn test_refresh_cookie_is_sent_on_replay() {
    let (base_url, server) = spawn_api().await;
    let config = ApiConfig {
        base_url,
        timeout_seconds: 5,
        user_agent: "taxdesk-test".to_string(),
    };

    let transport = ReqwestTransport::new(&config).unwrap();
    let auth = Arc::new(AuthStore::load(Arc::new(MemoryStorage::new())).await);
    let navigator = RecordingNavigator::new();
    let client = Arc::new(
        AuthenticatedClient::builder(Arc::new(transport))
            .navigator(Arc::new(navigator.clone()))
            .session_store(auth)
            .build(),
    );

    let cases: ResourceClient<serde_json::Value> =
        ResourceClient::new(client.clone(), ResourceKind::Cases);
    let page = cases.list(&ListParams::new()).await.unwrap();

    assert_eq!(page.count, 1);
    assert_eq!(page.results[0]["title"], "2024 return");
    assert_eq!(server.refreshes.load(Ordering::SeqCst), 1);
    assert!(navigator.history().is_empty());

    // The jar now carries the session; no further refresh needed
    cases.list(&ListParams::new()).await.unwrap();
    assert_eq!(server.refreshes.load(Ordering::SeqCst), 1);
}
