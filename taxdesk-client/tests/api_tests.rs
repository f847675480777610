//! Typed API calls over the scripted transport

mod common;

use common::{harness, sample_user, ScriptedTransport, PASSWORD, TWO_FACTOR_CODE};
use serde::Deserialize;
use std::sync::Arc;
use taxdesk_client::{
    AuthApi, AuthenticatedClient, ListParams, LoginOutcome, NotificationsApi, PortalAuthApi,
    RecordingNavigator, ResourceClient, ResourceKind, SessionEndpoints,
};
use taxdesk_core::TaxdeskError;
use taxdesk_store::{MemoryStorage, PortalStore};

#[derive(Debug, Deserialize, PartialEq)]
struct Case {
    id: u32,
    title: String,
}

#[tokio::test]
async fn test_login_caches_profile() {
    let h = harness(ScriptedTransport::expired()).await;
    h.auth.clear().await.unwrap();
    let api = AuthApi::new(h.client.clone(), h.auth.clone());

    let outcome = api.login("ana@example.com", PASSWORD).await.unwrap();

    assert_eq!(outcome, LoginOutcome::Authenticated(sample_user()));
    let state = h.auth.get();
    assert_eq!(state.user, Some(sample_user()));
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn test_wrong_password_records_error_without_refresh() {
    let h = harness(ScriptedTransport::expired()).await;
    h.auth.clear().await.unwrap();
    let api = AuthApi::new(h.client.clone(), h.auth.clone());

    let error = api.login("ana@example.com", "wrong").await.unwrap_err();

    assert!(matches!(error, TaxdeskError::AuthExpired { .. }));
    assert_eq!(h.transport.refresh_calls(), 0);
    let state = h.auth.get();
    assert!(!state.is_loading);
    assert!(state.error.unwrap().contains("No active account"));
}

#[tokio::test]
async fn test_two_factor_flow() {
    let h = harness(ScriptedTransport::expired().requiring_two_factor()).await;
    h.auth.clear().await.unwrap();
    let api = AuthApi::new(h.client.clone(), h.auth.clone());

    let outcome = api.login("ana@example.com", PASSWORD).await.unwrap();
    let LoginOutcome::TwoFactorRequired(pending) = outcome else {
        panic!("Expected a second-factor challenge");
    };
    assert_eq!(pending.method, "totp");
    assert!(!h.auth.is_authenticated());

    // The challenge survives a reload
    let blob = h.storage.get("auth-storage").unwrap();
    assert!(blob.contains("pending_two_factor"));

    let error = api.verify_two_factor("000000").await.unwrap_err();
    assert!(matches!(error, TaxdeskError::Validation { .. }));
    assert!(h.auth.get().pending_two_factor.is_some());

    let user = api.verify_two_factor(TWO_FACTOR_CODE).await.unwrap();
    assert_eq!(user, sample_user());
    assert!(h.auth.get().pending_two_factor.is_none());
    assert!(h.auth.is_authenticated());
}

#[tokio::test]
async fn test_verify_without_challenge_is_rejected_locally() {
    let h = harness(ScriptedTransport::new(true)).await;
    let api = AuthApi::new(h.client.clone(), h.auth.clone());

    let error = api.verify_two_factor(TWO_FACTOR_CODE).await.unwrap_err();

    assert!(matches!(error, TaxdeskError::Validation { ref field, .. } if field.as_deref() == Some("code")));
    assert_eq!(h.transport.calls_to("/auth/2fa/verify/"), 0);
}

#[tokio::test]
async fn test_current_user_recovers_expired_session() {
    let h = harness(ScriptedTransport::expired()).await;
    let api = AuthApi::new(h.client.clone(), h.auth.clone());

    let user = api.current_user().await.unwrap();

    assert_eq!(user.full_name(), "Ana Lopez");
    assert_eq!(h.transport.refresh_calls(), 1);
}

#[tokio::test]
async fn test_resource_crud_paths() {
    let h = harness(
        ScriptedTransport::new(true)
            .with_route(
                "/cases/",
                200,
                serde_json::json!({
                    "count": 31,
                    "next": "http://localhost/api/cases/?page=2",
                    "previous": null,
                    "results": [{"id": 1, "title": "2024 return"}]
                }),
            )
            .with_route(
                "/cases/7/",
                200,
                serde_json::json!({"id": 7, "title": "Amended return"}),
            ),
    )
    .await;
    let cases: ResourceClient<Case> = ResourceClient::new(h.client.clone(), ResourceKind::Cases);

    let page = cases.list(&ListParams::new().page(1)).await.unwrap();
    assert_eq!(page.count, 31);
    assert!(page.has_next());
    assert_eq!(page.results[0].title, "2024 return");

    let case = cases.get("7").await.unwrap();
    assert_eq!(
        case,
        Case {
            id: 7,
            title: "Amended return".to_string()
        }
    );

    cases.delete("7").await.unwrap();
    assert_eq!(h.transport.calls_to("/cases/7/"), 2);

    let error = cases.get("../users").await.unwrap_err();
    assert!(matches!(error, TaxdeskError::Validation { .. }));
}

#[tokio::test]
async fn test_notifications_extras() {
    let h = harness(ScriptedTransport::new(true).with_route(
        "/notifications/unread-count/",
        200,
        serde_json::json!({"unread_count": 3}),
    ))
    .await;
    let notifications = NotificationsApi::new(h.client.clone());

    assert_eq!(notifications.unread_count().await.unwrap(), 3);

    notifications.mark_read("n-9").await.unwrap();
    notifications.mark_all_read().await.unwrap();
    assert_eq!(h.transport.calls_to("/notifications/n-9/mark-read/"), 1);
    assert_eq!(h.transport.calls_to("/notifications/mark-all-read/"), 1);
}

#[tokio::test]
async fn test_portal_login_updates_portal_store() {
    let contact = serde_json::json!({
        "id": "c-7",
        "first_name": "Lee",
        "last_name": "Park",
        "email": "lee@example.com",
        "corporation_id": "corp-1"
    });
    let transport = Arc::new(ScriptedTransport::new(true).with_route(
        "/portal/auth/login/",
        200,
        serde_json::json!({ "contact": contact }),
    ));
    let portal_store = Arc::new(PortalStore::load(Arc::new(MemoryStorage::new())).await);
    let navigator = RecordingNavigator::new();
    let client = Arc::new(
        AuthenticatedClient::builder(transport.clone())
            .endpoints(SessionEndpoints::portal())
            .login_route("/portal/login")
            .navigator(Arc::new(navigator.clone()))
            .session_store(portal_store.clone())
            .build(),
    );
    let api = PortalAuthApi::new(client, portal_store.clone());

    let signed_in = api.login("lee@example.com", PASSWORD).await.unwrap();
    assert_eq!(signed_in.full_name(), "Lee Park");
    assert_eq!(
        portal_store.current_contact().and_then(|c| c.corporation_id),
        Some("corp-1".to_string())
    );

    api.logout().await.unwrap();
    assert_eq!(portal_store.current_contact(), None);
    assert_eq!(navigator.last().as_deref(), Some("/portal/login"));
}
