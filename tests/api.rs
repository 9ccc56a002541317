mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use common::{Harness, SHARE_URL};
use convo_post::api::routes::create_router;
use convo_post::session::{SessionPolicy, SessionStore};
use convo_post::AppState;

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, value)
}

async fn new_session(app: &Router) -> String {
    let (status, _, body) = send(app, Method::POST, "/api/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["expires_in_secs"], 1800);
    body["data"]["session_id"].as_str().unwrap().to_string()
}

async fn configure(app: &Router, id: &str) {
    let (status, _, _) = send(
        app,
        Method::PUT,
        &format!("/api/sessions/{id}/credentials"),
        Some(json!({
            "api_keys": { "openai": "sk-secret-key" },
            "linkedin_token": "li-secret-token"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn lists_providers_and_models() {
    let h = Harness::new();
    let app = create_router(h.app_state());

    let (status, _, body) = send(&app, Method::GET, "/api/models", None).await;

    assert_eq!(status, StatusCode::OK);
    let providers = body["data"].as_array().unwrap();
    assert_eq!(providers.len(), 3);
    assert_eq!(providers[0]["provider"], "openai");
    assert!(!providers[0]["models"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn status_never_echoes_secrets() {
    let h = Harness::new();
    let app = create_router(h.app_state());
    let id = new_session(&app).await;
    configure(&app, &id).await;

    let (status, _, body) = send(&app, Method::GET, &format!("/api/sessions/{id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "configured");
    assert_eq!(body["data"]["linkedin_connected"], true);
    assert_eq!(body["data"]["providers"], json!(["openai"]));
    let raw = body.to_string();
    assert!(!raw.contains("sk-secret-key"));
    assert!(!raw.contains("li-secret-token"));
}

#[tokio::test]
async fn clearing_twice_succeeds() {
    let h = Harness::new();
    let app = create_router(h.app_state());
    let id = new_session(&app).await;
    configure(&app, &id).await;
    let uri = format!("/api/sessions/{id}/credentials");

    let (first, _, _) = send(&app, Method::DELETE, &uri, None).await;
    let (second, _, body) = send(&app, Method::DELETE, &uri, None).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["data"]["state"], "cleared");
    assert_eq!(body["data"]["providers"], json!([]));
    assert_eq!(body["data"]["linkedin_connected"], false);
}

#[tokio::test]
async fn generate_then_fetch_post() {
    let h = Harness::new();
    let app = create_router(h.app_state());
    let id = new_session(&app).await;
    configure(&app, &id).await;

    let (status, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/generate"),
        Some(json!({ "url": SHARE_URL, "provider": "openai", "style": "story", "tone": "casual" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["status"], "success");
    assert_eq!(body["data"]["post"]["style"], "story");
    assert!(body["data"]["published"].is_null());

    let (status, _, stored) = send(&app, Method::GET, &format!("/api/sessions/{id}/post"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["data"]["text"], body["data"]["post"]["text"]);
}

#[tokio::test]
async fn invalid_url_is_bad_request() {
    let h = Harness::new();
    let app = create_router(h.app_state());
    let id = new_session(&app).await;
    configure(&app, &id).await;

    let (status, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/generate"),
        Some(json!({ "url": "not a url" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["meta"]["status"], "error");
    assert_eq!(body["meta"]["error_kind"], "invalid_input");
    assert_eq!(h.network_calls(), (0, 0, 0));
}

#[tokio::test]
async fn publishing_inside_cooldown_returns_retry_after() {
    let h = Harness::new();
    let app = create_router(h.app_state());
    let id = new_session(&app).await;
    configure(&app, &id).await;

    let (status, _, _) = send(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/generate"),
        Some(json!({ "url": SHARE_URL, "auto_post": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    h.clock.advance(Duration::from_secs(10));
    let (status, headers, body) = send(&app, Method::POST, &format!("/api/sessions/{id}/publish"), None).await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers[header::RETRY_AFTER], "50");
    assert_eq!(body["meta"]["error_kind"], "rate_limited");
    assert_eq!(h.network_calls().2, 1);

    h.clock.advance(Duration::from_secs(51));
    let (status, _, body) = send(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/publish"),
        Some(json!({ "visibility": "connections" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["post_id"], "urn:li:share:2");
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = Harness::new();
    let app = create_router(h.app_state());

    let (status, _, body) = send(
        &app,
        Method::GET,
        "/api/sessions/6f1c2a8e-0000-4000-8000-000000000000",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["meta"]["error_kind"], "session_not_found");
}

#[tokio::test]
async fn expired_session_reports_expired_state() {
    let h = Harness::new();
    let app = create_router(h.app_state());
    let id = new_session(&app).await;
    configure(&app, &id).await;

    h.clock.advance(Duration::from_secs(30 * 60));
    let (status, _, body) = send(&app, Method::GET, &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "expired");
    assert_eq!(body["data"]["providers"], json!([]));

    let (status, _, body) = send(&app, Method::POST, &format!("/api/sessions/{id}/refresh"), None).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["meta"]["error_kind"], "session_expired");
}

#[tokio::test]
async fn session_limit_is_service_unavailable() {
    let h = Harness::new();
    let policy = SessionPolicy {
        max_sessions: 1,
        ..SessionPolicy::default()
    };
    let sessions = SessionStore::new(Arc::new(h.clock.clone()), policy);
    let app = create_router(AppState::new(h.config.clone(), sessions, h.pipeline.clone()));

    new_session(&app).await;
    let (status, _, body) = send(&app, Method::POST, "/api/sessions", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["meta"]["error_kind"], "session_limit");
}
