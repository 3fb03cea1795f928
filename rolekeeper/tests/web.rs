//! HTTP surface: health check and signed interaction webhook.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use tower::ServiceExt;

use rolekeeper::commands;
use rolekeeper::platform::MockPlatform;
use rolekeeper::state::SharedState;
use rolekeeper::store::Store;
use rolekeeper::web::{self, WebState};

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

fn app(with_key: bool) -> (Router, MockPlatform) {
    let platform = MockPlatform::new();
    let shared = Arc::new(SharedState::new(
        Store::open_memory().unwrap(),
        platform.clone(),
        None,
        Duration::from_secs(5),
    ));
    let public_key = with_key.then(|| signing_key().verifying_key());
    (web::router(Arc::new(WebState { shared, public_key })), platform)
}

fn signed(body: &str) -> Request<Body> {
    signed_at(&Utc::now().timestamp().to_string(), body)
}

fn signed_at(timestamp: &str, body: &str) -> Request<Body> {
    let message = [timestamp.as_bytes(), body.as_bytes()].concat();
    let signature = signing_key().sign(&message);
    Request::post("/interactions")
        .header("content-type", "application/json")
        .header("x-signature-ed25519", hex::encode(signature.to_bytes()))
        .header("x-signature-timestamp", timestamp)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoints_answer_ok() {
    let (app, _) = app(false);
    for path in ["/", "/healthz"] {
        let resp = app
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }
}

#[tokio::test]
async fn interactions_disabled_without_public_key() {
    let (app, _) = app(false);
    let resp = app.oneshot(signed(r#"{"type":1}"#)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let (app, _) = app(true);
    let resp = app.oneshot(signed(r#"{"type":1}"#)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({ "type": 1 }));
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let (app, _) = app(true);
    let now = Utc::now().timestamp();
    let mut req = signed_at(&now.to_string(), r#"{"type":1}"#);
    req.headers_mut()
        .insert("x-signature-timestamp", (now + 1).to_string().parse().unwrap());
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn validly_signed_but_stale_request_is_rejected() {
    let (app, platform) = app(true);
    let stale = (Utc::now().timestamp() - 3600).to_string();
    let body = r#"{"type": 2, "token": "replayed", "guild_id": "1", "member": {"user": {"id": "5"}, "permissions": "0"}, "data": {"name": "help"}}"#;
    let resp = app.oneshot(signed_at(&stale, body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(platform.interaction_replies().is_empty());
}

#[tokio::test]
async fn command_is_deferred_then_reply_edited() {
    let (app, platform) = app(true);
    let body = r#"{
        "type": 2,
        "token": "interaction-token",
        "guild_id": "1",
        "member": {"user": {"id": "5"}, "permissions": "0"},
        "data": {"name": "help"}
    }"#;
    let resp = app.oneshot(signed(body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!({ "type": 5 }));

    let mut replies = platform.interaction_replies();
    for _ in 0..100 {
        if !replies.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        replies = platform.interaction_replies();
    }
    assert_eq!(replies, vec![("interaction-token".to_string(), commands::HELP.to_string())]);
}

#[tokio::test]
async fn command_outside_guild_gets_immediate_message() {
    let (app, platform) = app(true);
    let body = r#"{"type": 2, "token": "t", "data": {"name": "help"}}"#;
    let resp = app.oneshot(signed(body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["type"], 4);
    assert_eq!(json["data"]["flags"], 64);
    assert!(platform.interaction_replies().is_empty());
}
