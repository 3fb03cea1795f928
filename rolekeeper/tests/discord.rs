//! DiscordClient against a local fake of the REST API.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, patch, put};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};

use rolekeeper::ids::{GuildId, RoleId, UserId};
use rolekeeper::platform::{DiscordClient, Platform, PlatformError};

const GUILD: GuildId = GuildId(1);

#[derive(Default)]
struct Seen {
    reasons: Vec<String>,
    auth: Vec<String>,
}

type Shared = Arc<Mutex<Seen>>;

async fn member(Path((_guild, user)): Path<(u64, u64)>) -> impl IntoResponse {
    if user != 10 {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Unknown Member", "code": 10007 })));
    }
    (
        StatusCode::OK,
        Json(json!({ "user": { "id": "10", "username": "alice" }, "nick": "Ally", "roles": ["20"] })),
    )
}

async fn roles(State(seen): State<Shared>, headers: HeaderMap) -> Json<Value> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        seen.lock().auth.push(auth.to_string());
    }
    Json(json!([{ "id": "20", "name": "VIP" }, { "id": "21", "name": "Mod" }]))
}

async fn member_role(
    State(seen): State<Shared>,
    Path((_guild, _user, role)): Path<(u64, u64, u64)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(reason) = headers.get("x-audit-log-reason").and_then(|v| v.to_str().ok()) {
        seen.lock().reasons.push(reason.to_string());
    }
    match role {
        21 => (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "retry_after": 1.5, "global": false }))).into_response(),
        22 => (StatusCode::FORBIDDEN, "Missing Permissions").into_response(),
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn edit_original(Path((app, token)): Path<(u64, String)>, Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "app": app, "token": token, "content": body["content"] }))
}

async fn register(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn fake_discord() -> (String, Shared) {
    let seen = Shared::default();
    let app = Router::new()
        .route("/guilds/{guild}/members/{user}", get(member))
        .route("/guilds/{guild}/roles", get(roles))
        .route(
            "/guilds/{guild}/members/{user}/roles/{role}",
            put(member_role).delete(member_role),
        )
        .route("/webhooks/{app}/{token}/messages/@original", patch(edit_original))
        .route("/applications/{app}/commands", put(register))
        .with_state(Arc::clone(&seen));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

#[tokio::test]
async fn member_lookup_maps_404_to_none() {
    let (base, _) = fake_discord().await;
    let client = DiscordClient::new("secret", None).with_base_url(&base);

    let m = client.member(GUILD, UserId(10)).await.unwrap().unwrap();
    assert_eq!(m.display_name, "Ally");
    assert!(m.has_role(RoleId(20)));
    assert!(client.member(GUILD, UserId(11)).await.unwrap().is_none());
}

#[tokio::test]
async fn role_lookup_searches_guild_roles() {
    let (base, seen) = fake_discord().await;
    let client = DiscordClient::new("secret", None).with_base_url(&base);

    assert_eq!(client.role(GUILD, RoleId(21)).await.unwrap().unwrap().name, "Mod");
    assert!(client.role(GUILD, RoleId(99)).await.unwrap().is_none());
    assert_eq!(seen.lock().auth[0], "Bot secret");
}

#[tokio::test]
async fn role_mutations_carry_encoded_reason() {
    let (base, seen) = fake_discord().await;
    let client = DiscordClient::new("secret", None).with_base_url(&base);

    client.add_role(GUILD, UserId(10), RoleId(20), "Timed role granted").await.unwrap();
    assert_eq!(seen.lock().reasons, vec!["Timed%20role%20granted".to_string()]);
}

#[tokio::test]
async fn rate_limit_and_forbidden_are_classified() {
    let (base, _) = fake_discord().await;
    let client = DiscordClient::new("secret", None).with_base_url(&base);

    match client.remove_role(GUILD, UserId(10), RoleId(21), "x").await {
        Err(PlatformError::RateLimited { retry_after }) => assert_eq!(retry_after.as_millis(), 1500),
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert!(matches!(
        client.remove_role(GUILD, UserId(10), RoleId(22), "x").await,
        Err(PlatformError::Forbidden(_))
    ));
}

#[tokio::test]
async fn interaction_reply_needs_application_id() {
    let (base, _) = fake_discord().await;
    let unconfigured = DiscordClient::new("secret", None).with_base_url(&base);
    assert!(matches!(
        unconfigured.edit_interaction_reply("tok", "hi").await,
        Err(PlatformError::Unconfigured(_))
    ));

    let client = DiscordClient::new("secret", Some(7)).with_base_url(&base);
    client.edit_interaction_reply("tok", "hi").await.unwrap();
}

#[tokio::test]
async fn register_commands_counts_definitions() {
    let (base, _) = fake_discord().await;
    let client = DiscordClient::new("secret", Some(7)).with_base_url(&base);
    let defs = rolekeeper::interactions::command_definitions();
    let expected = defs.as_array().unwrap().len();
    assert_eq!(client.register_commands(None, &defs).await.unwrap(), expected);
}
