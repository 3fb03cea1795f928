//! HTTP surface: liveness check and the Discord interactions webhook.
//!
//! `GET /` and `GET /healthz` always answer `OK` for the host's health check.
//! `POST /interactions` is mounted only when the application public key is
//! configured.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use ed25519_dalek::VerifyingKey;

use crate::commands;
use crate::interactions::{self, Interaction};
use crate::platform::{self, Platform};
use crate::state::SharedState;

pub struct WebState<P: Platform> {
    pub shared: Arc<SharedState<P>>,
    pub public_key: Option<VerifyingKey>,
}

pub fn router<P: Platform>(state: Arc<WebState<P>>) -> Router {
    let mut app = Router::new()
        .route("/", get(health))
        .route("/healthz", get(health));
    if state.public_key.is_some() {
        app = app.route("/interactions", post(interactions_webhook::<P>));
    }
    app.with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

async fn interactions_webhook<P: Platform>(
    State(state): State<Arc<WebState<P>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(key) = state.public_key.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let signature = header(&headers, "x-signature-ed25519");
    let timestamp = header(&headers, "x-signature-timestamp");
    if !interactions::verify_signature(key, signature, timestamp, &body) {
        tracing::debug!("Rejected interaction with bad signature");
        return (StatusCode::UNAUTHORIZED, "invalid request signature").into_response();
    }
    if !interactions::is_fresh(timestamp, Utc::now()) {
        tracing::debug!(timestamp, "Rejected interaction with stale timestamp");
        return (StatusCode::UNAUTHORIZED, "stale request timestamp").into_response();
    }

    let interaction: Interaction = match serde_json::from_slice(&body) {
        Ok(i) => i,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed interaction payload");
            return (StatusCode::BAD_REQUEST, "malformed interaction").into_response();
        }
    };

    match interaction.kind {
        interactions::PING => Json(interactions::pong()).into_response(),
        interactions::APPLICATION_COMMAND => {
            let inv = match interaction.invocation() {
                Ok(inv) => inv,
                Err(msg) => return Json(interactions::message(&format!("⚠️ {msg}"))).into_response(),
            };
            // Discord wants an answer within 3 seconds; do the work after
            // acknowledging and edit the deferred reply when done.
            let shared = Arc::clone(&state.shared);
            let token = interaction.token;
            tokio::spawn(async move {
                let reply = commands::execute(&shared, inv, Utc::now()).await;
                let edited = platform::bounded(
                    shared.platform_timeout,
                    shared.platform.edit_interaction_reply(&token, &reply),
                )
                .await;
                if let Err(e) = edited {
                    tracing::error!(error = %e, "Failed to deliver command reply");
                }
            });
            Json(interactions::deferred()).into_response()
        }
        other => {
            tracing::debug!(kind = other, "Ignoring unsupported interaction type");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}
