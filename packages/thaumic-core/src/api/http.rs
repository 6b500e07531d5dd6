//! Admission layer (C7) and router construction.
//!
//! Everything a connection must clear before it ever reaches the
//! dispatcher's read loop lives here: origin policy, bearer-token
//! resolution, the per-user connection cap, and the IP-keyed join-attempt
//! limiter (§4.7). A rejection at this layer is a plain HTTP response — the
//! WebSocket upgrade never completes, so there is nothing to close.

use std::net::SocketAddr;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::{ws, AppState};
use crate::clock::now_millis;
use crate::error::{PlaysyncError, RateLimitKind};

/// Creates the Axum router with all routes.
///
/// The `/health` and `/ready` probes are plain GETs a browser dashboard may
/// poll cross-origin; `cors_layer` applies the same allow-list the upgrade
/// path enforces in [`origin_is_allowed`] so the two origin policies never
/// drift apart. `/ws` itself needs no CORS headers — browsers don't apply
/// CORS to the WebSocket handshake — so the layer is harmless there too.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Builds the CORS layer matching `origin_is_allowed`'s policy: an empty
/// allow-list is permissive, otherwise only the configured origins (plus
/// always-allowed localhost) may read `/health`/`/ready` cross-origin.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    if allowed_origins.is_empty() {
        return layer.allow_origin(AllowOrigin::mirror_request());
    }
    let mut origins: Vec<HeaderValue> = vec![
        HeaderValue::from_static("http://localhost"),
        HeaderValue::from_static("http://127.0.0.1"),
    ];
    for origin in allowed_origins {
        if let Ok(value) = HeaderValue::from_str(origin) {
            origins.push(value);
        }
    }
    layer.allow_origin(origins)
}

/// Liveness probe: "Is the process running?"
async fn health_check() -> impl IntoResponse {
    axum::Json(json!({ "status": "ok", "service": crate::protocol_constants::APP_NAME }))
}

/// Readiness probe: reports current room load against the configured cap.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ready",
        "rooms": state.manager.room_count(),
        "maxRooms": state.config.max_rooms,
    }))
}

/// True if `origin` is allowed under `allowed_origins` (empty = permissive,
/// beyond the always-allowed loopback origins used by local dev clients).
///
/// A missing `Origin` header is never itself a reason to reject the
/// handshake — non-browser clients (native apps, other servers) don't send
/// one at all. Credential validation, not origin policy, is what keeps those
/// clients honest; that happens later, against the bearer token.
fn origin_is_allowed(allowed_origins: &[String], origin: Option<&str>) -> bool {
    if allowed_origins.is_empty() {
        return true;
    }
    match origin {
        Some(origin) => {
            origin.starts_with("http://localhost") || origin.starts_with("http://127.0.0.1") || {
                allowed_origins.iter().any(|allowed| allowed == origin)
            }
        }
        None => true,
    }
}

/// Extracts a bearer credential from the `Authorization` header, falling
/// back to a `token` query parameter — browsers cannot set arbitrary headers
/// on the request that initiates a WebSocket handshake, so a same-origin
/// client that can't attach `Authorization` still has a way to authenticate.
fn extract_bearer_token<'a>(headers: &'a HeaderMap, uri: &'a axum::http::Uri) -> Option<&'a str> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token);
            }
        }
    }
    uri.query()
        .and_then(|query| query.split('&').find_map(|pair| pair.strip_prefix("token=")))
}

/// WebSocket upgrade entry point: runs the admission checks of §4.7 before
/// handing the connection to the dispatcher.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: axum::http::Uri,
) -> Response {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    if !origin_is_allowed(&state.config.allowed_origins, origin) {
        log::warn!("[WS] rejected connection from disallowed origin {origin:?}");
        return PlaysyncError::Authorization("origin not allowed".into()).into_response();
    }

    let now = now_millis();
    if !state.join_limiter.admit(&remote_addr.ip().to_string(), now) {
        return PlaysyncError::RateLimit(RateLimitKind::JoinFlood).into_response();
    }

    let token = extract_bearer_token(&headers, &uri);
    let Some(user) = state.auth.extract_user(token).await else {
        return PlaysyncError::Authorization("invalid or missing credential".into()).into_response();
    };

    let slot = match state.manager.acquire_connection_slot(user.user_id) {
        Ok(slot) => slot,
        Err(err) => return err.into_response(),
    };

    ws.max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| ws::handle_ws(socket, state, user, slot, remote_addr))
}
