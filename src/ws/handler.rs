use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;
use tracing::info;

use crate::services::auth_service;
use crate::state::AppState;
use super::session::run_session;

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws/chat
/// A token may come as `?token=`, a bearer header or an `auth_token` cookie;
/// otherwise gated sessions authenticate with their first frame.
pub async fn chat_ws(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    info!("New chat connection attempt");
    let token = params
        .token
        .or_else(|| auth_service::get_auth_token(&headers).ok());
    let room = state.chat.clone();
    ws.on_upgrade(move |socket| run_session(socket, room, token))
}

/// GET /ws/echo
pub async fn echo_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    info!("New echo connection attempt");
    let room = state.echo.clone();
    ws.on_upgrade(move |socket| run_session(socket, room, None))
}

/// GET /ws/counter
pub async fn counter_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    info!("New counter connection attempt");
    let room = state.counter.clone();
    ws.on_upgrade(move |socket| run_session(socket, room, None))
}
