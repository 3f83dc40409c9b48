//! Session CRUD + reset (spec §6 `GET/POST/PUT/DELETE /v1/sessions[/{sid}[/reset]]`).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.list();
    Json(serde_json::json!({ "sessions": sessions, "count": sessions.len() }))
}

pub async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.create())
}

pub async fn get_session(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.sessions.get(&session_id)?))
}

pub async fn close_session(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.sessions.close(&session_id)?;
    Ok(Json(serde_json::json!({ "session_id": session_id, "closed": true })))
}

pub async fn reset_session(State(state): State<AppState>, Path(session_id): Path<String>) -> ApiResult<impl IntoResponse> {
    state.sessions.reset(&session_id)?;
    Ok(Json(serde_json::json!({ "session_id": session_id, "reset": true })))
}
