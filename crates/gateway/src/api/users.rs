//! Minimal user/credits endpoints (spec §6 `/v1/users/*`).
//!
//! This gateway has no login flow and no per-user token/provider-key
//! storage of its own (callers share one API token, see `api::auth`); the
//! surface is narrowed to what `gwy::users::UserStore` actually tracks —
//! a user's generation credits standing.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use gwy_domain::generate::CreditsState;

use crate::state::AppState;

pub async fn list_users(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "users": state.users.list() }))
}

pub async fn get_user(State(state): State<AppState>, Path(user_id): Path<String>) -> impl IntoResponse {
    Json(state.users.get_or_create(&user_id))
}

#[derive(Debug, Deserialize)]
pub struct SetCreditsBody {
    pub state: CreditsState,
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
}

pub async fn set_credits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<SetCreditsBody>,
) -> impl IntoResponse {
    state.users.set_credits(&user_id, body.state, body.retry_after_seconds);
    Json(state.users.get_or_create(&user_id))
}
