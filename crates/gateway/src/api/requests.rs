//! In-flight request status/cancel endpoints (spec §6 `/v1/requests/*`),
//! backed by `RequestQueue`.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use gwy_domain::error::Error;

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn get_request(State(state): State<AppState>, Path(request_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let status = state.queue.status(&request_id).ok_or_else(|| Error::NotFound(format!("request {request_id} not found")))?;
    Ok(Json(status))
}

pub async fn cancel_request(State(state): State<AppState>, Path(request_id): Path<String>) -> impl IntoResponse {
    let cancelled = state.queue.cancel(&request_id);
    Json(serde_json::json!({ "request_id": request_id, "cancelled": cancelled }))
}
