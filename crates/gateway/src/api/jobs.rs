//! Download job endpoints (spec §6 `/v1/jobs/*`), backed by `gwy_registry::jobs::JobStore`.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use gwy_domain::error::Error;

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.jobs.list_jobs();
    Json(serde_json::json!({ "jobs": jobs, "count": jobs.len() }))
}

pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let job = state.jobs.get_job(&job_id).ok_or_else(|| Error::NotFound(format!("job {job_id} not found")))?;
    Ok(Json(job))
}

pub async fn cancel_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<impl IntoResponse> {
    let job = state.jobs.cancel_job(&job_id).ok_or_else(|| Error::NotFound(format!("job {job_id} not found")))?;
    Ok(Json(job))
}
