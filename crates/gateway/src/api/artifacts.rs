//! Artifact byte-serving endpoint (spec §6 `GET /v1/artifacts/{id}`),
//! backed by `gwy_registry::artifacts::ArtifactStore`.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn get_artifact(State(state): State<AppState>, Path(artifact_id): Path<String>) -> ApiResult<Response> {
    let artifact = state.artifacts.get(&artifact_id)?;
    let bytes = state.artifacts.bytes(&artifact_id)?;
    Ok((
        [(axum::http::header::CONTENT_TYPE, artifact.kind.media_type())],
        bytes,
    )
        .into_response())
}
