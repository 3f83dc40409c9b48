//! `/v1/generate` and session-bound generate/regenerate endpoints (spec
//! §6 "Core generation" + SSE framing rules).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;
use gwy_domain::generate::{GenerateInput, GenerateRequest, GenerateResponse, StreamEvent, DONE};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// This gateway authenticates callers with a single shared bearer token
/// (spec §6), not per-user login, so the per-user credits/discovery key
/// the orchestrator needs is taken from an `X-User-Id` header rather
/// than derived from the auth token itself.
pub(crate) fn user_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

fn base_url_from_headers(headers: &HeaderMap) -> String {
    let scheme = headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()).unwrap_or("http");
    let host = headers.get("host").and_then(|v| v.to_str().ok()).unwrap_or("localhost");
    format!("{scheme}://{host}")
}

/// Rewrites relative `/v1/artifacts/{id}` URLs to absolute using the
/// request's base URL (spec §6 "Artifact URL rewrite"). Already-absolute
/// URLs are left untouched.
fn rewrite_artifact_urls(base: &str, response: &mut GenerateResponse) {
    let Some(artifacts) = response.output.artifacts.as_mut() else { return };
    for artifact in artifacts {
        if artifact.url.starts_with('/') {
            artifact.url = format!("{base}{}", artifact.url);
        }
    }
}

pub async fn generate(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<GenerateRequest>) -> ApiResult<Response> {
    dispatch(state, headers, req).await
}

pub async fn session_generate(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(mut req): Json<GenerateRequest>,
) -> ApiResult<Response> {
    req.session_id = Some(session_id);
    dispatch(state, headers, req).await
}

pub async fn session_regenerate(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let (modality, input) = state.sessions.prepare_regenerate(&session_id)?;
    let prompt = input.get("prompt").and_then(serde_json::Value::as_str).map(str::to_string);
    let images = input.get("images").and_then(|v| v.as_array()).map(|arr| {
        arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
    });
    let mesh = input.get("mesh").and_then(|v| v.as_str()).map(str::to_string);

    let req = GenerateRequest {
        session_id: Some(session_id),
        modality,
        input: GenerateInput { prompt, images, mesh },
        ..Default::default()
    };
    dispatch(state, headers, req).await
}

async fn dispatch(state: AppState, headers: HeaderMap, req: GenerateRequest) -> ApiResult<Response> {
    let user_id = user_id_from_headers(&headers);
    let base = base_url_from_headers(&headers);

    if req.stream {
        let stream = crate::orchestrator::generate_stream(state, user_id, req).await?;

        let sse_stream = stream.map(move |item| -> Result<Event, Infallible> {
            let event = match item {
                Ok(mut event) => {
                    if let StreamEvent::Complete(ref mut response) = event {
                        rewrite_artifact_urls(&base, response);
                    }
                    event
                }
                Err(err) => StreamEvent::error(err.code(), err.to_string()),
            };
            let json = event.to_data_line().unwrap_or_else(|_| {
                serde_json::to_string(&serde_json::json!({"error": {"code": "internal_error", "message": "failed to encode event"}}))
                    .unwrap_or_default()
            });
            Ok(Event::default().data(json))
        });
        let done = futures_util::stream::once(async { Ok(Event::default().data(DONE)) });

        Ok(Sse::new(sse_stream.chain(done))
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
            .into_response())
    } else {
        let mut response = crate::orchestrator::generate(&state, &user_id, req).await?;
        rewrite_artifact_urls(&base, &mut response);
        Ok(Json(response).into_response())
    }
}
