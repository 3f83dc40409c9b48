//! Operational endpoints (spec §6 `GET /health, /ready, /version, /metrics`).

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness additionally reports whether at least one LLM provider is
/// configured; an empty provider list is a startup warning (see
/// `Config::validate`), not a hard failure, but it is surfaced here for
/// load balancers that want to drain an unconfigured instance.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = !state.config.llm.providers.is_empty();
    let status = if ready { axum::http::StatusCode::OK } else { axum::http::StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({ "ready": ready })))
}

pub async fn version() -> impl IntoResponse {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Minimal text-exposition metrics (no `prometheus` crate in the
/// dependency stack — this mirrors the teacher's plain-counter style
/// rather than pulling in a new metrics library for one endpoint).
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let loaded = state.lifecycle.loaded_models();
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds().max(0);

    let mut out = String::new();
    out.push_str("# TYPE gwy_gateway_uptime_seconds gauge\n");
    out.push_str(&format!("gwy_gateway_uptime_seconds {uptime}\n"));
    out.push_str("# TYPE gwy_gateway_loaded_models gauge\n");
    out.push_str(&format!("gwy_gateway_loaded_models {}\n", loaded.len()));
    out.push_str("# TYPE gwy_gateway_models_total gauge\n");
    out.push_str(&format!("gwy_gateway_models_total {}\n", state.registry.list_models(None).len()));
    out.push_str("# TYPE gwy_gateway_sessions_total gauge\n");
    out.push_str(&format!("gwy_gateway_sessions_total {}\n", state.sessions.list().len()));

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        out,
    )
}
