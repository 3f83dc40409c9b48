//! Provider catalog endpoint (spec §6 `GET /v1/providers`) — reports the
//! statically configured LLM providers and whether their credentials
//! resolved at the env var named in config.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::orchestrator::configured_providers_map;
use crate::state::AppState;

pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let configured = configured_providers_map(&state.config);
    let providers: Vec<_> = state
        .config
        .llm
        .providers
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id,
                "kind": p.kind,
                "configured": configured.get(&p.id).copied().unwrap_or(false),
            })
        })
        .collect();
    Json(serde_json::json!({ "providers": providers, "count": providers.len() }))
}
