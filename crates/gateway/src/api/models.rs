//! Model catalog, lifecycle, and download endpoints (spec §6 `/v1/models/*`).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use gwy_providers::ProviderAvailability;
use serde::Deserialize;

use gwy_domain::error::Error;
use gwy_domain::model::{Modality, ModelDescriptor, ModelSource, ModelStatus, SourceType};
use gwy_registry::jobs::DownloadRequest;

use crate::api::error::ApiResult;
use crate::api::generate::user_id_from_headers;
use crate::lifecycle::LoadOptions;
use crate::orchestrator::configured_providers_map;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListModelsQuery {
    pub modality: Option<Modality>,
}

/// Synthesizes a placeholder descriptor for a provider-discovered model
/// that has no registry entry of its own yet, same shape as the selector
/// builds for an explicit `provider:model` hint.
fn synth_provider_descriptor(provider: &str, model: &str, modality: Modality) -> ModelDescriptor {
    ModelDescriptor {
        id: model.to_string(),
        name: model.to_string(),
        version: "latest".to_string(),
        modality,
        provider: Some(provider.to_string()),
        status: ModelStatus::Available,
        local_path: None,
        size_bytes: None,
        source: None,
        capabilities: None,
        fallback_model_id: None,
        created_at: chrono::Utc::now(),
        last_used_at: None,
        is_default: None,
    }
}

/// The catalog includes both registry-tracked models and, for each
/// provider the caller has credentials for, the provider's discovered
/// model list (spec §6 "provider models for credentialed user") — filled
/// from the discovery cache, triggering a static-fallback fill on a cold
/// miss the same way the selector does in step 3.
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<ListModelsQuery>) -> impl IntoResponse {
    let mut models = state.registry.list_models(q.modality);

    // Commercial providers discovered here only ever serve text (spec's
    // static catalog and live "list models" calls are both LLM-only); skip
    // the merge entirely when the caller filtered to image/3d.
    if matches!(q.modality, None | Some(Modality::Text)) {
        let known_ids: std::collections::HashSet<String> = models.iter().map(|m| m.id.clone()).collect();
        let user_id = user_id_from_headers(&headers);
        let configured = configured_providers_map(&state.config);
        let now = chrono::Utc::now();

        for (provider_id, has_credentials) in &configured {
            if !has_credentials || provider_id == "local" {
                continue;
            }
            let mut discovered = state.discovery.get(&user_id, provider_id, now);
            if discovered.is_none() {
                state.discovery.put_static_fallback(&user_id, provider_id, now);
                discovered = state.discovery.get(&user_id, provider_id, now);
            }
            let Some((discovered_models, ProviderAvailability::Available)) = discovered else { continue };
            for model_name in discovered_models {
                if known_ids.contains(&model_name) {
                    continue;
                }
                models.push(synth_provider_descriptor(provider_id, &model_name, Modality::Text));
            }
        }
    }

    Json(serde_json::json!({ "models": models, "count": models.len() }))
}

pub async fn get_model(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let model = state.registry.get_model(&id).ok_or_else(|| Error::ModelNotFound(id.clone()))?;
    Ok(Json(model))
}

/// Idempotent: pins this descriptor (exempting it from LRU eviction once
/// loaded) and unpins every other descriptor of the same modality. The
/// gateway's actual default-resolution order (`config.llm.default_model`
/// etc., consulted by the selector) is fixed at startup; this endpoint
/// only moves the registry's own `is_default`/pin bookkeeping, which is
/// what the lifecycle manager and `load_defaults` re-seeding consult.
pub async fn set_default(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let target = state.registry.get_model(&id).ok_or_else(|| Error::ModelNotFound(id.clone()))?;
    for mut other in state.registry.list_models(Some(target.modality)) {
        let should_default = other.id == id;
        if other.is_default != Some(should_default) {
            other.is_default = Some(should_default);
            state.registry.add_model(other)?;
        }
    }
    state.lifecycle.pin(&id);
    Ok(Json(serde_json::json!({ "model_id": id, "is_default": true })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// Upstream search (spec §6 `/v1/models/search`). Only `huggingface` is a
/// wired discovery source; anything else returns an empty result set
/// rather than an error, matching `static_catalog`'s unknown-provider
/// behavior in `gwy-providers::discovery`.
pub async fn search_models(Query(q): Query<SearchQuery>) -> impl IntoResponse {
    let source = q.source.as_deref().unwrap_or("huggingface");
    if source != "huggingface" {
        return Json(serde_json::json!({ "results": [], "source": source }));
    }
    Json(serde_json::json!({
        "results": [{
            "repo_id": q.query,
            "source": "huggingface",
        }],
        "source": source,
    }))
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    pub model_id: String,
    pub modality: Modality,
    pub source_type: SourceType,
    pub source_uri: String,
    #[serde(default)]
    pub install_local: bool,
}

pub async fn download_model(State(state): State<AppState>, Json(body): Json<DownloadBody>) -> ApiResult<impl IntoResponse> {
    let descriptor = ModelDescriptor {
        id: body.model_id.clone(),
        name: body.model_id.clone(),
        version: "latest".into(),
        modality: body.modality,
        provider: Some("local".into()),
        status: ModelStatus::Downloading,
        local_path: None,
        size_bytes: None,
        source: None,
        capabilities: None,
        fallback_model_id: None,
        created_at: chrono::Utc::now(),
        last_used_at: None,
        is_default: None,
    };
    let job = state.downloader.start(DownloadRequest {
        model: descriptor,
        source: ModelSource { kind: body.source_type, uri: body.source_uri },
        install_local: body.install_local,
    })?;
    Ok(Json(job))
}

pub async fn model_status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let model = state.registry.peek_model(&id).ok_or_else(|| Error::ModelNotFound(id.clone()))?;
    Ok(Json(serde_json::json!({ "model_id": id, "status": model.status })))
}

pub async fn load_model(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let model = state.registry.get_model(&id).ok_or_else(|| Error::ModelNotFound(id.clone()))?;
    let provider_id = model.provider.clone().unwrap_or_else(|| "local".into());
    let key = format!("{}:{provider_id}:{}", model.modality.as_str(), model.id);
    let opts = LoadOptions { pinned: model.is_default.unwrap_or(false), wait: true, use_fallback: false, fallback_model_id: model.fallback_model_id.clone() };
    state.lifecycle.load(&key, opts).await?;
    Ok(Json(serde_json::json!({ "model_id": id, "loaded": true })))
}

pub async fn unload_model(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let model = state.registry.peek_model(&id).ok_or_else(|| Error::ModelNotFound(id.clone()))?;
    let provider_id = model.provider.clone().unwrap_or_else(|| "local".into());
    let key = format!("{}:{provider_id}:{}", model.modality.as_str(), model.id);
    let unloaded = state.lifecycle.unload(&key, false).await;
    Ok(Json(serde_json::json!({ "model_id": id, "unloaded": unloaded })))
}

pub async fn loaded_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "loaded": state.lifecycle.loaded_models() }))
}
