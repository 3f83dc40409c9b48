//! Generate Orchestrator (spec §4.L): the single place that ties session
//! state, the Backend Selector, image preprocessing, the Model Lifecycle
//! Manager, and the Request Queue together into one `generate`/
//! `generate_stream` call. API handlers call into this module and never
//! touch the selector, lifecycle manager, or queue directly.

use std::path::PathBuf;
use std::sync::Arc;

use async_stream::try_stream;
use chrono::Utc;
use futures_util::StreamExt;
use gwy_domain::config::{Config, ProviderConfig};
use gwy_domain::error::{Error, Result};
use gwy_domain::generate::{
    BoxStream, GenerateOutput, GenerateRequest, GenerateResponse, SelectionInfo, StreamEvent,
};
use gwy_domain::model::{Modality, ModelDescriptor};
use gwy_providers::selector::{self, SelectorContext};
use gwy_providers::traits::{Adapter, AdapterEvent};
use gwy_registry::artifacts::ArtifactType;
use gwy_registry::Registry;

use crate::lifecycle::{LifecycleManager, LoadOptions, LoadOutcome, ModelLoader};
use crate::queue::{Executor, RequestStatus};
use crate::state::AppState;

/// Bridges `LifecycleManager`'s loader seam to `adapters::build_adapter`.
pub struct GatewayModelLoader {
    config: Arc<Config>,
    registry: Arc<Registry>,
    local_output_dir: PathBuf,
}

impl GatewayModelLoader {
    pub fn new(config: Arc<Config>, registry: Arc<Registry>, local_output_dir: PathBuf) -> Self {
        Self { config, registry, local_output_dir }
    }
}

/// The lifecycle manager's keys are opaque strings; this gateway encodes
/// `modality:provider:model` so the loader can reconstruct what it needs
/// without a side table.
fn lifecycle_key(modality: Modality, provider: &str, model: &str) -> String {
    format!("{}:{provider}:{model}", modality.as_str())
}

fn parse_lifecycle_key(key: &str) -> Result<(Modality, String, String)> {
    let mut parts = key.splitn(3, ':');
    let modality = match parts.next() {
        Some("text") => Modality::Text,
        Some("image") => Modality::Image,
        Some("3d") => Modality::ThreeD,
        _ => return Err(Error::Internal(format!("malformed lifecycle key '{key}'"))),
    };
    let provider = parts.next().ok_or_else(|| Error::Internal(format!("malformed lifecycle key '{key}'")))?;
    let model = parts.next().ok_or_else(|| Error::Internal(format!("malformed lifecycle key '{key}'")))?;
    Ok((modality, provider.to_string(), model.to_string()))
}

#[async_trait::async_trait]
impl ModelLoader for GatewayModelLoader {
    async fn load(&self, key: &str) -> Result<Arc<Adapter>> {
        let (modality, provider_id, model_id) = parse_lifecycle_key(key)?;
        let provider_cfg = self
            .config
            .llm
            .providers
            .iter()
            .find(|p| p.id == provider_id)
            .ok_or_else(|| Error::ProviderNotConfigured(format!("provider '{provider_id}' is not configured")))?;

        // `selector::resolve` can hand back a path-less synthesized
        // descriptor for the local provider (its fallback branches build
        // one with `synth_descriptor`, which never carries `local_path`);
        // re-resolve the real path from the registry by model id.
        let local_path = self.registry.peek_model(&model_id).and_then(|d| d.local_path);

        let adapter = crate::adapters::build_adapter(provider_cfg, modality, local_path.as_deref(), &self.local_output_dir)?;
        Ok(Arc::new(adapter))
    }

    async fn unload(&self, _key: &str, _instance: Arc<Adapter>) {
        // Local adapters own only a path to an external binary (no
        // resident process between calls); remote adapters own an HTTP
        // client. Both are fully released by dropping the `Arc`.
    }
}

pub(crate) fn configured_providers_map(cfg: &Config) -> std::collections::HashMap<String, bool> {
    cfg.llm
        .providers
        .iter()
        .map(|p| (p.id.clone(), credentials_configured(p)))
        .collect()
}

fn credentials_configured(cfg: &ProviderConfig) -> bool {
    use gwy_domain::config::AuthMode;
    match cfg.auth.mode {
        AuthMode::None => true,
        _ => cfg.auth.env.as_ref().map(|env| std::env::var(env).is_ok()).unwrap_or(false),
    }
}

/// A 429 from a commercial provider is additionally reported to the
/// discovery cache (spec §7 "Propagation policy"), so the selector and
/// lifecycle manager back off that `(user, provider)` for a while. A
/// message mentioning quota gets the long exhausted cooldown; anything
/// else gets the short rate-limited one.
fn record_provider_rate_limit(state: &AppState, user_id: &str, provider_id: &str, err: &Error) {
    if provider_id == "local" {
        return;
    }
    if let Error::RateLimit(message) = err {
        let now = Utc::now();
        if message.to_ascii_lowercase().contains("quota") {
            state.discovery.mark_quota_exhausted(user_id, provider_id, Some(message.clone()), now);
        } else {
            state.discovery.mark_rate_limited(user_id, provider_id, now);
        }
    }
}

struct Prepared {
    descriptor: ModelDescriptor,
    selection: SelectionInfo,
    credits: Option<gwy_domain::generate::CreditsStatus>,
    lifecycle_key: String,
    adapter: Arc<Adapter>,
    session_id: Option<String>,
}

async fn prepare(state: &AppState, user_id: &str, req: &mut GenerateRequest) -> Result<Prepared> {
    if let Some(session_id) = req.session_id.clone() {
        let session = state.sessions.get(&session_id)?;
        if req.state_tokens.is_none() {
            req.state_tokens = session.state_tokens.clone();
        }
    }

    let configured_providers = configured_providers_map(&state.config);
    let credits = Some(state.users.credits_status(user_id));
    let ctx = SelectorContext {
        configured_providers: &configured_providers,
        default_model: state.config.llm.default_model.as_deref(),
        default_image_model: state.config.llm.default_image_model.as_deref(),
        default_3d_model: state.config.llm.default_3d_model.as_deref(),
        credits: credits.clone(),
        // Single-tenant gateway: every authenticated caller has provider
        // access. A future multi-tenant build would derive this from the
        // user record instead.
        has_provider_access: true,
        discovery: &state.discovery,
        user_id,
    };
    let resolution = selector::resolve(&state.registry, req, &ctx)?;

    if let Some(images) = req.input.images.clone() {
        if !images.is_empty() {
            let caps = resolution.descriptor.capabilities.as_ref();
            let result = gwy_providers::images::preprocess_images(
                &images,
                caps.and_then(|c| c.image_input_max_edge),
                caps.and_then(|c| c.image_input_max_pixels),
                caps.and_then(|c| c.image_input_formats.as_deref()),
                resolution.selection.selected_provider.as_deref(),
            )?;
            for warning in &result.warnings {
                tracing::warn!(model = %resolution.descriptor.id, %warning, "image preprocessing warning");
            }
            req.input.images = Some(result.images);
        }
    }

    let provider_id = resolution.selection.selected_provider.clone().unwrap_or_else(|| "local".to_string());
    let key = lifecycle_key(resolution.descriptor.modality, &provider_id, &resolution.descriptor.id);

    let opts = LoadOptions {
        pinned: resolution.descriptor.is_default.unwrap_or(false),
        wait: true,
        use_fallback: false,
        fallback_model_id: resolution.descriptor.fallback_model_id.clone(),
    };
    let adapter = match state.lifecycle.load(&key, opts).await? {
        LoadOutcome::Loaded(adapter) => adapter,
        LoadOutcome::Unavailable => {
            return Err(Error::ServiceUnavailable(format!(
                "model '{}' could not be loaded right now, try again shortly",
                resolution.descriptor.id
            )))
        }
    };
    state.lifecycle.mark_busy(&key);

    Ok(Prepared {
        descriptor: resolution.descriptor,
        selection: resolution.selection,
        credits: resolution.credits,
        lifecycle_key: key,
        adapter,
        session_id: req.session_id.clone(),
    })
}

fn promote_artifacts(state: &AppState, modality: Modality, mut output: GenerateOutput) -> Result<GenerateOutput> {
    let Some(artifacts) = output.artifacts.take() else { return Ok(output) };
    let kind = match modality {
        Modality::Image => ArtifactType::Image,
        Modality::ThreeD => ArtifactType::Mesh,
        Modality::Text => {
            output.artifacts = Some(artifacts);
            return Ok(output);
        }
    };

    let mut promoted = Vec::with_capacity(artifacts.len());
    for artifact_ref in artifacts {
        match artifact_ref.url.strip_prefix("file://") {
            Some(path) => {
                let bytes = std::fs::read(path)?;
                let artifact = state.artifacts.put(&bytes, kind)?;
                let _ = std::fs::remove_file(path);
                promoted.push(gwy_domain::generate::ArtifactRef {
                    artifact_id: artifact.artifact_id.clone(),
                    url: format!("/v1/artifacts/{}", artifact.artifact_id),
                    media_type: kind.media_type().to_string(),
                    size_bytes: Some(bytes.len() as u64),
                });
            }
            None => promoted.push(artifact_ref),
        }
    }
    output.artifacts = Some(promoted);
    Ok(output)
}

async fn run_once(state: &AppState, prepared: &Prepared, req: GenerateRequest) -> Result<GenerateOutput> {
    let adapter = prepared.adapter.clone();
    let executor: Executor = Box::new(move || {
        Box::pin(async move {
            match &*adapter {
                Adapter::Text(a) => a.generate(&req).await,
                Adapter::Image(a) => a.generate(&req).await,
                Adapter::ThreeD(a) => a.generate(&req).await,
            }
        })
    });

    let request_id = state.queue.enqueue(&prepared.lifecycle_key, executor);
    let view = state
        .queue
        .wait_for_completion(&request_id, None)
        .await
        .ok_or_else(|| Error::Internal("request vanished from the queue".into()))?;

    match view.status {
        RequestStatus::Completed => Ok(view.output.unwrap_or_default()),
        RequestStatus::Cancelled => Err(Error::ServiceUnavailable("request was cancelled".into())),
        RequestStatus::Failed => {
            let detail = view.error.ok_or_else(|| Error::Internal("failed request carried no error detail".into()))?;
            Err(Error::from_code(detail.code, detail.message))
        }
        RequestStatus::Queued | RequestStatus::Running => {
            Err(Error::Internal("request ended in a non-terminal state".into()))
        }
    }
}

pub async fn generate(state: &AppState, user_id: &str, mut req: GenerateRequest) -> Result<GenerateResponse> {
    req.stream = false;
    let prepared = prepare(state, user_id, &mut req).await?;

    let result = run_once(state, &prepared, req.clone()).await;
    state.lifecycle.mark_idle(&prepared.lifecycle_key);
    if let Err(err) = &result {
        let provider_id = prepared.selection.selected_provider.as_deref().unwrap_or("local");
        record_provider_rate_limit(state, user_id, provider_id, err);
    }
    let output = promote_artifacts(state, prepared.descriptor.modality, result?)?;

    if let Some(session_id) = &prepared.session_id {
        let input_value = serde_json::to_value(&req.input).unwrap_or(serde_json::Value::Null);
        let output_value = serde_json::to_value(&output).unwrap_or(serde_json::Value::Null);
        state.sessions.append_turn(session_id, prepared.descriptor.modality, input_value, output_value, req.state_tokens.clone())?;
    }

    Ok(GenerateResponse {
        request_id: uuid::Uuid::new_v4().to_string(),
        model: prepared.descriptor.id,
        modality: prepared.descriptor.modality,
        output,
        selection: prepared.selection,
        credits: prepared.credits,
        session_id: prepared.session_id,
    })
}

struct MarkIdleGuard {
    lifecycle: Arc<LifecycleManager>,
    key: String,
}

impl Drop for MarkIdleGuard {
    fn drop(&mut self) {
        self.lifecycle.mark_idle(&self.key);
    }
}

/// Streaming requests acquire the lifecycle slot directly and bypass the
/// Request Queue: the queue's executor seam returns a single
/// `GenerateOutput`, not an incremental stream, and a long-lived SSE
/// connection is not the kind of bursty, queueable unit of work the FIFO
/// exists to smooth out. Concurrency is still bounded by the lifecycle's
/// `mark_busy`/`mark_idle` pair — a model can be mid-stream to one caller
/// while another caller's non-streaming request waits behind it in the
/// model's queue.
pub async fn generate_stream(
    state: AppState,
    user_id: String,
    mut req: GenerateRequest,
) -> Result<BoxStream<'static, Result<StreamEvent>>> {
    req.stream = true;
    let prepared = prepare(&state, &user_id, &mut req).await?;

    let descriptor = prepared.descriptor.clone();
    let selection = prepared.selection.clone();
    let credits = prepared.credits.clone();
    let session_id = prepared.session_id.clone();
    let adapter = prepared.adapter.clone();
    let guard = MarkIdleGuard { lifecycle: state.lifecycle.clone(), key: prepared.lifecycle_key.clone() };
    let state_for_artifacts = state.clone();
    let state_for_errors = state.clone();
    let req_for_turn = req.clone();
    let provider_id = selection.selected_provider.clone().unwrap_or_else(|| "local".to_string());

    let stream = try_stream! {
        let _guard = guard;

        yield StreamEvent::model_selected(
            selection.selected_model.clone(),
            descriptor.modality,
            selection.selected_provider.clone(),
            selection.fallback_used,
        );

        let record_err = |err: Error| {
            record_provider_rate_limit(&state_for_errors, &user_id, &provider_id, &err);
            err
        };

        let output = match &*adapter {
            Adapter::Text(text_adapter) => {
                let events = text_adapter.generate_stream(&req).await.map_err(record_err)?;
                futures_util::pin_mut!(events);
                let mut full_text = String::new();
                let mut usage = None;
                while let Some(event) = events.next().await {
                    match event.map_err(record_err)? {
                        AdapterEvent::Text(chunk) => {
                            full_text.push_str(&chunk);
                            yield StreamEvent::text_delta(chunk);
                        }
                        AdapterEvent::Done(u) => usage = u,
                    }
                }
                GenerateOutput { text: Some(full_text), artifacts: None, usage }
            }
            Adapter::Image(image_adapter) => image_adapter.generate(&req).await.map_err(record_err)?,
            Adapter::ThreeD(mesh_adapter) => mesh_adapter.generate(&req).await.map_err(record_err)?,
        };

        let output = promote_artifacts(&state_for_artifacts, descriptor.modality, output)?;

        if let Some(sid) = &session_id {
            let input_value = serde_json::to_value(&req_for_turn.input).unwrap_or(serde_json::Value::Null);
            let output_value = serde_json::to_value(&output).unwrap_or(serde_json::Value::Null);
            state_for_artifacts.sessions.append_turn(sid, descriptor.modality, input_value, output_value, req_for_turn.state_tokens.clone())?;
        }

        let response = GenerateResponse {
            request_id: uuid::Uuid::new_v4().to_string(),
            model: descriptor.id.clone(),
            modality: descriptor.modality,
            output,
            selection: selection.clone(),
            credits: credits.clone(),
            session_id: session_id.clone(),
        };
        yield StreamEvent::Complete(Box::new(response));
    };

    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_key_round_trips() {
        let key = lifecycle_key(Modality::Image, "local", "sdxl-turbo");
        let (modality, provider, model) = parse_lifecycle_key(&key).unwrap();
        assert_eq!(modality, Modality::Image);
        assert_eq!(provider, "local");
        assert_eq!(model, "sdxl-turbo");
    }

    #[test]
    fn malformed_key_is_rejected() {
        assert!(parse_lifecycle_key("not-enough-parts").is_err());
    }
}
