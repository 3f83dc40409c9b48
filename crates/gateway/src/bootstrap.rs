//! AppState construction (spec §9 "Startup sequence"): validates config,
//! constructs every subsystem, seeds the registry, and assembles the
//! shared [`AppState`] handed to every API handler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use gwy_domain::config::{Config, ConfigSeverity, ProviderConfig, ProviderKind};
use gwy_domain::model::{Modality, ModelDescriptor, ModelStatus};
use gwy_providers::ProviderDiscovery;
use gwy_registry::{ArtifactStore, Downloader, JobStore, Registry, StorageManager};
use gwy_sessions::SessionStore;

use crate::lifecycle::LifecycleManager;
use crate::orchestrator::GatewayModelLoader;
use crate::queue::RequestQueue;
use crate::state::AppState;
use crate::users::UserStore;

/// Validate config, initialize every subsystem, seed the registry and
/// return a fully-wired [`AppState`]. This is the shared "boot" path used
/// by the `serve` and `doctor` commands.
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let model_root = PathBuf::from(&config.storage.model_root);
    std::fs::create_dir_all(&model_root).context("creating storage.model_root")?;
    let persist = config.storage.persist_state;

    // ── Model registry (seeded from configured defaults) ─────────────
    let registry = Arc::new(Registry::new());
    registry.load_defaults(seed_descriptors(&config));
    tracing::info!(models = registry.list_models(None).len(), "model registry seeded");

    // ── Artifact store ────────────────────────────────────────────────
    let artifacts = Arc::new(
        ArtifactStore::new(model_root.join("artifacts"), config.artifacts.artifact_expiry_secs)
            .context("initializing artifact store")?,
    );
    tracing::info!("artifact store ready");

    // ── Job store + downloader ────────────────────────────────────────
    let job_state_file = persist.then(|| model_root.join("jobs.json"));
    let jobs = Arc::new(JobStore::new(job_state_file, persist).context("initializing job store")?);
    let downloader = Arc::new(Downloader::new(registry.clone(), jobs.clone(), model_root.clone()));
    tracing::info!("job store + downloader ready");

    // ── Storage manager (disk budget enforcement) ────────────────────
    let storage = Arc::new(StorageManager::new(model_root.clone(), config.storage.max_disk_gb));

    // ── Session store ─────────────────────────────────────────────────
    let sessions = Arc::new(
        SessionStore::new(&model_root, persist, config.sessions.session_retention_minutes)
            .context("initializing session store")?,
    );
    tracing::info!("session store ready");

    // ── Provider discovery cache ──────────────────────────────────────
    let discovery = Arc::new(ProviderDiscovery::new());

    // ── Users (credits only) ──────────────────────────────────────────
    let user_state_file = persist.then(|| model_root.join("users.json"));
    let users = Arc::new(UserStore::new(user_state_file, persist).context("initializing user store")?);

    // ── Local output scratch dir (local image/3d adapters) ───────────
    let local_output_dir = model_root.join("output");
    std::fs::create_dir_all(&local_output_dir).context("creating local output dir")?;

    // ── Model lifecycle manager ───────────────────────────────────────
    let loader = Arc::new(GatewayModelLoader::new(config.clone(), registry.clone(), local_output_dir.clone()));
    let lifecycle = Arc::new(LifecycleManager::new(
        loader,
        config.lifecycle.max_loaded_models,
        config.lifecycle.idle_timeout_seconds,
    ));
    tracing::info!(
        max_loaded_models = config.lifecycle.max_loaded_models,
        "model lifecycle manager ready"
    );

    // ── Request queue ─────────────────────────────────────────────────
    let queue = RequestQueue::new(config.queue.max_queue_depth, config.queue.max_concurrent_requests_per_model);
    tracing::info!(
        max_queue_depth = config.queue.max_queue_depth,
        max_concurrent_per_model = config.queue.max_concurrent_requests_per_model,
        "request queue ready"
    );

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "API bearer-token auth enabled");
                let digest: [u8; 32] = Sha256::digest(token.as_bytes()).into();
                Some(digest)
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "API bearer-token auth DISABLED — set {env_var} to enable"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        registry,
        discovery,
        users,
        lifecycle,
        queue,
        sessions,
        artifacts,
        jobs,
        downloader,
        storage,
        local_output_dir,
        api_token_hash,
        started_at: chrono::Utc::now(),
    })
}

/// Builds one seed [`ModelDescriptor`] per configured default model id
/// (spec §4.A "Seed defaults"), so the registry always has a resolvable
/// entry for whatever the config promises without requiring an operator
/// to separately register it. The provider is inferred from the
/// configured catalog: the first non-local provider for text, the first
/// local provider for image/3d (this gateway's remote adapters are
/// text-only, see `adapters::require_text`).
fn seed_descriptors(config: &Config) -> Vec<ModelDescriptor> {
    let mut seeds = Vec::new();
    if let Some(id) = &config.llm.default_model {
        seeds.push(seed_descriptor(id, Modality::Text, &config.llm.providers));
    }
    if let Some(id) = &config.llm.default_image_model {
        seeds.push(seed_descriptor(id, Modality::Image, &config.llm.providers));
    }
    if let Some(id) = &config.llm.default_3d_model {
        seeds.push(seed_descriptor(id, Modality::ThreeD, &config.llm.providers));
    }
    seeds
}

fn seed_descriptor(id: &str, modality: Modality, providers: &[ProviderConfig]) -> ModelDescriptor {
    let provider = match modality {
        Modality::Text => providers.iter().find(|p| p.kind != ProviderKind::Local).map(|p| p.id.clone()),
        Modality::Image | Modality::ThreeD => providers.iter().find(|p| p.kind == ProviderKind::Local).map(|p| p.id.clone()),
    };
    ModelDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        version: "latest".to_string(),
        modality,
        provider,
        status: ModelStatus::Available,
        local_path: None,
        size_bytes: None,
        source: None,
        capabilities: None,
        fallback_model_id: None,
        created_at: chrono::Utc::now(),
        last_used_at: None,
        is_default: Some(true),
    }
}
