use std::path::PathBuf;
use std::sync::Arc;

use gwy_domain::config::Config;
use gwy_providers::ProviderDiscovery;
use gwy_registry::{ArtifactStore, Downloader, JobStore, Registry, StorageManager};
use gwy_sessions::SessionStore;

use crate::lifecycle::LifecycleManager;
use crate::queue::RequestQueue;
use crate::users::UserStore;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, model registry, provider discovery, users
/// - **Generation runtime** — lifecycle manager, request queue
/// - **Sessions & artifacts** — conversation state, generated files
/// - **Storage** — on-disk model materialization and disk budget
/// - **Security** — bearer token hash computed once at startup
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub discovery: Arc<ProviderDiscovery>,
    pub users: Arc<UserStore>,

    // ── Generation runtime ────────────────────────────────────────────
    pub lifecycle: Arc<LifecycleManager>,
    pub queue: Arc<RequestQueue>,

    // ── Sessions & artifacts ──────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub artifacts: Arc<ArtifactStore>,

    // ── Storage ───────────────────────────────────────────────────────
    pub jobs: Arc<JobStore>,
    pub downloader: Arc<Downloader>,
    pub storage: Arc<StorageManager>,
    /// Root directory local adapters write generated image/mesh bytes to
    /// before they are promoted into the artifact store.
    pub local_output_dir: PathBuf,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token. `None` = no auth enforced
    /// (refused by `Config::validate` outside explicit dev opt-in).
    pub api_token_hash: Option<[u8; 32]>,

    pub started_at: chrono::DateTime<chrono::Utc>,
}
