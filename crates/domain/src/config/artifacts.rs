use serde::{Deserialize, Serialize};

/// Artifact store tuning (spec §4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default = "d_expiry")]
    pub artifact_expiry_secs: u64,
    /// Orchestrator inlines generated bytes under this size; anything
    /// larger is promoted to an artifact and referenced by URL.
    #[serde(default = "d_inline_threshold")]
    pub artifact_inline_threshold_kb: u64,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            artifact_expiry_secs: d_expiry(),
            artifact_inline_threshold_kb: d_inline_threshold(),
        }
    }
}

fn d_expiry() -> u64 {
    3600
}
fn d_inline_threshold() -> u64 {
    64
}
