use serde::{Deserialize, Serialize};

/// Filesystem layout roots (spec §6 "Filesystem layout").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `<model_root>/`: downloaded model files, flat for single-file
    /// formats, nested under `hf/<owner>__<repo>/` for HF snapshots.
    #[serde(default = "d_model_root")]
    pub model_root: String,
    #[serde(default)]
    pub max_disk_gb: Option<f64>,
    /// Whether registry/session/job state is persisted to disk between
    /// restarts (JSON snapshot under `model_root`), or kept in-memory only.
    #[serde(default = "d_true")]
    pub persist_state: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_root: d_model_root(),
            max_disk_gb: None,
            persist_state: true,
        }
    }
}

fn d_model_root() -> String {
    "./data/models".into()
}
fn d_true() -> bool {
    true
}
