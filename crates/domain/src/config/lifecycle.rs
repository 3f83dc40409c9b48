use serde::{Deserialize, Serialize};

/// Model lifecycle manager tuning (spec §4.J).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "d_max_loaded")]
    pub max_loaded_models: usize,
    #[serde(default = "d_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_loaded_models: d_max_loaded(),
            idle_timeout_seconds: d_idle_timeout(),
        }
    }
}

fn d_max_loaded() -> usize {
    2
}
fn d_idle_timeout() -> u64 {
    600
}
