use serde::{Deserialize, Serialize};

/// Per-model FIFO request queue tuning (spec §4.K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "d_max_depth")]
    pub max_queue_depth: usize,
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests_per_model: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: d_max_depth(),
            max_concurrent_requests_per_model: d_max_concurrent(),
        }
    }
}

fn d_max_depth() -> usize {
    100
}
fn d_max_concurrent() -> usize {
    1
}
