use serde::{Deserialize, Serialize};

/// Session store tuning (spec §4.E).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Sessions idle (by `coalesce(last_used_at, created_at)`) longer
    /// than this are opportunistically deleted at the top of `list`/`get`.
    /// `None` disables expiry.
    #[serde(default)]
    pub session_retention_minutes: Option<u64>,
}
