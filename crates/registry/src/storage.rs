//! Disk-budget enforcement over the model root (spec §4.C).

use std::path::{Path, PathBuf};

use gwy_domain::model::ModelStatus;
use tracing::warn;

use crate::registry::Registry;

pub struct StorageManager {
    model_root: PathBuf,
    max_disk_bytes: Option<u64>,
}

impl StorageManager {
    pub fn new(model_root: PathBuf, max_disk_gb: Option<f64>) -> Self {
        Self {
            model_root,
            max_disk_bytes: max_disk_gb.map(|gb| (gb * 1024.0 * 1024.0 * 1024.0) as u64),
        }
    }

    pub fn disk_usage(&self) -> u64 {
        walk_size(&self.model_root)
    }

    pub fn can_download(&self, bytes: u64) -> bool {
        match self.max_disk_bytes {
            Some(max) => self.disk_usage() + bytes <= max,
            None => true,
        }
    }

    /// Evicts models ordered by `(status != failed, last_used_at)`
    /// ascending — failed downloads first, then least-recently-used —
    /// until usage is back under budget. Pinned/default models are
    /// evicted only as a last resort (i.e. only once nothing else
    /// remains to reclaim).
    pub fn enforce_limit(&self, registry: &Registry, pinned: &[String]) {
        let Some(max) = self.max_disk_bytes else { return };
        if self.disk_usage() <= max {
            return;
        }

        let mut candidates = registry.list_models(None);
        candidates.sort_by(|a, b| {
            let a_key = (a.status != ModelStatus::Failed, a.last_used_at);
            let b_key = (b.status != ModelStatus::Failed, b.last_used_at);
            a_key.cmp(&b_key)
        });

        let (unpinned, last_resort): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|m| !pinned.contains(&m.id));

        for model in unpinned.into_iter().chain(last_resort) {
            if self.disk_usage() <= max {
                break;
            }
            let Some(local_path) = &model.local_path else { continue };
            let full = self.model_root.join(local_path);
            if full.is_dir() {
                let _ = std::fs::remove_dir_all(&full);
            } else {
                let _ = std::fs::remove_file(&full);
            }
            if let Err(err) = registry.update_model_status(&model.id, ModelStatus::Evicted) {
                warn!(model_id = %model.id, %err, "failed to mark evicted model");
            }
        }
    }
}

fn walk_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else { return 0 };
    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            total += walk_size(&entry.path());
        } else {
            total += meta.len();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gwy_domain::model::ModelDescriptor;

    fn make(id: &str, status: ModelStatus, last_used_secs_ago: i64) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            name: id.into(),
            version: "latest".into(),
            modality: gwy_domain::model::Modality::Text,
            provider: Some("local".into()),
            status,
            local_path: Some(format!("{id}.bin")),
            size_bytes: Some(10),
            source: None,
            capabilities: None,
            fallback_model_id: None,
            created_at: Utc::now(),
            last_used_at: Some(Utc::now() - chrono::Duration::seconds(last_used_secs_ago)),
            is_default: None,
        }
    }

    #[test]
    fn enforce_limit_evicts_failed_before_lru() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.bin"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("failed.bin"), vec![0u8; 100]).unwrap();

        let registry = Registry::new();
        registry.add_model(make("old", ModelStatus::Available, 1000)).unwrap();
        registry.add_model(make("failed", ModelStatus::Failed, 1)).unwrap();

        let manager = StorageManager::new(dir.path().to_path_buf(), Some(0.0000001));
        manager.enforce_limit(&registry, &[]);

        assert_eq!(registry.peek_model("failed").unwrap().status, ModelStatus::Evicted);
    }

    #[test]
    fn under_budget_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        registry.add_model(make("a", ModelStatus::Available, 1)).unwrap();
        let manager = StorageManager::new(dir.path().to_path_buf(), Some(1000.0));
        manager.enforce_limit(&registry, &[]);
        assert_eq!(registry.peek_model("a").unwrap().status, ModelStatus::Available);
    }
}
