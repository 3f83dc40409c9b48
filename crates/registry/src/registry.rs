//! Model catalog (spec §4.A). Upsert-by-id store of `ModelDescriptor`s
//! with per-modality default resolution and fallback links.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use gwy_domain::error::{Error, Result};
use gwy_domain::model::{ModelDescriptor, ModelStatus, Modality};
use parking_lot::RwLock;

const CACHE_TTL_SECONDS: i64 = 30;

struct Cache {
    entries: HashMap<String, ModelDescriptor>,
    stamped_at: AtomicI64,
}

/// In-memory model registry with a short read-through cache in front of
/// the authoritative map; writes invalidate the cache immediately.
pub struct Registry {
    models: RwLock<HashMap<String, ModelDescriptor>>,
    cache: RwLock<Option<Cache>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            cache: RwLock::new(None),
        }
    }

    fn invalidate_cache(&self) {
        *self.cache.write() = None;
    }

    /// Upsert by `model_id`. Rejects an empty id (spec §8 boundary behavior).
    pub fn add_model(&self, descriptor: ModelDescriptor) -> Result<ModelDescriptor> {
        if descriptor.id.is_empty() {
            return Err(Error::Validation("model_id must not be empty".into()));
        }
        let mut models = self.models.write();
        models.insert(descriptor.id.clone(), descriptor.clone());
        drop(models);
        self.invalidate_cache();
        Ok(descriptor)
    }

    /// Touches `last_used_at` as a read side effect.
    pub fn get_model(&self, id: &str) -> Option<ModelDescriptor> {
        let mut models = self.models.write();
        let descriptor = models.get_mut(id)?;
        descriptor.last_used_at = Some(Utc::now());
        Some(descriptor.clone())
    }

    /// Non-mutating lookup, used where touching `last_used_at` would be
    /// observable noise (e.g. selector fallback probing).
    pub fn peek_model(&self, id: &str) -> Option<ModelDescriptor> {
        self.models.read().get(id).cloned()
    }

    pub fn list_models(&self, modality: Option<Modality>) -> Vec<ModelDescriptor> {
        let now = Utc::now().timestamp();
        {
            let cache = self.cache.read();
            if let Some(c) = cache.as_ref() {
                if now - c.stamped_at.load(Ordering::Relaxed) < CACHE_TTL_SECONDS {
                    return c
                        .entries
                        .values()
                        .filter(|d| modality.is_none_or_eq(d.modality))
                        .cloned()
                        .collect();
                }
            }
        }
        let models = self.models.read();
        let snapshot: HashMap<String, ModelDescriptor> = models.clone();
        drop(models);
        let result: Vec<ModelDescriptor> = snapshot
            .values()
            .filter(|d| modality.is_none_or_eq(d.modality))
            .cloned()
            .collect();
        *self.cache.write() = Some(Cache {
            entries: snapshot,
            stamped_at: AtomicI64::new(now),
        });
        result
    }

    pub fn update_model_status(&self, id: &str, status: ModelStatus) -> Result<()> {
        let mut models = self.models.write();
        let descriptor = models
            .get_mut(id)
            .ok_or_else(|| Error::ModelNotFound(id.to_string()))?;
        descriptor.status = status;
        drop(models);
        self.invalidate_cache();
        Ok(())
    }

    pub fn set_fallback(&self, primary: &str, fallback: &str) -> Result<()> {
        let mut models = self.models.write();
        let descriptor = models
            .get_mut(primary)
            .ok_or_else(|| Error::ModelNotFound(primary.to_string()))?;
        descriptor.fallback_model_id = Some(fallback.to_string());
        drop(models);
        self.invalidate_cache();
        Ok(())
    }

    pub fn get_fallback(&self, primary: &str) -> Option<String> {
        self.models.read().get(primary)?.fallback_model_id.clone()
    }

    /// Most-recently-used `available` model of the given modality.
    pub fn get_default_for_modality(&self, modality: Modality) -> Option<String> {
        let models = self.models.read();
        models
            .values()
            .filter(|d| d.modality == modality && d.is_available())
            .max_by_key(|d| d.last_used_at.unwrap_or_else(|| d.created_at))
            .map(|d| d.id.clone())
    }

    pub fn delete_model(&self, id: &str) -> bool {
        let removed = self.models.write().remove(id).is_some();
        if removed {
            self.invalidate_cache();
        }
        removed
    }

    /// Marks any descriptor whose `local_path` no longer exists on disk
    /// as evicted.
    pub fn sync_with_storage(&self, base_path: &Path) {
        let stale: Vec<String> = {
            let models = self.models.read();
            models
                .values()
                .filter(|d| {
                    d.local_path
                        .as_ref()
                        .map(|p| !base_path.join(p).exists())
                        .unwrap_or(false)
                })
                .map(|d| d.id.clone())
                .collect()
        };
        for id in stale {
            let _ = self.update_model_status(&id, ModelStatus::Evicted);
        }
    }

    /// Ensures one descriptor per modality exists (spec §4.A "Seed
    /// defaults"), preserving `status`/`local_path`/`size_bytes`/`source`
    /// for any re-seeded model, then prunes locally-sourced non-default
    /// descriptors whose id no longer appears in the seed set.
    pub fn load_defaults(&self, seeds: Vec<ModelDescriptor>) {
        let allowed_ids: std::collections::HashSet<String> =
            seeds.iter().map(|m| m.id.clone()).collect();

        for mut seed in seeds {
            if let Some(existing) = self.peek_model(&seed.id) {
                seed.status = existing.status;
                seed.local_path = existing.local_path.or(seed.local_path);
                seed.size_bytes = existing.size_bytes.or(seed.size_bytes);
                seed.source = existing.source.or(seed.source);
            }
            let _ = self.add_model(seed);
        }

        let to_prune: Vec<String> = {
            let models = self.models.read();
            models
                .values()
                .filter(|d| {
                    !allowed_ids.contains(&d.id)
                        && d.provider.as_deref() == Some("local")
                        && d.source
                            .as_ref()
                            .map(|s| matches!(s.kind, gwy_domain::model::SourceType::Local))
                            .unwrap_or(true)
                })
                .map(|d| d.id.clone())
                .collect()
        };
        for id in to_prune {
            self.delete_model(&id);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

trait ModalityFilter {
    fn is_none_or_eq(self, m: Modality) -> bool;
}

impl ModalityFilter for Option<Modality> {
    fn is_none_or_eq(self, m: Modality) -> bool {
        match self {
            Some(want) => want == m,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwy_domain::model::ModelDescriptor;

    fn make(id: &str, modality: Modality, status: ModelStatus) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            name: id.into(),
            version: "latest".into(),
            modality,
            provider: Some("local".into()),
            status,
            local_path: None,
            size_bytes: None,
            source: None,
            capabilities: None,
            fallback_model_id: None,
            created_at: Utc::now(),
            last_used_at: None,
            is_default: None,
        }
    }

    #[test]
    fn empty_model_id_is_rejected() {
        let registry = Registry::new();
        let err = registry.add_model(make("", Modality::Text, ModelStatus::Available)).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn add_then_get_round_trips() {
        let registry = Registry::new();
        registry.add_model(make("m1", Modality::Text, ModelStatus::Available)).unwrap();
        let got = registry.get_model("m1").unwrap();
        assert_eq!(got.id, "m1");
        assert!(got.last_used_at.is_some());
    }

    #[test]
    fn set_default_is_idempotent_via_status_ordering() {
        let registry = Registry::new();
        registry.add_model(make("a", Modality::Text, ModelStatus::Available)).unwrap();
        registry.add_model(make("b", Modality::Text, ModelStatus::Available)).unwrap();
        registry.get_model("b");
        assert_eq!(registry.get_default_for_modality(Modality::Text), Some("b".into()));
    }

    #[test]
    fn fallback_round_trips() {
        let registry = Registry::new();
        registry.add_model(make("primary", Modality::Text, ModelStatus::Failed)).unwrap();
        registry.add_model(make("backup", Modality::Text, ModelStatus::Available)).unwrap();
        registry.set_fallback("primary", "backup").unwrap();
        assert_eq!(registry.get_fallback("primary"), Some("backup".into()));
    }

    #[test]
    fn delete_missing_model_returns_false() {
        let registry = Registry::new();
        assert!(!registry.delete_model("nope"));
    }

    #[test]
    fn seed_defaults_preserves_existing_status_and_prunes_stale_local() {
        let registry = Registry::new();
        let mut existing = make("text-default", Modality::Text, ModelStatus::Downloading);
        existing.local_path = Some("hf/foo".into());
        registry.add_model(existing).unwrap();
        registry
            .add_model(make("stale-local", Modality::Text, ModelStatus::Available))
            .unwrap();

        let seed = make("text-default", Modality::Text, ModelStatus::Available);
        registry.load_defaults(vec![seed]);

        let reseeded = registry.peek_model("text-default").unwrap();
        assert_eq!(reseeded.status, ModelStatus::Downloading);
        assert_eq!(reseeded.local_path.as_deref(), Some("hf/foo"));
        assert!(registry.peek_model("stale-local").is_none());
    }
}
