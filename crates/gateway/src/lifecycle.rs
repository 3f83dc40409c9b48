//! Model Lifecycle Manager (spec §4.J): bounds how many model instances
//! are held in memory at once, coalesces concurrent loads of the same
//! model into a single materialization, and evicts idle entries.
//!
//! Loading coalescing uses a `tokio::sync::broadcast` completion signal
//! per in-flight load rather than polling (REDESIGN FLAG #1). The map
//! guarding in-memory state is a single `parking_lot::Mutex`; the
//! `load`/`unload` callbacks are always invoked with the lock released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gwy_domain::error::Result;
use gwy_providers::Adapter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

/// What the lifecycle manager needs from its caller to materialize or
/// release a model instance. `gwy-gateway`'s adapter-construction layer
/// implements this once per configured provider.
#[async_trait::async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, model_id: &str) -> Result<Arc<Adapter>>;
    async fn unload(&self, model_id: &str, instance: Arc<Adapter>);
}

struct Entry {
    instance: Arc<Adapter>,
    is_pinned: bool,
    busy_count: u32,
    loaded_at: DateTime<Utc>,
    last_touched: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedModelInfo {
    pub model_id: String,
    pub is_pinned: bool,
    pub busy_count: u32,
    pub loaded_at: DateTime<Utc>,
    pub last_touched: DateTime<Utc>,
}

/// Per-call load intent (spec §4.J `load(model_id, {pinned, wait,
/// use_fallback, fallback_model_id})`).
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Pin this entry on successful load, exempting it from LRU eviction
    /// and idle unload until explicitly unpinned via `force`.
    pub pinned: bool,
    /// If another caller is already loading this model, block until it
    /// finishes rather than returning `Unavailable` immediately.
    pub wait: bool,
    /// If another caller is already loading this model and `wait` is
    /// false, return the fallback's instance if it happens to already be
    /// loaded, instead of `Unavailable`.
    pub use_fallback: bool,
    pub fallback_model_id: Option<String>,
}

pub enum LoadOutcome {
    Loaded(Arc<Adapter>),
    /// No instance could be produced right now: a concurrent load is in
    /// flight and the caller didn't ask to wait, or asked for a fallback
    /// that isn't loaded either. Callers surface this as 202/retry.
    Unavailable,
}

struct Inner {
    /// MRU order, most-recently-used at the back.
    order: VecDeque<String>,
    entries: HashMap<String, Entry>,
    loading: HashMap<String, broadcast::Sender<()>>,
    pinned_ids: HashSet<String>,
}

fn touch_mru(order: &mut VecDeque<String>, id: &str) {
    if let Some(pos) = order.iter().position(|x| x == id) {
        order.remove(pos);
    }
    order.push_back(id.to_string());
}

pub struct LifecycleManager {
    inner: Mutex<Inner>,
    loader: Arc<dyn ModelLoader>,
    max_loaded_models: usize,
    idle_timeout: chrono::Duration,
}

impl LifecycleManager {
    pub fn new(loader: Arc<dyn ModelLoader>, max_loaded_models: usize, idle_timeout_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                entries: HashMap::new(),
                loading: HashMap::new(),
                pinned_ids: HashSet::new(),
            }),
            loader,
            max_loaded_models: max_loaded_models.max(1),
            idle_timeout: chrono::Duration::seconds(idle_timeout_seconds as i64),
        }
    }

    /// Marks a model id as permanently pinned (e.g. a configured default),
    /// independent of any single `load` call's `pinned` flag.
    pub fn pin(&self, model_id: &str) {
        let mut inner = self.inner.lock();
        inner.pinned_ids.insert(model_id.to_string());
        if let Some(entry) = inner.entries.get_mut(model_id) {
            entry.is_pinned = true;
        }
    }

    /// Pure snapshot of currently loaded entries, MRU last.
    pub fn status(&self) -> Vec<LoadedModelInfo> {
        self.loaded_models()
    }

    pub fn loaded_models(&self) -> Vec<LoadedModelInfo> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| {
                inner.entries.get(id).map(|e| LoadedModelInfo {
                    model_id: id.clone(),
                    is_pinned: e.is_pinned,
                    busy_count: e.busy_count,
                    loaded_at: e.loaded_at,
                    last_touched: e.last_touched,
                })
            })
            .collect()
    }

    pub async fn load(&self, model_id: &str, opts: LoadOptions) -> Result<LoadOutcome> {
        loop {
            let mut rx_to_wait = None;
            let mut should_start = false;
            {
                let mut inner = self.inner.lock();

                if let Some(entry) = inner.entries.get_mut(model_id) {
                    touch_mru(&mut inner.order, model_id);
                    entry.last_touched = Utc::now();
                    return Ok(LoadOutcome::Loaded(entry.instance.clone()));
                }

                if let Some(tx) = inner.loading.get(model_id) {
                    if opts.use_fallback {
                        if let Some(fb_id) = &opts.fallback_model_id {
                            if let Some(fb) = inner.entries.get(fb_id) {
                                return Ok(LoadOutcome::Loaded(fb.instance.clone()));
                            }
                        }
                        return Ok(LoadOutcome::Unavailable);
                    }
                    if !opts.wait {
                        return Ok(LoadOutcome::Unavailable);
                    }
                    rx_to_wait = Some(tx.subscribe());
                } else {
                    should_start = true;
                }
            }

            if let Some(mut rx) = rx_to_wait {
                let _ = rx.recv().await;
                continue;
            }

            if should_start {
                self.maybe_evict().await;

                let mut inner = self.inner.lock();
                if inner.entries.contains_key(model_id) || inner.loading.contains_key(model_id) {
                    // Another caller raced us while we were evicting.
                    drop(inner);
                    continue;
                }
                let (tx, _rx) = broadcast::channel(1);
                inner.loading.insert(model_id.to_string(), tx);
                drop(inner);

                let result = self.loader.load(model_id).await;

                let mut inner = self.inner.lock();
                let tx = inner.loading.remove(model_id);
                return match result {
                    Ok(instance) => {
                        let now = Utc::now();
                        let is_pinned = opts.pinned || inner.pinned_ids.contains(model_id);
                        inner.entries.insert(
                            model_id.to_string(),
                            Entry { instance: instance.clone(), is_pinned, busy_count: 0, loaded_at: now, last_touched: now },
                        );
                        inner.order.push_back(model_id.to_string());
                        drop(inner);
                        if let Some(tx) = tx {
                            let _ = tx.send(());
                        }
                        Ok(LoadOutcome::Loaded(instance))
                    }
                    Err(err) => {
                        drop(inner);
                        if let Some(tx) = tx {
                            let _ = tx.send(());
                        }
                        Err(err)
                    }
                };
            }
        }
    }

    /// While over `max_loaded_models`, evict the least-recently-used
    /// non-pinned, non-busy entry. Stops (soft overflow) once every
    /// remaining entry is pinned or busy.
    async fn maybe_evict(&self) {
        loop {
            let victim = {
                let inner = self.inner.lock();
                if inner.entries.len() < self.max_loaded_models {
                    return;
                }
                inner
                    .order
                    .iter()
                    .find(|id| inner.entries.get(*id).map(|e| !e.is_pinned && e.busy_count == 0).unwrap_or(false))
                    .cloned()
            };
            let Some(victim_id) = victim else { return };
            self.unload(&victim_id, false).await;
        }
    }

    /// Idempotent if absent. Refuses while `busy_count > 0` regardless of
    /// `force`; refuses a pinned entry unless `force`.
    pub async fn unload(&self, model_id: &str, force: bool) -> bool {
        let instance = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.entries.get(model_id) else { return false };
            if entry.busy_count > 0 {
                return false;
            }
            if entry.is_pinned && !force {
                return false;
            }
            let entry = inner.entries.remove(model_id).expect("checked above");
            inner.order.retain(|id| id != model_id);
            entry.instance
        };
        self.loader.unload(model_id, instance).await;
        true
    }

    /// Returns `false` if the model isn't loaded.
    pub fn mark_busy(&self, model_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(model_id) {
            Some(e) => {
                e.busy_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn mark_idle(&self, model_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(e) = inner.entries.get_mut(model_id) {
            e.busy_count = e.busy_count.saturating_sub(1);
        }
    }

    /// Unloads non-pinned, non-busy entries idle longer than the
    /// configured timeout. Invoked by a periodic background task every
    /// 30s (spec §4.J "periodic idle monitor").
    pub async fn check_idle_timeout(&self) {
        let now = Utc::now();
        let victims: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .filter(|(_, e)| !e.is_pinned && e.busy_count == 0 && now - e.last_touched > self.idle_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in victims {
            self.unload(&id, false).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gwy_providers::traits::{AdapterEvent, TextAdapter};
    use gwy_domain::generate::{BoxStream, GenerateOutput, GenerateRequest};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubText(String);

    #[async_trait::async_trait]
    impl TextAdapter for StubText {
        async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateOutput> {
            Ok(GenerateOutput::default())
        }
        async fn generate_stream(&self, _req: &GenerateRequest) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
            unimplemented!()
        }
        fn provider_id(&self) -> &str {
            &self.0
        }
    }

    struct CountingLoader {
        loads: AtomicU32,
        unloads: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, model_id: &str) -> Result<Arc<Adapter>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Adapter::Text(Arc::new(StubText(model_id.to_string())))))
        }
        async fn unload(&self, _model_id: &str, _instance: Arc<Adapter>) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn cold_load_then_cache_hit_loads_once() {
        let loader = Arc::new(CountingLoader { loads: AtomicU32::new(0), unloads: AtomicU32::new(0) });
        let mgr = LifecycleManager::new(loader.clone(), 2, 600);

        matches!(mgr.load("m1", LoadOptions::default()).await.unwrap(), LoadOutcome::Loaded(_));
        matches!(mgr.load("m1", LoadOptions::default()).await.unwrap(), LoadOutcome::Loaded(_));

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lru_eviction_respects_max_loaded() {
        let loader = Arc::new(CountingLoader { loads: AtomicU32::new(0), unloads: AtomicU32::new(0) });
        let mgr = LifecycleManager::new(loader.clone(), 1, 600);

        mgr.load("a", LoadOptions::default()).await.unwrap();
        mgr.load("b", LoadOptions::default()).await.unwrap();

        assert_eq!(loader.unloads.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.loaded_models().len(), 1);
        assert_eq!(mgr.loaded_models()[0].model_id, "b");
    }

    #[tokio::test]
    async fn busy_entry_is_never_evicted() {
        let loader = Arc::new(CountingLoader { loads: AtomicU32::new(0), unloads: AtomicU32::new(0) });
        let mgr = LifecycleManager::new(loader, 1, 600);

        mgr.load("a", LoadOptions::default()).await.unwrap();
        mgr.mark_busy("a");
        mgr.load("b", LoadOptions::default()).await.unwrap();

        // "a" is busy so eviction is a soft overflow: both remain loaded.
        assert_eq!(mgr.loaded_models().len(), 2);
    }

    #[tokio::test]
    async fn unload_refuses_busy_even_with_force() {
        let loader = Arc::new(CountingLoader { loads: AtomicU32::new(0), unloads: AtomicU32::new(0) });
        let mgr = LifecycleManager::new(loader, 4, 600);
        mgr.load("a", LoadOptions::default()).await.unwrap();
        mgr.mark_busy("a");
        assert!(!mgr.unload("a", true).await);
    }

    #[tokio::test]
    async fn pinned_entry_requires_force_to_unload() {
        let loader = Arc::new(CountingLoader { loads: AtomicU32::new(0), unloads: AtomicU32::new(0) });
        let mgr = LifecycleManager::new(loader, 4, 600);
        mgr.load("a", LoadOptions { pinned: true, ..Default::default() }).await.unwrap();
        assert!(!mgr.unload("a", false).await);
        assert!(mgr.unload("a", true).await);
    }

    #[tokio::test]
    async fn idle_timeout_unloads_stale_entries() {
        let loader = Arc::new(CountingLoader { loads: AtomicU32::new(0), unloads: AtomicU32::new(0) });
        let mgr = LifecycleManager::new(loader, 4, 0);
        mgr.load("a", LoadOptions::default()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        mgr.check_idle_timeout().await;
        assert!(mgr.loaded_models().is_empty());
    }
}
