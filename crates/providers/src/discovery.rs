//! Per-user, per-provider model discovery cache.
//!
//! Wraps a provider's "list models" call (or a static fallback catalog)
//! behind a short TTL cache, and tracks quota-exhausted / rate-limited
//! cooldowns so the selector and lifecycle manager don't hammer a
//! provider that just told us to back off.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

const CACHE_TTL_SECONDS: i64 = 300;
const QUOTA_EXHAUSTED_TTL_SECONDS: i64 = 3600;
const RATE_LIMIT_BACKOFF_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderAvailability {
    Available,
    QuotaExhausted { reason: Option<String> },
    RateLimited,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    models: Vec<String>,
    fetched_at: DateTime<Utc>,
    availability: ProviderAvailability,
    /// When the current `availability` cooldown lifts. `None` for `Available`.
    cooldown_until: Option<DateTime<Utc>>,
}

/// Discovery results that have no live "list models" endpoint (Azure
/// synthesizes one deployment-shaped entry; others fall back here when a
/// live discovery call fails).
fn static_catalog(provider: &str) -> Vec<String> {
    match provider {
        "openai" => vec!["gpt-4o".into(), "gpt-4o-mini".into(), "o3-mini".into()],
        "anthropic" => vec!["claude-sonnet-4-20250514".into(), "claude-3-5-haiku".into()],
        "google" => vec!["gemini-2.0-flash".into(), "gemini-1.5-pro".into()],
        "azure" => vec!["azure-default-deployment".into()],
        "xai" => vec!["grok-2-latest".into()],
        _ => Vec::new(),
    }
}

/// TTL-cached provider discovery, keyed by `(user_id, provider)`.
pub struct ProviderDiscovery {
    cache: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl Default for ProviderDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderDiscovery {
    pub fn new() -> Self {
        Self { cache: RwLock::new(HashMap::new()) }
    }

    fn key(user_id: &str, provider: &str) -> (String, String) {
        (user_id.to_string(), provider.to_string())
    }

    /// Look up a cached, still-live entry. Returns `None` on a cold or
    /// expired cache (caller should perform a live discovery call, or fall
    /// back to [`static_catalog`]).
    pub fn get(&self, user_id: &str, provider: &str, now: DateTime<Utc>) -> Option<(Vec<String>, ProviderAvailability)> {
        let cache = self.cache.read();
        let entry = cache.get(&Self::key(user_id, provider))?;

        if let Some(until) = entry.cooldown_until {
            if now < until {
                return Some((entry.models.clone(), entry.availability.clone()));
            }
            // Cooldown lifted; treat as stale so the caller re-discovers.
            return None;
        }

        if (now - entry.fetched_at).num_seconds() > CACHE_TTL_SECONDS {
            return None;
        }
        Some((entry.models.clone(), entry.availability.clone()))
    }

    /// Record a successful discovery call.
    pub fn put(&self, user_id: &str, provider: &str, models: Vec<String>, now: DateTime<Utc>) {
        self.cache.write().insert(
            Self::key(user_id, provider),
            CacheEntry {
                models,
                fetched_at: now,
                availability: ProviderAvailability::Available,
                cooldown_until: None,
            },
        );
    }

    /// Record a discovery failure with no live catalog: fall back to the
    /// static list so the selector still has candidates.
    pub fn put_static_fallback(&self, user_id: &str, provider: &str, now: DateTime<Utc>) {
        self.put(user_id, provider, static_catalog(provider), now);
    }

    /// Mark a provider's quota as exhausted for this user, preserving the
    /// last known `models[]` from a prior successful discovery.
    pub fn mark_quota_exhausted(&self, user_id: &str, provider: &str, reason: Option<String>, now: DateTime<Utc>) {
        let mut cache = self.cache.write();
        let key = Self::key(user_id, provider);
        let models = cache.get(&key).map(|e| e.models.clone()).unwrap_or_default();
        cache.insert(
            key,
            CacheEntry {
                models,
                fetched_at: now,
                availability: ProviderAvailability::QuotaExhausted { reason },
                cooldown_until: Some(now + chrono::Duration::seconds(QUOTA_EXHAUSTED_TTL_SECONDS)),
            },
        );
    }

    /// Mark a provider as rate-limited for this user, preserving the last
    /// known `models[]`.
    pub fn mark_rate_limited(&self, user_id: &str, provider: &str, now: DateTime<Utc>) {
        let mut cache = self.cache.write();
        let key = Self::key(user_id, provider);
        let models = cache.get(&key).map(|e| e.models.clone()).unwrap_or_default();
        cache.insert(
            key,
            CacheEntry {
                models,
                fetched_at: now,
                availability: ProviderAvailability::RateLimited,
                cooldown_until: Some(now + chrono::Duration::seconds(RATE_LIMIT_BACKOFF_SECONDS)),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_cache_misses() {
        let d = ProviderDiscovery::new();
        assert!(d.get("u1", "openai", Utc::now()).is_none());
    }

    #[test]
    fn put_then_get_within_ttl() {
        let d = ProviderDiscovery::new();
        let now = Utc::now();
        d.put("u1", "openai", vec!["gpt-4o".into()], now);
        let (models, avail) = d.get("u1", "openai", now + chrono::Duration::seconds(10)).unwrap();
        assert_eq!(models, vec!["gpt-4o"]);
        assert_eq!(avail, ProviderAvailability::Available);
    }

    #[test]
    fn entry_expires_after_ttl() {
        let d = ProviderDiscovery::new();
        let now = Utc::now();
        d.put("u1", "openai", vec!["gpt-4o".into()], now);
        let later = now + chrono::Duration::seconds(CACHE_TTL_SECONDS + 1);
        assert!(d.get("u1", "openai", later).is_none());
    }

    #[test]
    fn quota_exhausted_preserves_models_and_holds_cooldown() {
        let d = ProviderDiscovery::new();
        let now = Utc::now();
        d.put("u1", "anthropic", vec!["claude-sonnet-4-20250514".into()], now);
        d.mark_quota_exhausted("u1", "anthropic", Some("billing".into()), now);

        let (models, avail) = d.get("u1", "anthropic", now + chrono::Duration::seconds(100)).unwrap();
        assert_eq!(models, vec!["claude-sonnet-4-20250514"]);
        assert_eq!(avail, ProviderAvailability::QuotaExhausted { reason: Some("billing".into()) });

        // Still within the quota-exhausted TTL far past the normal cache TTL.
        assert!(d.get("u1", "anthropic", now + chrono::Duration::seconds(CACHE_TTL_SECONDS + 60)).is_some());
    }

    #[test]
    fn rate_limited_cooldown_is_shorter_than_quota_exhausted() {
        let d = ProviderDiscovery::new();
        let now = Utc::now();
        d.put("u1", "google", vec!["gemini-2.0-flash".into()], now);
        d.mark_rate_limited("u1", "google", now);

        assert!(d.get("u1", "google", now + chrono::Duration::seconds(30)).is_some());
        assert!(d.get("u1", "google", now + chrono::Duration::seconds(RATE_LIMIT_BACKOFF_SECONDS + 1)).is_none());
    }

    #[test]
    fn static_fallback_provides_candidates_for_known_providers() {
        assert!(!static_catalog("openai").is_empty());
        assert!(!static_catalog("azure").is_empty());
        assert!(static_catalog("unknown-provider").is_empty());
    }
}
