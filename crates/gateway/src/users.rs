//! Per-user generation credits (spec §4.L, §6 `credits` block on
//! `GenerateResponse`). Deliberately minimal: this gateway carries no
//! billing system of its own, only a place to record whatever an
//! operator or a fronting service has already decided about a user's
//! standing, which the Backend Selector then reads via
//! `SelectorContext.credits`.
//!
//! Provider availability (`SelectorContext.configured_providers`) is a
//! gateway-wide property of the configured `LlmConfig`, not a per-user
//! setting, and is built directly from `Config` in the orchestrator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gwy_domain::error::Result;
use gwy_domain::generate::{CreditsState, CreditsStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub credits_state: CreditsState,
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
}

impl UserRecord {
    fn credits(&self) -> CreditsStatus {
        CreditsStatus { state: self.credits_state, retry_after_seconds: self.retry_after_seconds }
    }

    fn fresh(user_id: &str) -> Self {
        UserRecord { user_id: user_id.to_string(), created_at: Utc::now(), credits_state: CreditsState::Ok, retry_after_seconds: None }
    }
}

pub struct UserStore {
    path: Option<PathBuf>,
    persist: bool,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl UserStore {
    pub fn new(state_file: Option<PathBuf>, persist: bool) -> Result<Self> {
        let users = if persist {
            match &state_file {
                Some(path) if path.exists() => {
                    let raw = std::fs::read_to_string(path)?;
                    serde_json::from_str(&raw).unwrap_or_default()
                }
                _ => HashMap::new(),
            }
        } else {
            HashMap::new()
        };
        Ok(Self { path: state_file, persist, users: RwLock::new(users) })
    }

    fn save(&self) {
        if !self.persist {
            return;
        }
        let Some(path) = &self.path else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(&*self.users.read()) {
            if let Err(err) = std::fs::write(path, json) {
                error!(%err, "failed to persist user store");
            }
        }
    }

    /// Returns the existing record, creating a fresh one (full credits)
    /// on first sight of this user id.
    pub fn get_or_create(&self, user_id: &str) -> UserRecord {
        if let Some(existing) = self.users.read().get(user_id) {
            return existing.clone();
        }
        let record = UserRecord::fresh(user_id);
        self.users.write().insert(user_id.to_string(), record.clone());
        self.save();
        record
    }

    pub fn credits_status(&self, user_id: &str) -> CreditsStatus {
        self.get_or_create(user_id).credits()
    }

    pub fn set_credits(&self, user_id: &str, state: CreditsState, retry_after_seconds: Option<u64>) {
        let mut users = self.users.write();
        let record = users.entry(user_id.to_string()).or_insert_with(|| UserRecord::fresh(user_id));
        record.credits_state = state;
        record.retry_after_seconds = retry_after_seconds;
        drop(users);
        self.save();
    }

    pub fn list(&self) -> Vec<UserRecord> {
        self.users.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_user_defaults_to_full_credits() {
        let store = UserStore::new(None, false).unwrap();
        let status = store.credits_status("u1");
        assert_eq!(status.state, CreditsState::Ok);
    }

    #[test]
    fn set_credits_updates_existing_record() {
        let store = UserStore::new(None, false).unwrap();
        store.set_credits("u1", CreditsState::Exhausted, Some(60));
        let status = store.credits_status("u1");
        assert_eq!(status.state, CreditsState::Exhausted);
        assert_eq!(status.retry_after_seconds, Some(60));
    }

    #[test]
    fn users_are_independent() {
        let store = UserStore::new(None, false).unwrap();
        store.set_credits("u1", CreditsState::RateLimited, Some(5));
        assert_eq!(store.credits_status("u2").state, CreditsState::Ok);
    }
}
