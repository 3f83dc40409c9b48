//! Append-only session/turn store (spec §4.E).
//!
//! Persists session state in `sessions.json` under the configured state
//! path. Sessions are append-only: turns accumulate a dense,
//! strictly-increasing `sequence`; `reset` truncates a session's turns;
//! `regenerate` drops the highest-sequence turn for replay.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gwy_domain::error::{Error, Result};
use gwy_domain::model::Modality;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub sequence: u64,
    pub modality: Modality,
    pub input: Value,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_tokens: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_tokens: Option<Value>,
    #[serde(default)]
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn message_count(&self) -> usize {
        self.turns.len()
    }
}

pub struct SessionStore {
    path: PathBuf,
    persist: bool,
    sessions: RwLock<HashMap<String, Session>>,
    retention_minutes: Option<u64>,
}

impl SessionStore {
    /// Loads or creates the session store at `state_path/sessions/sessions.json`.
    pub fn new(state_path: &Path, persist: bool, retention_minutes: Option<u64>) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("sessions.json");

        let sessions = if persist && path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(sessions = sessions.len(), path = %path.display(), "session store loaded");

        Ok(Self { path, persist, sessions: RwLock::new(sessions), retention_minutes })
    }

    fn flush(&self) {
        if !self.persist {
            return;
        }
        if let Ok(json) = serde_json::to_string_pretty(&*self.sessions.read()) {
            if let Err(err) = std::fs::write(&self.path, json) {
                tracing::error!(%err, "failed to persist session store");
            }
        }
    }

    /// Opportunistic TTL expiry, checked lazily at the top of `list`/`get`
    /// rather than via a background sweep (spec §4.E recovered detail).
    fn expire_stale(&self) {
        let Some(minutes) = self.retention_minutes else { return };
        let cutoff = Utc::now() - chrono::Duration::minutes(minutes as i64);
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_used_at >= cutoff);
        if sessions.len() != before {
            drop(sessions);
            self.flush();
        }
    }

    pub fn create(&self) -> Session {
        self.expire_stale();
        let now = Utc::now();
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Active,
            title: None,
            created_at: now,
            last_used_at: now,
            state_tokens: None,
            turns: Vec::new(),
        };
        self.sessions.write().insert(session.session_id.clone(), session.clone());
        self.flush();
        session
    }

    /// Touches `last_used_at` as a read side effect.
    pub fn get(&self, session_id: &str) -> Result<Session> {
        self.expire_stale();
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        session.last_used_at = Utc::now();
        let result = session.clone();
        drop(sessions);
        self.flush();
        Ok(result)
    }

    /// Ordered by `last_used_at` descending, then `created_at` descending.
    pub fn list(&self) -> Vec<Session> {
        self.expire_stale();
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.last_used_at.cmp(&a.last_used_at).then(b.created_at.cmp(&a.created_at))
        });
        sessions
    }

    /// Assigns `sequence = max(sequence)+1`. Auto-titles on `sequence=1`
    /// when `title` is null and the prompt is non-empty text: the first
    /// 50 characters verbatim, else the first 47 plus `"..."`.
    pub fn append_turn(
        &self,
        session_id: &str,
        modality: Modality,
        input: Value,
        output: Value,
        state_tokens: Option<Value>,
    ) -> Result<Turn> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        if session.status == SessionStatus::Closed {
            return Err(Error::Forbidden(format!("session {session_id} is closed")));
        }

        let sequence = session.turns.iter().map(|t| t.sequence).max().unwrap_or(0) + 1;
        let turn = Turn {
            id: uuid::Uuid::new_v4().to_string(),
            sequence,
            modality,
            input: input.clone(),
            output,
            state_tokens,
            created_at: Utc::now(),
        };

        if sequence == 1 && session.title.is_none() {
            if let Some(prompt) = input.get("prompt").and_then(Value::as_str) {
                let trimmed = prompt.trim();
                if !trimmed.is_empty() {
                    session.title = Some(auto_title(trimmed));
                }
            }
        }

        session.turns.push(turn.clone());
        session.last_used_at = Utc::now();
        drop(sessions);
        self.flush();
        Ok(turn)
    }

    /// Deletes all turns and clears `state_tokens`.
    pub fn reset(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        session.turns.clear();
        session.state_tokens = None;
        session.last_used_at = Utc::now();
        drop(sessions);
        self.flush();
        Ok(())
    }

    /// Flips status; closed sessions refuse new turns and regenerate.
    pub fn close(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        session.status = SessionStatus::Closed;
        drop(sessions);
        self.flush();
        Ok(())
    }

    /// Deletes the single highest-`sequence` turn and returns the
    /// modality/input of the most recent turn (scanning backward) whose
    /// `input.prompt` is non-empty, for the caller to replay through the
    /// selector.
    pub fn prepare_regenerate(&self, session_id: &str) -> Result<(Modality, Value)> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;
        if session.status == SessionStatus::Closed {
            return Err(Error::Forbidden(format!("session {session_id} is closed")));
        }
        if session.turns.is_empty() {
            return Err(Error::Validation("session has no turns to regenerate".into()));
        }

        let replay = session
            .turns
            .iter()
            .rev()
            .find(|t| {
                t.input
                    .get("prompt")
                    .and_then(Value::as_str)
                    .map(|p| !p.trim().is_empty())
                    .unwrap_or(false)
            })
            .map(|t| (t.modality, t.input.clone()))
            .ok_or_else(|| Error::Validation("no prior prompt turn to regenerate".into()))?;

        let max_sequence = session.turns.iter().map(|t| t.sequence).max().unwrap();
        session.turns.retain(|t| t.sequence != max_sequence);
        drop(sessions);
        self.flush();
        Ok(replay)
    }
}

/// `prompt[:47]+"..."` if longer than 50 chars, else the full prompt.
fn auto_title(prompt: &str) -> String {
    let chars: Vec<char> = prompt.chars().collect();
    if chars.len() > 50 {
        let head: String = chars[..47].iter().collect();
        format!("{}...", head.trim_end())
    } else {
        prompt.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        let dir = tempfile::tempdir().unwrap();
        SessionStore::new(dir.path(), false, None).unwrap()
    }

    #[test]
    fn append_turn_assigns_dense_sequence() {
        let store = store();
        let session = store.create();
        let t1 = store
            .append_turn(&session.session_id, Modality::Text, serde_json::json!({"prompt": "hi"}), serde_json::json!({"text": "hello"}), None)
            .unwrap();
        let t2 = store
            .append_turn(&session.session_id, Modality::Text, serde_json::json!({"prompt": "again"}), serde_json::json!({"text": "hi"}), None)
            .unwrap();
        assert_eq!(t1.sequence, 1);
        assert_eq!(t2.sequence, 2);
    }

    #[test]
    fn first_turn_auto_titles_short_prompt() {
        let store = store();
        let session = store.create();
        store
            .append_turn(&session.session_id, Modality::Text, serde_json::json!({"prompt": "Explain gravity"}), serde_json::json!({"text": "..."}), None)
            .unwrap();
        let loaded = store.get(&session.session_id).unwrap();
        assert_eq!(loaded.title.as_deref(), Some("Explain gravity"));
    }

    #[test]
    fn first_turn_auto_titles_long_prompt_with_ellipsis() {
        let store = store();
        let session = store.create();
        let long_prompt = "a".repeat(60);
        store
            .append_turn(&session.session_id, Modality::Text, serde_json::json!({"prompt": long_prompt}), serde_json::json!({"text": "..."}), None)
            .unwrap();
        let loaded = store.get(&session.session_id).unwrap();
        let title = loaded.title.unwrap();
        assert!(title.ends_with("..."));
        assert_eq!(title.len(), 47 + 3);
    }

    #[test]
    fn reset_clears_turns_and_state_tokens() {
        let store = store();
        let session = store.create();
        store
            .append_turn(&session.session_id, Modality::Text, serde_json::json!({"prompt": "hi"}), serde_json::json!({}), Some(serde_json::json!({"k": 1})))
            .unwrap();
        store.reset(&session.session_id).unwrap();
        let loaded = store.get(&session.session_id).unwrap();
        assert!(loaded.turns.is_empty());
        assert!(loaded.state_tokens.is_none());
    }

    #[test]
    fn closed_session_rejects_new_turns() {
        let store = store();
        let session = store.create();
        store.close(&session.session_id).unwrap();
        let err = store
            .append_turn(&session.session_id, Modality::Text, serde_json::json!({"prompt": "hi"}), serde_json::json!({}), None)
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn regenerate_drops_highest_sequence_turn_and_keeps_title() {
        let store = store();
        let session = store.create();
        store
            .append_turn(&session.session_id, Modality::Text, serde_json::json!({"prompt": "Explain gravity"}), serde_json::json!({"text": "a"}), None)
            .unwrap();
        let (modality, input) = store.prepare_regenerate(&session.session_id).unwrap();
        assert_eq!(modality, Modality::Text);
        assert_eq!(input["prompt"], "Explain gravity");
        let loaded = store.get(&session.session_id).unwrap();
        assert_eq!(loaded.message_count(), 0);
        assert_eq!(loaded.title.as_deref(), Some("Explain gravity"));
    }

    #[test]
    fn regenerate_on_closed_session_fails() {
        let store = store();
        let session = store.create();
        store
            .append_turn(&session.session_id, Modality::Text, serde_json::json!({"prompt": "hi"}), serde_json::json!({}), None)
            .unwrap();
        store.close(&session.session_id).unwrap();
        let err = store.prepare_regenerate(&session.session_id).unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
