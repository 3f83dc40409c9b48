//! Content-addressed artifact store with TTL expiry (spec §4.B).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gwy_domain::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Image,
    Mesh,
}

impl ArtifactType {
    pub fn media_type(self) -> &'static str {
        match self {
            ArtifactType::Image => "image/png",
            ArtifactType::Mesh => "model/gltf-binary",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Artifact {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub struct ArtifactStore {
    base: PathBuf,
    expiry_secs: i64,
    index: RwLock<HashMap<String, Artifact>>,
}

impl ArtifactStore {
    pub fn new(base: PathBuf, expiry_secs: u64) -> Result<Self> {
        std::fs::create_dir_all(&base)?;
        Ok(Self {
            base,
            expiry_secs: expiry_secs as i64,
            index: RwLock::new(HashMap::new()),
        })
    }

    fn path_for(&self, artifact_id: &str) -> PathBuf {
        self.base.join(artifact_id)
    }

    pub fn put(&self, bytes: &[u8], kind: ArtifactType) -> Result<Artifact> {
        let artifact_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let artifact = Artifact {
            artifact_id: artifact_id.clone(),
            kind,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(self.expiry_secs),
        };
        std::fs::write(self.path_for(&artifact_id), bytes)?;
        self.index.write().insert(artifact_id, artifact.clone());
        Ok(artifact)
    }

    /// Fails `not_found` if missing, `artifact_expired` (410) if past expiry.
    pub fn get(&self, id: &str) -> Result<Artifact> {
        let artifact = self
            .index
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("artifact {id}")))?;
        if artifact.is_expired() {
            return Err(Error::ArtifactExpired(id.to_string()));
        }
        Ok(artifact)
    }

    pub fn bytes(&self, id: &str) -> Result<Vec<u8>> {
        self.get(id)?;
        Ok(std::fs::read(self.path_for(id))?)
    }

    /// Removes expired artifacts from the index and deletes their bytes.
    /// Not invoked by a background sweep (see §4.E note on lazy cleanup);
    /// callers sweep opportunistically, e.g. on GET `/v1/artifacts`.
    pub fn sweep_expired(&self) {
        let expired: Vec<String> = self
            .index
            .read()
            .values()
            .filter(|a| a.is_expired())
            .map(|a| a.artifact_id.clone())
            .collect();
        for id in expired {
            self.index.write().remove(&id);
            let _ = std::fs::remove_file(self.path_for(&id));
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_bytes_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf(), 3600).unwrap();
        let artifact = store.put(b"hello", ArtifactType::Image).unwrap();
        assert_eq!(store.bytes(&artifact.artifact_id).unwrap(), b"hello");
    }

    #[test]
    fn expired_artifact_returns_410() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf(), 0).unwrap();
        let artifact = store.put(b"hello", ArtifactType::Mesh).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let err = store.get(&artifact.artifact_id).unwrap_err();
        assert_eq!(err.status(), 410);
    }

    #[test]
    fn missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().to_path_buf(), 3600).unwrap();
        let err = store.get("nope").unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
