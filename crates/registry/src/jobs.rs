//! Download job tracking and execution (spec §4.D).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use gwy_domain::error::{Error, Result};
use gwy_domain::model::{ModelDescriptor, ModelSource, ModelStatus, SourceType};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub job_id: String,
    pub model_id: String,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cooperative cancellation flag checked by the running task on its next
/// progress update (spec §4.D `cancel`).
pub struct JobHandle {
    pub cancelled: Arc<AtomicBool>,
}

pub struct JobStore {
    path: Option<PathBuf>,
    persist: bool,
    jobs: RwLock<HashMap<String, DownloadJob>>,
    handles: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl JobStore {
    pub fn new(state_file: Option<PathBuf>, persist: bool) -> Result<Self> {
        let jobs = if persist {
            if let Some(path) = &state_file {
                if path.exists() {
                    let raw = std::fs::read_to_string(path)?;
                    serde_json::from_str(&raw).unwrap_or_default()
                } else {
                    HashMap::new()
                }
            } else {
                HashMap::new()
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: state_file,
            persist,
            jobs: RwLock::new(jobs),
            handles: RwLock::new(HashMap::new()),
        })
    }

    fn save(&self) {
        if !self.persist {
            return;
        }
        let Some(path) = &self.path else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(&*self.jobs.read()) {
            if let Err(err) = std::fs::write(path, json) {
                error!(%err, "failed to persist job store");
            }
        }
    }

    pub fn create_job(&self, model_id: &str) -> DownloadJob {
        let job = DownloadJob {
            job_id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            status: JobStatus::Queued,
            progress_pct: 0,
            created_at: Utc::now(),
            error: None,
        };
        self.jobs.write().insert(job.job_id.clone(), job.clone());
        self.handles
            .write()
            .insert(job.job_id.clone(), Arc::new(AtomicBool::new(false)));
        self.save();
        job
    }

    pub fn update_job(
        &self,
        job_id: &str,
        status: JobStatus,
        progress_pct: u8,
        error_msg: Option<String>,
    ) -> Option<DownloadJob> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(job_id)?;
        job.status = status;
        job.progress_pct = progress_pct;
        if error_msg.is_some() {
            job.error = error_msg;
        }
        let updated = job.clone();
        drop(jobs);
        self.save();
        Some(updated)
    }

    pub fn get_job(&self, job_id: &str) -> Option<DownloadJob> {
        self.jobs.read().get(job_id).cloned()
    }

    pub fn list_jobs(&self) -> Vec<DownloadJob> {
        self.jobs.read().values().cloned().collect()
    }

    pub fn cancel_job(&self, job_id: &str) -> Option<DownloadJob> {
        if let Some(flag) = self.handles.read().get(job_id) {
            flag.store(true, Ordering::SeqCst);
        }
        self.update_job(job_id, JobStatus::Cancelled, 0, None)
    }

    fn handle_for(&self, job_id: &str) -> Arc<AtomicBool> {
        self.handles
            .write()
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }
}

/// What a caller wants downloaded.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub model: ModelDescriptor,
    pub source: ModelSource,
    pub install_local: bool,
}

pub struct Downloader {
    registry: Arc<Registry>,
    jobs: Arc<JobStore>,
    model_root: PathBuf,
    http: reqwest::Client,
}

impl Downloader {
    pub fn new(registry: Arc<Registry>, jobs: Arc<JobStore>, model_root: PathBuf) -> Self {
        Self {
            registry,
            jobs,
            model_root,
            http: reqwest::Client::new(),
        }
    }

    /// Validates the source, registers the descriptor as `downloading`,
    /// creates the job, and (for remote sources needing materialization)
    /// spawns the task that streams bytes to disk.
    pub fn start(&self, request: DownloadRequest) -> Result<DownloadJob> {
        if let Some(existing) = self.registry.peek_model(&request.model.id) {
            if existing.is_available() {
                return Ok(DownloadJob {
                    job_id: "existing".into(),
                    model_id: request.model.id,
                    status: JobStatus::Completed,
                    progress_pct: 100,
                    created_at: Utc::now(),
                    error: None,
                });
            }
        }

        let mut model = request.model.clone();
        model.status = ModelStatus::Downloading;
        self.registry.add_model(model.clone())?;
        let job = self.jobs.create_job(&model.id);

        match request.source.kind {
            SourceType::Huggingface => {
                let repo_id = request.source.uri.clone();
                if repo_id.is_empty() {
                    return self.fail_job(&job.job_id, &model.id, "missing repo id for huggingface download");
                }
                if !request.install_local {
                    model.provider = Some("huggingface".into());
                    model.status = ModelStatus::Available;
                    model.local_path = None;
                    model.source = Some(ModelSource { kind: SourceType::Huggingface, uri: repo_id });
                    self.registry.add_model(model)?;
                    return Ok(self
                        .jobs
                        .update_job(&job.job_id, JobStatus::Completed, 100, None)
                        .unwrap_or(job));
                }
                self.spawn_huggingface(job.job_id.clone(), model.id.clone(), repo_id);
                Ok(job)
            }
            SourceType::Url => {
                let url = request.source.uri.clone();
                if url.is_empty() {
                    return self.fail_job(&job.job_id, &model.id, "missing URL for download");
                }
                self.spawn_url(job.job_id.clone(), model.id.clone(), url);
                Ok(job)
            }
            SourceType::Local => {
                model.local_path = Some(request.source.uri.clone());
                model.status = ModelStatus::Available;
                self.registry.add_model(model)?;
                Ok(self
                    .jobs
                    .update_job(&job.job_id, JobStatus::Completed, 100, None)
                    .unwrap_or(job))
            }
        }
    }

    fn fail_job(&self, job_id: &str, model_id: &str, message: &str) -> Result<DownloadJob> {
        self.registry.update_model_status(model_id, ModelStatus::Failed)?;
        Ok(self
            .jobs
            .update_job(job_id, JobStatus::Failed, 0, Some(message.to_string()))
            .ok_or_else(|| Error::Internal("job vanished".into()))?)
    }

    fn spawn_url(&self, job_id: String, model_id: String, url: String) {
        let registry = self.registry.clone();
        let jobs = self.jobs.clone();
        let model_root = self.model_root.clone();
        let http = self.http.clone();
        let cancelled = self.jobs.handle_for(&job_id);

        tokio::spawn(async move {
            jobs.update_job(&job_id, JobStatus::Running, 5, None);
            let dest = model_root.join(sanitize_filename(&model_id));
            match stream_to_file(&http, &url, &dest, &cancelled, |pct| {
                jobs.update_job(&job_id, JobStatus::Running, pct, None);
            })
            .await
            {
                Ok(()) if cancelled.load(Ordering::SeqCst) => {
                    jobs.update_job(&job_id, JobStatus::Cancelled, 0, None);
                }
                Ok(()) => {
                    if let Some(mut model) = registry.get_model(&model_id) {
                        model.local_path =
                            Some(dest.file_name().unwrap().to_string_lossy().into_owned());
                        model.status = ModelStatus::Available;
                        let _ = registry.add_model(model);
                    }
                    jobs.update_job(&job_id, JobStatus::Completed, 100, None);
                    info!(model_id, "download completed");
                }
                Err(err) => {
                    error!(model_id, %err, "download failed");
                    let _ = registry.update_model_status(&model_id, ModelStatus::Failed);
                    jobs.update_job(&job_id, JobStatus::Failed, 0, Some(err.to_string()));
                }
            }
        });
    }

    fn spawn_huggingface(&self, job_id: String, model_id: String, repo_id: String) {
        let registry = self.registry.clone();
        let jobs = self.jobs.clone();
        let model_root = self.model_root.clone();
        let http = self.http.clone();
        let cancelled = self.jobs.handle_for(&job_id);

        tokio::spawn(async move {
            jobs.update_job(&job_id, JobStatus::Running, 5, None);
            let url = format!("https://huggingface.co/{repo_id}/resolve/main/model.safetensors");
            let dest_dir = model_root.join("hf").join(repo_id.replace('/', "__"));
            if let Err(err) = tokio::fs::create_dir_all(&dest_dir).await {
                jobs.update_job(&job_id, JobStatus::Failed, 0, Some(err.to_string()));
                let _ = registry.update_model_status(&model_id, ModelStatus::Failed);
                return;
            }
            let dest = dest_dir.join("model.safetensors");

            match stream_to_file(&http, &url, &dest, &cancelled, |pct| {
                jobs.update_job(&job_id, JobStatus::Running, pct, None);
            })
            .await
            {
                Ok(()) if cancelled.load(Ordering::SeqCst) => {
                    jobs.update_job(&job_id, JobStatus::Cancelled, 0, None);
                }
                Ok(()) => {
                    if let Some(mut model) = registry.get_model(&model_id) {
                        model.local_path = dest_dir
                            .strip_prefix(&model_root)
                            .ok()
                            .map(|p| p.to_string_lossy().into_owned());
                        model.status = ModelStatus::Available;
                        model.source = Some(ModelSource { kind: SourceType::Huggingface, uri: repo_id.clone() });
                        let _ = registry.add_model(model);
                    }
                    jobs.update_job(&job_id, JobStatus::Completed, 100, None);
                    info!(model_id, repo_id, "huggingface download completed");
                }
                Err(err) => {
                    error!(model_id, repo_id, %err, "huggingface download failed");
                    let _ = registry.update_model_status(&model_id, ModelStatus::Failed);
                    jobs.update_job(&job_id, JobStatus::Failed, 0, Some(err.to_string()));
                }
            }
        });
    }
}

fn sanitize_filename(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

async fn stream_to_file(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancelled: &AtomicBool,
    mut on_progress: impl FnMut(u8),
) -> Result<()> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| Error::ServiceUnavailable(e.to_string()))?
        .error_for_status()
        .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

    let total = response.content_length();
    let mut downloaded: u64 = 0;
    let mut file = tokio::fs::File::create(dest).await?;

    use tokio::io::AsyncWriteExt;
    let mut stream = response.bytes_stream();
    use futures_util::StreamExt;
    while let Some(chunk) = stream.next().await {
        if cancelled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let chunk: Bytes = chunk.map_err(|e| Error::ServiceUnavailable(e.to_string()))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if let Some(total) = total {
            let pct = ((downloaded as f64 / total as f64) * 90.0).min(90.0) as u8 + 10;
            on_progress(pct.min(99));
        }
    }
    Ok(())
}

#[allow(dead_code)]
type ByteStream = std::pin::Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_cancel_job() {
        let store = JobStore::new(None, false).unwrap();
        let job = store.create_job("m1");
        assert_eq!(job.status, JobStatus::Queued);
        let cancelled = store.cancel_job(&job.job_id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[test]
    fn update_unknown_job_returns_none() {
        let store = JobStore::new(None, false).unwrap();
        assert!(store.update_job("nope", JobStatus::Running, 1, None).is_none());
    }
}
