//! Local model adapters.
//!
//! Local models run as external processes rather than behind an HTTP API:
//! a llama.cpp-style CLI for text, a diffusers-style CLI for images, and a
//! shap-e-style CLI for meshes. Each adapter shells out to a configured
//! runner binary with the model's local path and prompt, and captures its
//! output. This keeps the gateway process free of GPU/ML framework
//! dependencies while still letting a deployment wire in whatever runner
//! binary it has installed.

use crate::traits::{AdapterEvent, ImageAdapter, TextAdapter, ThreeDAdapter};
use gwy_domain::error::{Error, Result};
use gwy_domain::generate::{ArtifactRef, BoxStream, GenerateOutput, GenerateRequest};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Local text generation via a configured CLI runner (e.g. `llama-cli`).
pub struct LocalTextAdapter {
    id: String,
    runner_bin: String,
    model_path: PathBuf,
}

impl LocalTextAdapter {
    pub fn new(id: String, runner_bin: String, model_path: PathBuf) -> Self {
        Self { id, runner_bin, model_path }
    }

    async fn run(&self, prompt: &str, max_tokens: Option<u32>) -> Result<String> {
        let mut cmd = Command::new(&self.runner_bin);
        cmd.arg("--model")
            .arg(&self.model_path)
            .arg("--prompt")
            .arg(prompt)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(n) = max_tokens {
            cmd.arg("--n-predict").arg(n.to_string());
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("local runner spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "local text runner exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl TextAdapter for LocalTextAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput> {
        let prompt = req.input.prompt.clone().unwrap_or_default();
        let max_tokens = req.parameters.as_ref().and_then(|p| p.max_tokens);
        let text = self.run(&prompt, max_tokens).await?;
        Ok(GenerateOutput { text: Some(text), artifacts: None, usage: None })
    }

    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        // The CLI runner writes its full completion once it exits; there is
        // no token-by-token channel to read from a blocking subprocess call,
        // so the stream carries the whole text as a single delta.
        let output = self.generate(req).await?;
        let stream = async_stream::stream! {
            if let Some(text) = output.text {
                yield Ok(AdapterEvent::Text(text));
            }
            yield Ok(AdapterEvent::Done(None));
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

/// Local image generation via a configured CLI runner (e.g. a
/// diffusers-backed `sd-cli`). Writes the generated image to a temp file
/// and returns it as an artifact.
pub struct LocalImageAdapter {
    id: String,
    runner_bin: String,
    model_path: PathBuf,
    output_dir: PathBuf,
}

impl LocalImageAdapter {
    pub fn new(id: String, runner_bin: String, model_path: PathBuf, output_dir: PathBuf) -> Self {
        Self { id, runner_bin, model_path, output_dir }
    }
}

#[async_trait::async_trait]
impl ImageAdapter for LocalImageAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput> {
        let prompt = req.input.prompt.clone().unwrap_or_default();
        let out_path = self.output_dir.join(format!("{}.png", uuid::Uuid::new_v4()));

        let output = Command::new(&self.runner_bin)
            .arg("--model")
            .arg(&self.model_path)
            .arg("--prompt")
            .arg(&prompt)
            .arg("--out")
            .arg(&out_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("local image runner spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "local image runner exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let bytes = tokio::fs::read(&out_path)
            .await
            .map_err(|e| Error::Internal(format!("reading local image output: {e}")))?;

        Ok(GenerateOutput {
            text: None,
            artifacts: Some(vec![ArtifactRef {
                artifact_id: out_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string(),
                url: format!("file://{}", out_path.display()),
                media_type: "image/png".to_string(),
                size_bytes: Some(bytes.len() as u64),
            }]),
            usage: None,
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

/// Local 3D mesh generation via a configured CLI runner (e.g. a
/// shap-e-backed `mesh-cli`).
pub struct Local3dAdapter {
    id: String,
    runner_bin: String,
    model_path: PathBuf,
    output_dir: PathBuf,
}

impl Local3dAdapter {
    pub fn new(id: String, runner_bin: String, model_path: PathBuf, output_dir: PathBuf) -> Self {
        Self { id, runner_bin, model_path, output_dir }
    }
}

#[async_trait::async_trait]
impl ThreeDAdapter for Local3dAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput> {
        let prompt = req.input.prompt.clone().unwrap_or_default();
        let out_path = self.output_dir.join(format!("{}.glb", uuid::Uuid::new_v4()));

        let output = Command::new(&self.runner_bin)
            .arg("--model")
            .arg(&self.model_path)
            .arg("--prompt")
            .arg(&prompt)
            .arg("--out")
            .arg(&out_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("local 3d runner spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "local 3d runner exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let bytes = tokio::fs::read(&out_path)
            .await
            .map_err(|e| Error::Internal(format!("reading local 3d output: {e}")))?;

        Ok(GenerateOutput {
            text: None,
            artifacts: Some(vec![ArtifactRef {
                artifact_id: out_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string(),
                url: format!("file://{}", out_path.display()),
                media_type: "model/gltf-binary".to_string(),
                size_bytes: Some(bytes.len() as u64),
            }]),
            usage: None,
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
