//! The adapter seam: every concrete provider implements exactly one of
//! [`TextAdapter`], [`ImageAdapter`], or [`ThreeDAdapter`] depending on the
//! modality it was constructed for. There is no single "do everything"
//! trait with a `supports(modality)` check — a provider's capability is
//! fixed at construction time, so the selector can never hand a text
//! request to something that can only produce meshes.

use gwy_domain::error::Result;
use gwy_domain::generate::{BoxStream, GenerateOutput, GenerateRequest, Usage};

/// An incremental event yielded by a streaming text adapter. This is the
/// adapter's own vocabulary, independent of the SSE wire framing the
/// gateway layers on top (`model_selected` / `choices[].delta` / `[DONE]`);
/// the gateway's generate orchestrator translates `AdapterEvent`s into that
/// framing as they arrive.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// Incremental text content.
    Text(String),
    /// Stream finished, with whatever usage accounting the provider sent.
    Done(Option<Usage>),
}

/// Adapter for text/chat generation (OpenAI-compatible, Anthropic, Google,
/// and local text models).
#[async_trait::async_trait]
pub trait TextAdapter: Send + Sync {
    /// Generate a full response and wait for it to complete.
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput>;

    /// Generate a response as a stream of incremental events.
    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>>;

    /// The provider id this adapter was constructed for (matches
    /// `ProviderConfig::id`).
    fn provider_id(&self) -> &str;
}

/// Adapter for image generation. Image providers do not stream; the
/// gateway still wraps the single response in the same SSE envelope as
/// text so clients see a uniform event sequence.
#[async_trait::async_trait]
pub trait ImageAdapter: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput>;

    fn provider_id(&self) -> &str;
}

/// Adapter for 3D mesh generation.
#[async_trait::async_trait]
pub trait ThreeDAdapter: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput>;

    fn provider_id(&self) -> &str;
}

/// A constructed adapter, already bound to the one modality it serves.
///
/// The selector builds one of these per (provider, modality) pair and
/// never needs to ask "can you actually do this" — the enum variant
/// already answers that.
pub enum Adapter {
    Text(std::sync::Arc<dyn TextAdapter>),
    Image(std::sync::Arc<dyn ImageAdapter>),
    ThreeD(std::sync::Arc<dyn ThreeDAdapter>),
}

impl Adapter {
    pub fn provider_id(&self) -> &str {
        match self {
            Adapter::Text(a) => a.provider_id(),
            Adapter::Image(a) => a.provider_id(),
            Adapter::ThreeD(a) => a.provider_id(),
        }
    }
}
