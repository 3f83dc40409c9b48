//! Generate request/response and SSE event wire types (spec §6 "Generate
//! request", §4.L "Generate Orchestrator").

use std::collections::HashMap;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A boxed async stream, used for adapter generation responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Auto,
    FreeOnly,
    CommercialOnly,
    Model,
}

impl Default for SelectionMode {
    fn default() -> Self {
        SelectionMode::Auto
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Canonical generate-request body (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_tokens: Option<Value>,
    pub modality: crate::model::Modality,
    pub input: GenerateInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<GenerateParameters>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_mode: Option<SelectionMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
}

/// An artifact reference embedded in a `GenerateOutput` (large bytes are
/// promoted out of the inline response body, see §4.B/4.L).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: String,
    pub url: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<ArtifactRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionInfo {
    pub selected_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_provider: Option<String>,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditsState {
    Ok,
    RateLimited,
    Exhausted,
}

impl Default for CreditsState {
    fn default() -> Self {
        CreditsState::Ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditsStatus {
    pub state: CreditsState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// Full non-streaming response body (also the terminal payload of a
/// streaming `complete` event for image/3d modalities).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub request_id: String,
    pub model: String,
    pub modality: crate::model::Modality,
    pub output: GenerateOutput,
    pub selection: SelectionInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<CreditsStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoiceDelta {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub delta: ChoiceDelta,
}

/// One SSE event in the `/v1/generate` stream (spec §6 "SSE framing").
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    ModelSelected {
        event: &'static str,
        model: String,
        modality: crate::model::Modality,
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        fallback_used: bool,
    },
    TextDelta {
        choices: Vec<Choice>,
    },
    Complete(Box<GenerateResponse>),
    Error {
        error: StreamErrorBody,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl StreamEvent {
    pub fn model_selected(
        model: impl Into<String>,
        modality: crate::model::Modality,
        provider: Option<String>,
        fallback_used: bool,
    ) -> Self {
        StreamEvent::ModelSelected {
            event: "model_selected",
            model: model.into(),
            modality,
            provider,
            fallback_used,
        }
    }

    pub fn text_delta(content: impl Into<String>) -> Self {
        StreamEvent::TextDelta {
            choices: vec![Choice { delta: ChoiceDelta { content: content.into() } }],
        }
    }

    pub fn error(code: &'static str, message: String) -> Self {
        StreamEvent::Error { error: StreamErrorBody { code, message } }
    }

    /// Renders as the `data: <json>` payload line, without the trailing
    /// blank line SSE framing requires (the transport adds that).
    pub fn to_data_line(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub const DONE: &str = "[DONE]";

pub type ExtraFields = HashMap<String, Value>;
