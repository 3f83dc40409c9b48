//! Model descriptor data model (spec §3 "Model descriptor").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    #[serde(rename = "3d")]
    ThreeD,
}

impl Modality {
    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::ThreeD => "3d",
        }
    }
}

impl Default for Modality {
    fn default() -> Self {
        Modality::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Available,
    Downloading,
    Failed,
    Disabled,
    Evicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Huggingface,
    Url,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSource {
    #[serde(rename = "type")]
    pub kind: SourceType,
    pub uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_formats: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_requirements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_input_max_edge: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_input_max_pixels: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_input_formats: Option<Vec<String>>,
}

/// Unique `model_id` is the registry's primary key; registration fails
/// for an empty id (spec §8 boundary behavior).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub modality: Modality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub status: ModelStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ModelSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ModelCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_default: Option<bool>,
}

impl ModelDescriptor {
    pub fn is_available(&self) -> bool {
        matches!(self.status, ModelStatus::Available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_serializes_3d_as_digit_form() {
        let json = serde_json::to_string(&Modality::ThreeD).unwrap();
        assert_eq!(json, "\"3d\"");
    }

    #[test]
    fn modality_round_trips() {
        for m in [Modality::Text, Modality::Image, Modality::ThreeD] {
            let json = serde_json::to_string(&m).unwrap();
            let back: Modality = serde_json::from_str(&json).unwrap();
            assert_eq!(back.as_str(), m.as_str());
        }
    }
}
