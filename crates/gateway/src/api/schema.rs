//! Parameter schema endpoint (spec §6 `GET /v1/schema[?model=…]`).
//!
//! Describes the shape of `GenerateParameters` accepted by `/v1/generate`,
//! narrowed by a model's capabilities when `model` is given.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SchemaQuery {
    pub model: Option<String>,
}

pub async fn get_schema(State(state): State<AppState>, Query(q): Query<SchemaQuery>) -> impl IntoResponse {
    let mut schema = serde_json::json!({
        "temperature": { "type": "number", "minimum": 0, "maximum": 2, "required": false },
        "max_tokens": { "type": "integer", "minimum": 1, "required": false },
        "format": { "type": "string", "required": false },
    });

    if let Some(model_id) = q.model {
        if let Some(descriptor) = state.registry.peek_model(&model_id) {
            if let Some(caps) = descriptor.capabilities {
                schema["max_tokens"]["maximum"] = serde_json::json!(caps.max_context_tokens);
                schema["format"]["enum"] = serde_json::json!(caps.output_formats);
            }
        }
    }

    Json(serde_json::json!({ "parameters": schema }))
}
