//! OpenAI-compatible text adapter.
//!
//! Covers OpenAI, xAI (Grok, same wire format behind a different base URL),
//! and Azure OpenAI, which uses the same JSON contract but a different URL
//! pattern (`/openai/deployments/{model}/chat/completions`) and auth header
//! (`api-key` instead of `Authorization: Bearer`).

use crate::traits::{AdapterEvent, TextAdapter};
use crate::util::from_reqwest;
use gwy_domain::config::llm::ProviderConfig;
use gwy_domain::error::{Error, Result};
use gwy_domain::generate::{BoxStream, GenerateOutput, GenerateRequest, Usage};
use serde_json::Value;

/// An LLM text adapter for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatAdapter {
    id: String,
    base_url: String,
    api_key: String,
    auth_header: String,
    auth_prefix: String,
    default_model: String,
    client: reqwest::Client,
    is_azure: bool,
}

impl OpenAiCompatAdapter {
    /// Build an adapter from a provider config and its resolved API key.
    /// `is_azure` selects the Azure deployment URL pattern and `api-key`
    /// header; otherwise the standard `Authorization: Bearer` scheme is used
    /// for both OpenAI and xAI.
    pub fn new(cfg: &ProviderConfig, api_key: String, is_azure: bool) -> Result<Self> {
        let (auth_header, auth_prefix) = if is_azure {
            ("api-key".to_string(), String::new())
        } else {
            ("Authorization".to_string(), "Bearer ".to_string())
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            api_key,
            auth_header,
            auth_prefix,
            default_model: "gpt-4o".to_string(),
            client,
            is_azure,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let header_value = format!("{}{}", self.auth_prefix, self.api_key);
        self.client
            .post(url)
            .header(&self.auth_header, &header_value)
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &GenerateRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn chat_url(&self, model: &str) -> String {
        if self.is_azure {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version=2024-10-21",
                self.base_url, model
            )
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn build_body(&self, req: &GenerateRequest, stream: bool) -> Value {
        let prompt = req
            .input
            .prompt
            .clone()
            .unwrap_or_default();

        let mut body = serde_json::json!({
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        });

        if !self.is_azure {
            body["model"] = Value::String(self.effective_model(req));
        }
        if let Some(p) = &req.parameters {
            if let Some(t) = p.temperature {
                body["temperature"] = serde_json::json!(t);
            }
            if let Some(m) = p.max_tokens {
                body["max_tokens"] = serde_json::json!(m);
            }
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens").and_then(|v| v.as_u64()).map(|n| n as u32),
        completion_tokens: v
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32),
        total_tokens: v.get("total_tokens").and_then(|v| v.as_u64()).map(|n| n as u32),
    })
}

fn parse_response(body: &Value) -> Result<GenerateOutput> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Internal("no choices in openai_compat response".into()))?;

    let text = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let usage = body.get("usage").and_then(parse_usage);

    Ok(GenerateOutput {
        text: Some(text),
        artifacts: None,
        usage,
    })
}

fn parse_sse_line(data: &str) -> Vec<Result<AdapterEvent>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Internal(format!("bad SSE payload: {e}")))],
    };

    let no_choices = v
        .get("choices")
        .and_then(|c| c.as_array())
        .map_or(true, |a| a.is_empty());
    if no_choices {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            return vec![Ok(AdapterEvent::Done(Some(usage)))];
        }
        return Vec::new();
    }

    let choice = match v.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first()) {
        Some(c) => c,
        None => return Vec::new(),
    };

    if choice.get("finish_reason").and_then(|f| f.as_str()).is_some() {
        let usage = v.get("usage").and_then(parse_usage);
        return vec![Ok(AdapterEvent::Done(usage))];
    }

    let delta_text = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str());

    match delta_text {
        Some(text) if !text.is_empty() => vec![Ok(AdapterEvent::Text(text.to_string()))],
        _ => Vec::new(),
    }
}

#[async_trait::async_trait]
impl TextAdapter for OpenAiCompatAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput> {
        let model = self.effective_model(req);
        let url = self.chat_url(&model);
        let body = self.build_body(req, false);

        tracing::debug!(provider = %self.id, %url, "openai_compat generate request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(crate::util::map_http_error(&self.id, status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_response(&json)
    }

    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<BoxStream<'static, Result<AdapterEvent>>> {
        let model = self.effective_model(req);
        let url = self.chat_url(&model);
        let body = self.build_body(req, true);
        let provider_id = self.id.clone();

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(from_reqwest)?;
            return Err(crate::util::map_http_error(&provider_id, status.as_u16(), &text));
        }

        Ok(crate::sse::sse_response_stream(resp, parse_sse_line))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
