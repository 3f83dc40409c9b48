//! Anthropic-native text adapter, using the Messages API.

use crate::traits::{AdapterEvent, TextAdapter};
use crate::util::from_reqwest;
use gwy_domain::config::llm::ProviderConfig;
use gwy_domain::error::{Error, Result};
use gwy_domain::generate::{BoxStream, GenerateOutput, GenerateRequest, Usage};
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(cfg: &ProviderConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            default_model: "claude-sonnet-4-20250514".to_string(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &GenerateRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn build_body(&self, req: &GenerateRequest, stream: bool) -> Value {
        let prompt = req.input.prompt.clone().unwrap_or_default();
        let max_tokens = req
            .parameters
            .as_ref()
            .and_then(|p| p.max_tokens)
            .unwrap_or(4096);

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        });

        if let Some(t) = req.parameters.as_ref().and_then(|p| p.temperature) {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens").and_then(|n| n.as_u64()).map(|n| n as u32);
    let output = v.get("output_tokens").and_then(|n| n.as_u64()).map(|n| n as u32);
    let total = match (input, output) {
        (Some(i), Some(o)) => Some(i + o),
        _ => None,
    };
    Some(Usage { prompt_tokens: input, completion_tokens: output, total_tokens: total })
}

fn parse_response(body: &Value) -> Result<GenerateOutput> {
    let text = body
        .get("content")
        .and_then(|c| c.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let usage = body.get("usage").and_then(parse_usage);

    Ok(GenerateOutput { text: Some(text), artifacts: None, usage })
}

fn parse_sse_line(data: &str) -> Vec<Result<AdapterEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Internal(format!("bad SSE payload: {e}")))],
    };

    match v.get("type").and_then(|t| t.as_str()) {
        Some("content_block_delta") => {
            let text = v
                .get("delta")
                .and_then(|d| d.get("text"))
                .and_then(|t| t.as_str());
            match text {
                Some(t) if !t.is_empty() => vec![Ok(AdapterEvent::Text(t.to_string()))],
                _ => Vec::new(),
            }
        }
        Some("message_delta") => {
            let usage = v.get("usage").and_then(parse_usage);
            vec![Ok(AdapterEvent::Done(usage))]
        }
        Some("message_stop") => vec![Ok(AdapterEvent::Done(None))],
        _ => Vec::new(),
    }
}

#[async_trait::async_trait]
impl TextAdapter for AnthropicAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput> {
        let url = format!("{}/messages", self.base_url);
        let body = self.build_body(req, false);

        tracing::debug!(provider = %self.id, "anthropic generate request");

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
        let url = format!("{}/messages", self.base_url);
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
