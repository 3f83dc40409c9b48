//! Google Gemini text adapter, using the `generateContent` /
//! `streamGenerateContent` REST API.

use crate::traits::{AdapterEvent, TextAdapter};
use crate::util::from_reqwest;
use gwy_domain::config::llm::ProviderConfig;
use gwy_domain::error::{Error, Result};
use gwy_domain::generate::{BoxStream, GenerateOutput, GenerateRequest, Usage};
use serde_json::Value;

pub struct GoogleAdapter {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl GoogleAdapter {
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
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            default_model: "gemini-2.0-flash".to_string(),
            client,
        })
    }

    fn effective_model(&self, req: &GenerateRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    fn build_body(&self, req: &GenerateRequest) -> Value {
        let prompt = req.input.prompt.clone().unwrap_or_default();
        let mut body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
        });

        let mut generation_config = serde_json::Map::new();
        if let Some(p) = &req.parameters {
            if let Some(t) = p.temperature {
                generation_config.insert("temperature".into(), serde_json::json!(t));
            }
            if let Some(m) = p.max_tokens {
                generation_config.insert("maxOutputTokens".into(), serde_json::json!(m));
            }
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }
        body
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    let meta = v.get("usageMetadata")?;
    Some(Usage {
        prompt_tokens: meta.get("promptTokenCount").and_then(|n| n.as_u64()).map(|n| n as u32),
        completion_tokens: meta
            .get("candidatesTokenCount")
            .and_then(|n| n.as_u64())
            .map(|n| n as u32),
        total_tokens: meta.get("totalTokenCount").and_then(|n| n.as_u64()).map(|n| n as u32),
    })
}

fn extract_text(v: &Value) -> String {
    v.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn parse_response(body: &Value) -> Result<GenerateOutput> {
    Ok(GenerateOutput {
        text: Some(extract_text(body)),
        artifacts: None,
        usage: parse_usage(body),
    })
}

fn parse_sse_line(data: &str) -> Vec<Result<AdapterEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Internal(format!("bad SSE payload: {e}")))],
    };

    let text = extract_text(&v);
    let mut events = Vec::new();
    if !text.is_empty() {
        events.push(Ok(AdapterEvent::Text(text)));
    }

    let finished = v
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("finishReason"))
        .is_some();
    if finished {
        events.push(Ok(AdapterEvent::Done(parse_usage(&v))));
    }
    events
}

#[async_trait::async_trait]
impl TextAdapter for GoogleAdapter {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateOutput> {
        let model = self.effective_model(req);
        let url = self.url(&model, "generateContent");
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, "google generate request");

        let resp = self.client.post(&url).json(&body).send().await.map_err(from_reqwest)?;
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
        let url = format!("{}&alt=sse", self.url(&model, "streamGenerateContent"));
        let body = self.build_body(req);
        let provider_id = self.id.clone();

        let resp = self.client.post(&url).json(&body).send().await.map_err(from_reqwest)?;
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
