//! OpenAI-compatible chat completions (Groq by default) in JSON mode
//!
//! Models are tried in order. A rate limit, a server error or a retired model
//! moves on to the next one; anything else fails the call.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::structured::parse_object;
use super::{CompletionProvider, CompletionRequest};
use crate::config::LlmSettings;

pub struct GroqCompletion {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
    temperature: f32,
    max_tokens: u32,
}

/// What to do after one model attempt failed
#[derive(Debug, PartialEq)]
enum Fallback {
    NextModel,
    Abort,
}

impl GroqCompletion {
    pub fn new(http: reqwest::Client, api_key: String, settings: &LlmSettings) -> Self {
        Self {
            http,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            models: settings.models.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    fn body(&self, model: &str, request: &CompletionRequest) -> Value {
        json!({
            "model": model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt }
            ],
            "temperature": request.temperature.unwrap_or(self.temperature),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "response_format": { "type": "json_object" }
        })
    }
}

fn classify_failure(status: StatusCode, body: &str) -> Fallback {
    let retired = status == StatusCode::BAD_REQUEST
        && (body.contains("does not exist")
            || body.contains("decommissioned")
            || body.contains("not supported"));

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() || retired {
        Fallback::NextModel
    } else {
        Fallback::Abort
    }
}

/// Pull the assistant text out of a chat completion response
fn message_content(payload: &Value) -> Result<&str> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("completion response has no message content"))
}

#[async_trait]
impl CompletionProvider for GroqCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error = anyhow!("no completion models configured");

        for (index, model) in self.models.iter().enumerate() {
            if index > 0 {
                tracing::warn!(model = %model, "falling back to next completion model");
            }

            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&self.body(model, request))
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    last_error = anyhow!("completion request to {} failed: {}", model, e);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                last_error = anyhow!(
                    "{} returned status {}: {}",
                    model,
                    status,
                    crate::text::preview(&body, 200)
                );
                match classify_failure(status, &body) {
                    Fallback::NextModel => continue,
                    Fallback::Abort => return Err(last_error),
                }
            }

            let payload: Value = response
                .json()
                .await
                .with_context(|| format!("{} response is not JSON", model))?;
            let content = message_content(&payload)?;
            return parse_object(content);
        }

        Err(last_error)
    }
}
