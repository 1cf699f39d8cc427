use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use serde::Deserialize;

use super::{BackendError, CompletionBackend, CompletionRequest};

#[derive(Clone, Debug)]
pub struct OpenAiSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiBackend {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(settings: OpenAiSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: chat_completions_url(&settings.endpoint),
            api_key: settings.api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, BackendError> {
        let mut req = self.client.post(&self.url).json(&request_body(request));
        if let Some(key) = self.api_key.as_deref() {
            req = req.bearer_auth(key);
        }
        let response = req.send().map_err(classify)?;
        let status = response.status();
        let body = response.text().map_err(classify)?;
        if !status.is_success() {
            let head: String = body.chars().take(300).collect();
            return Err(BackendError::Network(format!("HTTP {status}: {head}")));
        }
        parse_reply(&body)
    }
}

fn classify(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if err.is_decode() || err.is_body() {
        BackendError::Malformed(err.to_string())
    } else {
        BackendError::Network(err.to_string())
    }
}

pub fn chat_completions_url(endpoint: &str) -> String {
    let base = endpoint.trim().trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn request_body(request: &CompletionRequest<'_>) -> serde_json::Value {
    let mut messages = Vec::new();
    if !request.system.trim().is_empty() {
        messages.push(serde_json::json!({"role": "system", "content": request.system}));
    }
    messages.push(serde_json::json!({"role": "user", "content": request.user}));
    serde_json::json!({
        "model": request.model,
        "messages": messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "stream": false,
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_reply(body: &str) -> Result<String, BackendError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Malformed(format!("invalid json: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::Malformed("no choices[0].message.content".to_string()))
}
