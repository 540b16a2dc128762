//! Adapter for OpenAI-compatible `/chat/completions` endpoints.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use super::{
    Completion, ErrorKind, FinishReason, InvokeParams, ProviderAdapter, ProviderError, TokenUsage, elapsed_ms, resolve_secret,
};
use crate::config::ProviderConfig;

/// Calls any provider that speaks the OpenAI chat completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleAdapter {
    id: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id: id.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key.as_deref().map(resolve_secret).transpose()?;
        Self::new(config.name.clone(), config.base_url.as_str(), api_key, config.timeout)
    }

    fn build_payload(prompt: &str, model: &str, params: &InvokeParams) -> Value {
        let mut messages: Vec<Value> = params
            .history
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        messages.push(json!({ "role": "user", "content": prompt }));

        let mut payload = Map::new();
        payload.insert("model".to_string(), Value::from(model));
        payload.insert("messages".to_string(), Value::Array(messages));
        if let Some(max_tokens) = params.max_tokens {
            payload.insert(params.token_limit_param.field_name().to_string(), Value::from(max_tokens));
        }
        if let Some(temperature) = params.temperature {
            payload.insert("temperature".to_string(), json!(temperature));
        }
        Value::Object(payload)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    param: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Classify a non-success HTTP response.
fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let message = parsed
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| format!("HTTP {status}: {body}"));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::new(ErrorKind::Auth, message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::new(ErrorKind::RateLimit, message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::timeout(message),
        StatusCode::BAD_REQUEST => match parsed {
            Some(err) if is_unsupported_parameter(&err) => {
                let parameter = err.param.clone().or_else(|| quoted_parameter(&err.message)).unwrap_or_default();
                ProviderError::incompatible_parameter(parameter, err.message)
            }
            _ => ProviderError::new(ErrorKind::Upstream, message),
        },
        _ => ProviderError::new(ErrorKind::Upstream, message),
    }
}

fn is_unsupported_parameter(err: &ErrorBody) -> bool {
    matches!(err.code.as_deref(), Some("unsupported_parameter") | Some("unsupported_value"))
        || err.message.to_ascii_lowercase().contains("unsupported parameter")
}

/// Pull the first single-quoted token out of an error message, e.g. `'max_tokens'`.
fn quoted_parameter(message: &str) -> Option<String> {
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    Some(message[start..start + len].to_string())
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, prompt, params), fields(provider = %self.id), err)]
    async fn invoke(&self, prompt: &str, model: &str, params: &InvokeParams) -> Result<Completion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = Self::build_payload(prompt, model, params);

        let mut request = self.client.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::timeout(format!("request to {url} timed out"))
            } else {
                ProviderError::new(ErrorKind::Upstream, format!("request to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::timeout(format!("reading response from {url} timed out"))
            } else {
                ProviderError::new(ErrorKind::Upstream, format!("failed to read response body: {e}"))
            }
        })?;
        let latency_ms = elapsed_ms(start.elapsed());

        if !status.is_success() {
            debug!(status = status.as_u16(), "Provider returned error status");
            return Err(classify_status(status, &body));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::new(ErrorKind::MalformedResponse, format!("invalid completion body: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::new(ErrorKind::MalformedResponse, "completion has no choices"))?;

        let token_usage = parsed
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: map_finish_reason(choice.finish_reason.as_deref()),
            token_usage,
            latency_ms,
        })
    }
}
