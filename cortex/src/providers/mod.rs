//! Provider adapters and the registry that selects them.
//!
//! Every LLM provider is reached through the [`ProviderAdapter`] trait. The engine never talks to a
//! provider directly: it looks adapters up in a [`ProviderRegistry`] keyed by provider id and hands
//! them a prompt, a model and [`InvokeParams`]. Adapters report failures as a [`ProviderError`]
//! classified by [`ErrorKind`], which the routing engine and the compare coordinator absorb into
//! response data instead of failing the call.
//!
//! The only built-in adapter is [`openai::OpenAiCompatibleAdapter`], which covers every provider
//! exposing an OpenAI-style `/chat/completions` endpoint (OpenAI itself, DeepSeek, xAI Grok).

pub mod openai;

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

use crate::config::{ProviderConfig, ProviderKind};

/// Classification of a provider-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Auth,
    RateLimit,
    IncompatibleParameter,
    MalformedResponse,
    Upstream,
    ProviderUnavailable,
    BudgetExceeded,
    ExhaustedRouting,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::IncompatibleParameter => "incompatible_parameter",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Upstream => "upstream",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::ExhaustedRouting => "exhausted_routing",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether the same call could succeed if the client tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Upstream | ErrorKind::BudgetExceeded | ErrorKind::ExhaustedRouting
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "timeout" => ErrorKind::Timeout,
            "auth" => ErrorKind::Auth,
            "rate_limit" => ErrorKind::RateLimit,
            "incompatible_parameter" => ErrorKind::IncompatibleParameter,
            "malformed_response" => ErrorKind::MalformedResponse,
            "upstream" => ErrorKind::Upstream,
            "provider_unavailable" => ErrorKind::ProviderUnavailable,
            "budget_exceeded" => ErrorKind::BudgetExceeded,
            "exhausted_routing" => ErrorKind::ExhaustedRouting,
            "internal" => ErrorKind::Internal,
            other => return Err(format!("unknown error kind '{other}'")),
        })
    }
}

/// A classified failure reported by a provider adapter.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offending request parameter, set for [`ErrorKind::IncompatibleParameter`]
    pub parameter: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            parameter: None,
        }
    }

    pub fn incompatible_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::IncompatibleParameter,
            message: message.into(),
            parameter: Some(parameter.into()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn unavailable(provider: &str) -> Self {
        Self::new(ErrorKind::ProviderUnavailable, format!("provider '{provider}' is not registered"))
    }
}

/// Conversation role of a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid role '{other}', expected one of user, assistant, system")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

/// Name under which the output token limit is sent to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenLimitParam {
    /// `max_tokens`, accepted by most OpenAI-compatible endpoints
    #[default]
    MaxTokens,
    /// `max_completion_tokens`, required by newer OpenAI reasoning models
    MaxCompletionTokens,
}

impl TokenLimitParam {
    pub fn field_name(&self) -> &'static str {
        match self {
            TokenLimitParam::MaxTokens => "max_tokens",
            TokenLimitParam::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeParams {
    pub history: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub token_limit_param: TokenLimitParam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
    Timeout,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Error => "error",
            FinishReason::Timeout => "timeout",
        }
    }
}

impl FromStr for FinishReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "error" => FinishReason::Error,
            "timeout" => FinishReason::Timeout,
            other => return Err(format!("unknown finish reason '{other}'")),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A concrete `(provider, model)` pair a call can be dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Target {
    pub provider: String,
    pub model: String,
}

impl Target {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Successful provider output.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
}

/// Uniform capability every provider integration implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider id this adapter is registered under
    fn id(&self) -> &str;

    async fn invoke(&self, prompt: &str, model: &str, params: &InvokeParams) -> Result<Completion, ProviderError>;
}

/// A registered provider together with its call settings.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub default_model: String,
    /// Token limit style sent on the first call to this provider
    pub token_limit_param: TokenLimitParam,
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("id", &self.adapter.id())
            .field("default_model", &self.default_model)
            .field("token_limit_param", &self.token_limit_param)
            .finish()
    }
}

/// Lookup of provider adapters by provider id.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configured provider.
    pub fn from_config(providers: &[ProviderConfig]) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        for provider in providers {
            let adapter: Arc<dyn ProviderAdapter> = match provider.kind {
                ProviderKind::OpenaiCompatible => Arc::new(openai::OpenAiCompatibleAdapter::from_config(provider)?),
            };
            let token_limit_param = if provider.legacy_max_tokens {
                TokenLimitParam::MaxTokens
            } else {
                TokenLimitParam::MaxCompletionTokens
            };
            info!(provider = %provider.name, base_url = %provider.base_url, "Registered provider");
            registry.register_with(adapter, provider.default_model.clone(), token_limit_param);
        }
        Ok(registry)
    }

    /// Register an adapter that starts with the legacy token-limit name.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>, default_model: impl Into<String>) {
        self.register_with(adapter, default_model.into(), TokenLimitParam::MaxTokens);
    }

    pub fn register_with(&mut self, adapter: Arc<dyn ProviderAdapter>, default_model: String, token_limit_param: TokenLimitParam) {
        self.providers.insert(
            adapter.id().to_string(),
            RegisteredProvider {
                adapter,
                default_model,
                token_limit_param,
            },
        );
    }

    pub fn get(&self, provider: &str) -> Option<&RegisteredProvider> {
        self.providers.get(provider)
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    /// Registered provider ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisteredProvider)> {
        self.providers.iter().map(|(id, p)| (id.as_str(), p))
    }
}

/// Resolve an `env:VAR` indirection for secrets in configuration.
pub(crate) fn resolve_secret(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var).map_err(|_| anyhow::anyhow!("environment variable {var} is not set")),
        None => Ok(value.to_string()),
    }
}

/// Elapsed milliseconds, saturating.
pub(crate) fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
