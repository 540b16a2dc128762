//! API request/response models for single-prompt chat.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{ResponseError, RoutingTrace, TargetResponse};
use crate::providers::{FinishReason, TokenUsage};
use crate::types::{GroupId, RequestId};

/// One prior conversation turn as sent by the client.
///
/// `role` is kept as a string here so an unknown role is reported as a validation error.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatContext {
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

impl ChatContext {
    /// A context without history or session id is treated as no context at all.
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.conversation_history.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RoutingConstraints {
    /// Upper bound on the estimated cost of the call
    #[serde(default, with = "rust_decimal::serde::float_option")]
    #[schema(value_type = Option<f64>)]
    pub max_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ChatRequest {
    #[serde(default)]
    pub prompt: String,
    /// Provider id; when absent the request is routed automatically
    pub provider: Option<String>,
    /// Model; defaults to the provider's configured default model
    pub model: Option<String>,
    /// `smart` or `explicit`
    pub routing_mode: Option<String>,
    pub context: Option<ChatContext>,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub routing_constraints: Option<RoutingConstraints>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoutingSummary {
    pub initial_tier: String,
    pub final_tier: String,
    pub attempt_count: u32,
}

impl From<&RoutingTrace> for RoutingSummary {
    fn from(trace: &RoutingTrace) -> Self {
        Self {
            initial_tier: trace.initial_tier.clone(),
            final_tier: trace.final_tier.clone(),
            attempt_count: trace.attempt_count(),
        }
    }
}

/// Normalized result for one target.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub latency_ms: u64,
    pub token_usage: TokenUsage,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub estimated_cost: Decimal,
    pub finish_reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub request_group_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingSummary>,
    /// Whether the prompt optimizer rewrote the prompt before dispatch
    #[serde(default)]
    pub prompt_optimized: bool,
}

impl ChatResponse {
    pub fn new(request_id: RequestId, group_id: Option<GroupId>, response: &TargetResponse) -> Self {
        Self {
            text: response.text.clone(),
            provider: response.provider().map(str::to_string),
            model: response.model().map(str::to_string),
            latency_ms: response.latency_ms,
            token_usage: response.token_usage,
            estimated_cost: response.estimated_cost,
            finish_reason: response.finish_reason,
            error: response.error.clone(),
            request_id,
            request_group_id: group_id,
            routing: None,
            prompt_optimized: false,
        }
    }

    pub fn with_routing(mut self, trace: Option<&RoutingTrace>) -> Self {
        self.routing = trace.map(RoutingSummary::from);
        self
    }

    pub fn with_prompt_optimized(mut self, optimized: bool) -> Self {
        self.prompt_optimized = optimized;
        self
    }
}
