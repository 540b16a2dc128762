//! API request/response models for multi-target compare.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::chat::{ChatContext, ChatResponse};
use crate::models::CompareAggregate;
use crate::types::GroupId;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TargetRequest {
    pub provider: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CompareRequest {
    #[serde(default)]
    pub prompt: String,
    /// Between 2 and 4 targets
    #[serde(default)]
    pub targets: Vec<TargetRequest>,
    /// Group timeout in seconds, `0 < timeout_s <= 300`
    pub timeout_s: Option<f64>,
    /// Only allowed with at most 2 targets
    pub context: Option<ChatContext>,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompareResponse {
    /// One response per target, in target order
    pub responses: Vec<ChatResponse>,
    pub success_count: usize,
    pub error_count: usize,
    pub total_tokens: u64,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_cost: Decimal,
    #[schema(value_type = String, format = "uuid")]
    pub request_group_id: GroupId,
}

impl CompareResponse {
    pub fn new(group_id: GroupId, responses: Vec<ChatResponse>, aggregate: &CompareAggregate) -> Self {
        Self {
            responses,
            success_count: aggregate.success_count,
            error_count: aggregate.error_count,
            total_tokens: aggregate.total_tokens,
            total_cost: aggregate.total_cost,
            request_group_id: group_id,
        }
    }
}
