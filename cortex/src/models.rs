//! Domain results shared by the routing engine, the compare coordinator and the audit recorder.

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::providers::{Completion, ErrorKind, FinishReason, ProviderError, Target, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    Smart,
    Explicit,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Smart => "smart",
            RoutingMode::Explicit => "explicit",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smart" => Ok(RoutingMode::Smart),
            "explicit" => Ok(RoutingMode::Explicit),
            other => Err(format!("invalid routing_mode '{other}', expected 'smart' or 'explicit'")),
        }
    }
}

/// Error carried inside a response or attempt rather than failing the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResponseError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&ProviderError> for ResponseError {
    fn from(err: &ProviderError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            retryable: err.kind.is_retryable(),
        }
    }
}

/// The outcome for one attempted target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetResponse {
    /// Unset only when smart routing had no candidate to try
    pub target: Option<Target>,
    pub text: Option<String>,
    pub finish_reason: FinishReason,
    pub error: Option<ResponseError>,
    pub token_usage: TokenUsage,
    pub estimated_cost: Decimal,
    pub latency_ms: u64,
}

impl TargetResponse {
    pub fn success(target: Target, completion: Completion, estimated_cost: Decimal) -> Self {
        Self {
            target: Some(target),
            text: Some(completion.text),
            finish_reason: completion.finish_reason,
            error: None,
            token_usage: completion.token_usage,
            estimated_cost,
            latency_ms: completion.latency_ms,
        }
    }

    pub fn failure(target: Option<Target>, err: &ProviderError, latency_ms: u64) -> Self {
        let finish_reason = if err.kind == ErrorKind::Timeout {
            FinishReason::Timeout
        } else {
            FinishReason::Error
        };
        Self {
            target,
            text: None,
            finish_reason,
            error: Some(ResponseError::from(err)),
            token_usage: TokenUsage::default(),
            estimated_cost: Decimal::ZERO,
            latency_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn provider(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.provider.as_str())
    }

    pub fn model(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.model.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failed => "failed",
        }
    }
}

impl FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptOutcome::Success),
            "failed" => Ok(AttemptOutcome::Failed),
            other => Err(format!("unknown attempt outcome '{other}'")),
        }
    }
}

/// One candidate tried while routing.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptTrace {
    pub attempt_number: u32,
    pub target: Target,
    pub tier: String,
    pub outcome: AttemptOutcome,
    pub error: Option<ResponseError>,
    pub latency_ms: u64,
}

/// How a routed response was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTrace {
    pub initial_tier: String,
    pub final_tier: String,
    pub attempts: Vec<AttemptTrace>,
}

impl RoutingTrace {
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Single-attempt trace used for each compare target.
    pub fn single(tier: &str, response: &TargetResponse) -> Option<Self> {
        let target = response.target.clone()?;
        Some(Self {
            initial_tier: tier.to_string(),
            final_tier: tier.to_string(),
            attempts: vec![AttemptTrace {
                attempt_number: 1,
                target,
                tier: tier.to_string(),
                outcome: if response.is_success() {
                    AttemptOutcome::Success
                } else {
                    AttemptOutcome::Failed
                },
                error: response.error.clone(),
                latency_ms: response.latency_ms,
            }],
        })
    }
}

/// Totals over the responses of one compare call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareAggregate {
    pub success_count: usize,
    pub error_count: usize,
    pub total_tokens: u64,
    pub total_cost: Decimal,
}

impl CompareAggregate {
    pub fn from_responses(responses: &[TargetResponse]) -> Self {
        let success_count = responses.iter().filter(|r| r.is_success()).count();
        Self {
            success_count,
            error_count: responses.len() - success_count,
            total_tokens: responses.iter().map(|r| u64::from(r.token_usage.total_tokens)).sum(),
            total_cost: responses.iter().map(|r| r.estimated_cost).sum(),
        }
    }
}
