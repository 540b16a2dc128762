//! Persisted audit entities.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::errors::{Result, StoreError};
use crate::models::{AttemptOutcome, ResponseError, RoutingMode};
use crate::providers::{FinishReason, TokenUsage};
use crate::types::{ApiKeyId, DecisionId, GroupId, RequestId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RequestRecord {
    #[schema(value_type = String, format = "uuid")]
    pub id: RequestId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub group_id: Option<GroupId>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt: String,
    pub prompt_sha256: String,
    /// Conversation session named by the caller's context
    pub session_id: Option<String>,
    pub routing_mode: RoutingMode,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub api_key_id: Option<ApiKeyId>,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResponseRecord {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub group_id: Option<GroupId>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub text: Option<String>,
    pub finish_reason: FinishReason,
    pub error: Option<ResponseError>,
    pub token_usage: TokenUsage,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub estimated_cost: Decimal,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoutingDecisionRecord {
    #[schema(value_type = String, format = "uuid")]
    pub id: DecisionId,
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestId,
    pub initial_tier: String,
    pub final_tier: String,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoutingAttemptRecord {
    #[schema(value_type = String, format = "uuid")]
    pub decision_id: DecisionId,
    pub attempt_number: u32,
    pub provider: String,
    pub model: String,
    pub tier: String,
    pub outcome: AttemptOutcome,
    pub error: Option<ResponseError>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyOwnership {
    #[schema(value_type = String, format = "uuid")]
    pub api_key_id: ApiKeyId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    pub auto_registered: bool,
    pub created_at: DateTime<Utc>,
}

/// Totals of one compare call, written with the group's request rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CompareSummaryRecord {
    #[schema(value_type = String, format = "uuid")]
    pub group_id: GroupId,
    pub success_count: u32,
    pub error_count: u32,
    pub total_tokens: u64,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Routing decision with its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DecisionAudit {
    pub decision: RoutingDecisionRecord,
    pub attempts: Vec<RoutingAttemptRecord>,
}

/// One request row with everything recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub request: RequestRecord,
    pub response: ResponseRecord,
    pub decision: Option<DecisionAudit>,
}

/// Everything written for one client call, atomically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuditUnit {
    pub entries: Vec<AuditEntry>,
    /// Present for compare calls only
    pub summary: Option<CompareSummaryRecord>,
}

impl AuditUnit {
    pub fn single(entry: AuditEntry) -> Self {
        Self {
            entries: vec![entry],
            summary: None,
        }
    }

    /// Structural checks every store runs before writing.
    ///
    /// Ownership is verified separately by the store against its mapping table.
    pub fn validate(&self) -> Result<()> {
        let first = self.entries.first().ok_or_else(|| invalid("audit unit has no entries"))?;
        let group_id = first.request.group_id;

        if self.entries.len() > 1 && group_id.is_none() {
            return Err(invalid("multi-request unit without a group id"));
        }

        for entry in &self.entries {
            let request = &entry.request;
            if request.group_id != group_id {
                return Err(invalid("requests in one unit must share a group id"));
            }
            if entry.response.request_id != request.id || entry.response.group_id != request.group_id {
                return Err(invalid(format!("response does not belong to request {}", request.id)));
            }
            if let Some(decision) = &entry.decision {
                validate_decision(request.id, decision)?;
            }
        }

        if let Some(summary) = &self.summary {
            validate_summary(group_id, &self.entries, summary)?;
        }
        Ok(())
    }

    /// API key ids referenced by the unit's request rows.
    pub fn api_key_claims(&self) -> impl Iterator<Item = (ApiKeyId, UserId)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.request.api_key_id.map(|key| (key, e.request.user_id)))
    }
}

fn validate_decision(request_id: RequestId, audit: &DecisionAudit) -> Result<()> {
    let decision = &audit.decision;
    if decision.request_id != request_id {
        return Err(invalid("routing decision belongs to another request"));
    }
    if decision.attempt_count as usize != audit.attempts.len() {
        return Err(invalid(format!(
            "attempt_count {} does not match {} attempt rows",
            decision.attempt_count,
            audit.attempts.len()
        )));
    }
    for (index, attempt) in audit.attempts.iter().enumerate() {
        if attempt.decision_id != decision.id {
            return Err(invalid("attempt belongs to another decision"));
        }
        if attempt.attempt_number as usize != index + 1 {
            return Err(invalid("attempt numbers must be gapless from 1"));
        }
    }
    if decision.final_tier != decision.initial_tier {
        let failed_in_initial = audit
            .attempts
            .iter()
            .any(|a| a.tier == decision.initial_tier && a.outcome == AttemptOutcome::Failed);
        if !failed_in_initial {
            return Err(invalid("tier escalated without a failed attempt in the initial tier"));
        }
    }
    Ok(())
}

fn validate_summary(group_id: Option<GroupId>, entries: &[AuditEntry], summary: &CompareSummaryRecord) -> Result<()> {
    if group_id != Some(summary.group_id) {
        return Err(invalid("compare summary belongs to another group"));
    }
    let successes = entries.iter().filter(|e| e.response.error.is_none()).count();
    if summary.success_count as usize != successes || summary.error_count as usize != entries.len() - successes {
        return Err(invalid(format!(
            "summary counts {}/{} do not match {} recorded responses",
            summary.success_count,
            summary.error_count,
            entries.len()
        )));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::InvalidUnit { message: message.into() }
}

/// Lookup result for one request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RequestAudit {
    pub request: RequestRecord,
    pub responses: Vec<ResponseRecord>,
    pub decision: Option<DecisionAudit>,
}

/// Lookup result for one compare group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GroupAudit {
    pub summary: Option<CompareSummaryRecord>,
    /// Request rows in write order
    pub requests: Vec<RequestAudit>,
}
