//! Builds audit units from finished calls and hands them to the store.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, instrument};
use uuid::Uuid;

use super::AuditStore;
use super::guardrail::Ownership;
use super::models::{
    AuditEntry, AuditUnit, CompareSummaryRecord, DecisionAudit, RequestRecord, ResponseRecord, RoutingAttemptRecord, RoutingDecisionRecord,
};
use crate::errors::Result;
use crate::models::{CompareAggregate, RoutingTrace, TargetResponse};
use crate::normalizer::CanonicalRequest;
use crate::types::{GroupId, RequestId, abbrev_uuid, prompt_sha256};

/// Tier name recorded on the one-attempt decision of each compare target.
pub const COMPARE_TIER: &str = "compare";

#[derive(Clone)]
pub struct PersistenceRecorder {
    store: Arc<dyn AuditStore>,
}

impl std::fmt::Debug for PersistenceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceRecorder").finish_non_exhaustive()
    }
}

impl PersistenceRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Record a single-target call. `trace` is present for smart requests.
    #[instrument(skip_all, fields(request_id = %abbrev_uuid(&request_id)), err)]
    pub async fn record_single(
        &self,
        request_id: RequestId,
        request: &CanonicalRequest,
        ownership: &Ownership,
        response: &TargetResponse,
        trace: Option<&RoutingTrace>,
    ) -> Result<()> {
        let unit = AuditUnit::single(build_entry(request_id, None, request, ownership, response, trace));
        self.write(&unit).await
    }

    /// Record a compare call: one request row per target, all sharing `group_id`, plus the group's
    /// totals.
    #[instrument(skip_all, fields(group_id = %abbrev_uuid(&group_id), targets = responses.len()), err)]
    pub async fn record_compare(
        &self,
        group_id: GroupId,
        request_ids: &[RequestId],
        request: &CanonicalRequest,
        ownership: &Ownership,
        responses: &[TargetResponse],
        aggregate: &CompareAggregate,
    ) -> Result<()> {
        let entries = request_ids
            .iter()
            .zip(responses)
            .map(|(request_id, response)| {
                let trace = RoutingTrace::single(COMPARE_TIER, response);
                build_entry(*request_id, Some(group_id), request, ownership, response, trace.as_ref())
            })
            .collect();
        let summary = CompareSummaryRecord {
            group_id,
            success_count: count_to_u32(aggregate.success_count),
            error_count: count_to_u32(aggregate.error_count),
            total_tokens: aggregate.total_tokens,
            total_cost: aggregate.total_cost,
            created_at: Utc::now(),
        };
        self.write(&AuditUnit {
            entries,
            summary: Some(summary),
        })
        .await
    }

    async fn write(&self, unit: &AuditUnit) -> Result<()> {
        self.store.write_unit(unit).await.map_err(|e| {
            error!("Failed to write audit unit: {e}");
            e.into()
        })
    }
}

fn count_to_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn build_entry(
    request_id: RequestId,
    group_id: Option<GroupId>,
    request: &CanonicalRequest,
    ownership: &Ownership,
    response: &TargetResponse,
    trace: Option<&RoutingTrace>,
) -> AuditEntry {
    let now = Utc::now();
    let provider = response.provider().map(str::to_string);
    let model = response.model().map(str::to_string);

    let decision = trace.map(|trace| {
        let decision_id = Uuid::new_v4();
        DecisionAudit {
            decision: RoutingDecisionRecord {
                id: decision_id,
                request_id,
                initial_tier: trace.initial_tier.clone(),
                final_tier: trace.final_tier.clone(),
                attempt_count: trace.attempt_count(),
                created_at: now,
            },
            attempts: trace
                .attempts
                .iter()
                .map(|a| RoutingAttemptRecord {
                    decision_id,
                    attempt_number: a.attempt_number,
                    provider: a.target.provider.clone(),
                    model: a.target.model.clone(),
                    tier: a.tier.clone(),
                    outcome: a.outcome,
                    error: a.error.clone(),
                    latency_ms: a.latency_ms,
                })
                .collect(),
        }
    });

    AuditEntry {
        request: RequestRecord {
            id: request_id,
            group_id,
            provider: provider.clone(),
            model: model.clone(),
            prompt: request.prompt.clone(),
            prompt_sha256: prompt_sha256(&request.prompt),
            session_id: request.session_id.clone(),
            routing_mode: request.routing_mode(),
            api_key_id: ownership.api_key_id,
            user_id: ownership.user_id,
            created_at: now,
        },
        response: ResponseRecord {
            id: Uuid::new_v4(),
            request_id,
            group_id,
            provider,
            model,
            text: response.text.clone(),
            finish_reason: response.finish_reason,
            error: response.error.clone(),
            token_usage: response.token_usage,
            estimated_cost: response.estimated_cost,
            latency_ms: response.latency_ms,
            created_at: now,
        },
        decision,
    }
}
