use std::sync::Arc;

use bon::Builder;
use tracing::{debug, info, instrument, warn};

use super::strategy::{SelectionInput, TierSelector};
use super::Tier;
use crate::dispatch::{call_target, into_response};
use crate::limits::BudgetLimiter;
use crate::models::{AttemptOutcome, AttemptTrace, ResponseError, RoutingTrace, TargetResponse};
use crate::normalizer::CanonicalRequest;
use crate::pricing::PriceTable;
use crate::providers::{ErrorKind, ProviderError, ProviderRegistry, Target};
use crate::types::ApiKeyId;

/// Tier name recorded when no tiers are configured.
const NO_TIER: &str = "none";

/// The final response of a smart request and how it was reached.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub response: TargetResponse,
    pub trace: RoutingTrace,
}

/// Tries tier candidates one at a time until one succeeds.
#[derive(Builder)]
pub struct RoutingEngine {
    registry: Arc<ProviderRegistry>,
    tiers: Vec<Tier>,
    selector: Arc<dyn TierSelector>,
    budget: Arc<BudgetLimiter>,
    pricing: Arc<PriceTable>,
    max_tokens_cap: u32,
}

impl std::fmt::Debug for RoutingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingEngine")
            .field("tiers", &self.tiers)
            .field("max_tokens_cap", &self.max_tokens_cap)
            .finish_non_exhaustive()
    }
}

impl RoutingEngine {
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Route a smart request.
    ///
    /// Candidates are tried strictly sequentially: never two in flight for one decision. Within
    /// the starting tier candidates go in configured order; only after all of them failed does
    /// routing escalate to the next tier. The returned trace holds every attempt, numbered from 1
    /// without gaps. When every candidate failed the response is an `exhausted_routing` error that
    /// carries the last attempt's message.
    #[instrument(skip_all, fields(api_key_id = ?api_key_id.map(|id| crate::types::abbrev_uuid(&id))))]
    pub async fn route(&self, request: &CanonicalRequest, api_key_id: Option<ApiKeyId>) -> RoutedResponse {
        if self.tiers.is_empty() {
            warn!("Smart routing requested with no tiers configured");
            return exhausted(NO_TIER, NO_TIER, Vec::new(), None);
        }

        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens_cap);
        let initial = self
            .selector
            .select(&SelectionInput {
                prompt: &request.prompt,
                max_cost: request.max_cost,
                max_tokens,
                tiers: &self.tiers,
            })
            .min(self.tiers.len() - 1);
        let prompt_chars = request.prompt.chars().count() + request.history.iter().map(|m| m.content.chars().count()).sum::<usize>();

        debug!(initial_tier = %self.tiers[initial].name, "Selected initial tier");

        let mut attempts: Vec<AttemptTrace> = Vec::new();
        let mut last_error: Option<ProviderError> = None;

        for (tier_index, tier) in self.tiers.iter().enumerate().skip(initial) {
            if tier_index > initial {
                info!(from = %self.tiers[tier_index - 1].name, to = %tier.name, "Escalating to next tier");
                metrics::counter!("cortex_routing_escalations_total", "tier" => tier.name.clone()).increment(1);
            }

            for candidate in &tier.candidates {
                let attempt_number = u32::try_from(attempts.len() + 1).unwrap_or(u32::MAX);

                let Some(registered) = self.registry.get(&candidate.provider) else {
                    let err = ProviderError::unavailable(&candidate.provider);
                    attempts.push(failed_attempt(attempt_number, candidate.clone(), &tier.name, &err, 0));
                    last_error = Some(err);
                    continue;
                };

                let estimate = self.pricing.estimate(candidate, prompt_chars, max_tokens);
                let reservation = match self.budget.reserve(api_key_id, estimate) {
                    Ok(reservation) => reservation,
                    Err(exceeded) => {
                        debug!(candidate = %candidate, reason = %exceeded.reason, "Budget refused candidate");
                        let err = ProviderError::new(ErrorKind::BudgetExceeded, exceeded.reason);
                        attempts.push(failed_attempt(attempt_number, candidate.clone(), &tier.name, &err, 0));
                        last_error = Some(err);
                        continue;
                    }
                };

                let call = call_target(registered, candidate, request).await;
                let response = into_response(&self.pricing, candidate, call);
                self.budget.settle(reservation, response.estimated_cost);

                match &response.error {
                    None => {
                        attempts.push(AttemptTrace {
                            attempt_number,
                            target: candidate.clone(),
                            tier: tier.name.clone(),
                            outcome: AttemptOutcome::Success,
                            error: None,
                            latency_ms: response.latency_ms,
                        });
                        return RoutedResponse {
                            response,
                            trace: RoutingTrace {
                                initial_tier: self.tiers[initial].name.clone(),
                                final_tier: tier.name.clone(),
                                attempts,
                            },
                        };
                    }
                    Some(error) => {
                        attempts.push(AttemptTrace {
                            attempt_number,
                            target: candidate.clone(),
                            tier: tier.name.clone(),
                            outcome: AttemptOutcome::Failed,
                            error: Some(error.clone()),
                            latency_ms: response.latency_ms,
                        });
                        last_error = Some(ProviderError::new(error.kind, error.message.clone()));
                    }
                }
            }
        }

        let final_tier = attempts
            .last()
            .map(|a| a.tier.clone())
            .unwrap_or_else(|| self.tiers[initial].name.clone());
        warn!(attempts = attempts.len(), "All routing candidates failed");
        exhausted(&self.tiers[initial].name, &final_tier, attempts, last_error)
    }
}

fn failed_attempt(attempt_number: u32, target: Target, tier: &str, err: &ProviderError, latency_ms: u64) -> AttemptTrace {
    AttemptTrace {
        attempt_number,
        target,
        tier: tier.to_string(),
        outcome: AttemptOutcome::Failed,
        error: Some(ResponseError::from(err)),
        latency_ms,
    }
}

fn exhausted(initial_tier: &str, final_tier: &str, attempts: Vec<AttemptTrace>, last_error: Option<ProviderError>) -> RoutedResponse {
    let message = match &last_error {
        Some(err) => format!("all {} routing attempts failed; last error ({}): {}", attempts.len(), err.kind, err.message),
        None => "no routing candidates available".to_string(),
    };
    let error = ProviderError::new(ErrorKind::ExhaustedRouting, message);
    let latency_ms = attempts.iter().map(|a| a.latency_ms).sum();
    let response = TargetResponse::failure(attempts.last().map(|a| a.target.clone()), &error, latency_ms);

    RoutedResponse {
        response,
        trace: RoutingTrace {
            initial_tier: initial_tier.to_string(),
            final_tier: final_tier.to_string(),
            attempts,
        },
    }
}
