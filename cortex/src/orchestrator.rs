//! Request orchestration: the path from a raw API request to an audited result.
//!
//! Each call runs in two phases. `prepare_*` is everything that may reject the request before a
//! provider is contacted: prompt optimization, normalization and the ownership guardrail. `run_*`
//! dispatches (smart routing, explicit single call or compare fan-out) and writes the audit unit.
//! A store failure in `run_*` fails the call, so results are never returned without their audit
//! trail. The split lets streaming handlers report rejections as plain HTTP errors and only open a
//! stream once the request is known to be dispatchable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::api::models::chat::{ChatRequest, ChatResponse};
use crate::api::models::compare::{CompareRequest, CompareResponse};
use crate::audit::{Caller, Ownership, OwnershipGuardrail, PersistenceRecorder};
use crate::compare::{FanOutCoordinator, ProgressEvent};
use crate::dispatch::dispatch_target;
use crate::errors::{Error, Result};
use crate::models::CompareAggregate;
use crate::normalizer::{CanonicalRequest, Normalizer, RequestMode};
use crate::optimizer::PromptOptimizer;
use crate::pricing::PriceTable;
use crate::providers::{ProviderRegistry, Target};
use crate::routing::RoutingEngine;
use crate::types::{ApiKeyId, GroupId, RequestId, abbrev_uuid};

/// A validated single-target request whose owner is known.
#[derive(Debug, Clone)]
pub struct PreparedChat {
    pub request_id: RequestId,
    pub request: CanonicalRequest,
    pub ownership: Ownership,
    /// Key presented by the caller, used for budget accounting
    pub api_key_id: Option<ApiKeyId>,
    pub prompt_optimized: bool,
}

/// A validated compare request whose owner is known.
#[derive(Debug, Clone)]
pub struct PreparedCompare {
    pub group_id: GroupId,
    /// One request id per target, in target order
    pub request_ids: Vec<RequestId>,
    pub request: Arc<CanonicalRequest>,
    pub targets: Vec<Target>,
    pub timeout: Duration,
    pub ownership: Ownership,
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    pricing: Arc<PriceTable>,
    normalizer: Normalizer,
    optimizer: Option<Arc<dyn PromptOptimizer>>,
    guardrail: OwnershipGuardrail,
    recorder: PersistenceRecorder,
    engine: RoutingEngine,
    fan_out: FanOutCoordinator,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("engine", &self.engine)
            .field("optimizer_enabled", &self.optimizer.is_some())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl Orchestrator {
    #[builder]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        pricing: Arc<PriceTable>,
        normalizer: Normalizer,
        optimizer: Option<Arc<dyn PromptOptimizer>>,
        guardrail: OwnershipGuardrail,
        recorder: PersistenceRecorder,
        engine: RoutingEngine,
    ) -> Self {
        let fan_out = FanOutCoordinator::new(registry.clone(), pricing.clone());
        Self {
            registry,
            pricing,
            normalizer,
            optimizer,
            guardrail,
            recorder,
            engine,
            fan_out,
        }
    }
}

impl Orchestrator {
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &RoutingEngine {
        &self.engine
    }

    async fn optimize(&self, prompt: &str) -> (String, bool) {
        match &self.optimizer {
            Some(optimizer) => {
                let optimized = optimizer.optimize(prompt).await;
                (optimized.text, optimized.was_optimized)
            }
            None => (prompt.to_string(), false),
        }
    }

    #[instrument(skip_all, err)]
    pub async fn prepare_chat(&self, mut raw: ChatRequest, caller: &Caller) -> Result<PreparedChat> {
        let (prompt, prompt_optimized) = self.optimize(&raw.prompt).await;
        raw.prompt = prompt;

        let request = self.normalizer.normalize_chat(&raw, &self.registry)?;
        let ownership = self.guardrail.resolve(caller).await?;

        Ok(PreparedChat {
            request_id: Uuid::new_v4(),
            request,
            ownership,
            api_key_id: caller.api_key_id,
            prompt_optimized,
        })
    }

    /// Dispatch a prepared single-target request and record it.
    #[instrument(skip_all, fields(request_id = %abbrev_uuid(&prepared.request_id), mode = %prepared.request.routing_mode()), err)]
    pub async fn run_chat(&self, prepared: PreparedChat) -> Result<ChatResponse> {
        let PreparedChat {
            request_id,
            request,
            ownership,
            api_key_id,
            prompt_optimized,
        } = prepared;

        let (response, trace) = match &request.mode {
            RequestMode::Smart => {
                let routed = self.engine.route(&request, api_key_id).await;
                (routed.response, Some(routed.trace))
            }
            RequestMode::Explicit(target) => (dispatch_target(&self.registry, &self.pricing, target, &request).await, None),
            RequestMode::Compare { .. } => {
                return Err(Error::Internal {
                    operation: "run_chat called with a compare request".to_string(),
                });
            }
        };

        self.recorder
            .record_single(request_id, &request, &ownership, &response, trace.as_ref())
            .await?;

        info!(
            provider = response.provider().unwrap_or("-"),
            model = response.model().unwrap_or("-"),
            success = response.is_success(),
            latency_ms = response.latency_ms,
            "Chat request completed"
        );

        Ok(ChatResponse::new(request_id, None, &response)
            .with_routing(trace.as_ref())
            .with_prompt_optimized(prompt_optimized))
    }

    pub async fn chat(&self, raw: ChatRequest, caller: &Caller) -> Result<ChatResponse> {
        let prepared = self.prepare_chat(raw, caller).await?;
        self.run_chat(prepared).await
    }

    #[instrument(skip_all, fields(targets = raw.targets.len()), err)]
    pub async fn prepare_compare(&self, mut raw: CompareRequest, caller: &Caller) -> Result<PreparedCompare> {
        let (prompt, _) = self.optimize(&raw.prompt).await;
        raw.prompt = prompt;

        let request = self.normalizer.normalize_compare(&raw, &self.registry)?;
        let RequestMode::Compare { targets, timeout } = request.mode.clone() else {
            return Err(Error::Internal {
                operation: "compare normalization produced a non-compare request".to_string(),
            });
        };
        let ownership = self.guardrail.resolve(caller).await?;

        Ok(PreparedCompare {
            group_id: Uuid::new_v4(),
            request_ids: targets.iter().map(|_| Uuid::new_v4()).collect(),
            request: Arc::new(request),
            targets,
            timeout,
            ownership,
        })
    }

    /// Fan out a prepared compare request and record every target.
    ///
    /// `progress` receives each target's response as soon as it finishes, before the audit unit is
    /// written. Consumers must hold those results until this returns `Ok`.
    #[instrument(skip_all, fields(group_id = %abbrev_uuid(&prepared.group_id)), err)]
    pub async fn run_compare(&self, prepared: PreparedCompare, progress: Option<mpsc::UnboundedSender<ProgressEvent>>) -> Result<CompareResponse> {
        let responses = self
            .fan_out
            .run(prepared.request.clone(), &prepared.targets, prepared.timeout, progress)
            .await;

        let aggregate = CompareAggregate::from_responses(&responses);
        self.recorder
            .record_compare(
                prepared.group_id,
                &prepared.request_ids,
                &prepared.request,
                &prepared.ownership,
                &responses,
                &aggregate,
            )
            .await?;

        info!(
            success_count = aggregate.success_count,
            error_count = aggregate.error_count,
            "Compare request completed"
        );

        let chat_responses = prepared
            .request_ids
            .iter()
            .zip(&responses)
            .map(|(request_id, response)| ChatResponse::new(*request_id, Some(prepared.group_id), response))
            .collect();
        Ok(CompareResponse::new(prepared.group_id, chat_responses, &aggregate))
    }

    pub async fn compare(&self, raw: CompareRequest, caller: &Caller) -> Result<CompareResponse> {
        let prepared = self.prepare_compare(raw, caller).await?;
        self.run_compare(prepared, None).await
    }
}
