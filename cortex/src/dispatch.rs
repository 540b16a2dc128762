//! Single-target dispatch.
//!
//! Every provider call made by the service goes through [`call_target`]: explicit single calls,
//! each compare target and each smart routing attempt. It applies the compatibility retry, measures
//! wall-clock latency across both legs of a retried call and records per-provider metrics.

use tokio::time::Instant;
use tracing::{Instrument, info, info_span, warn};

use crate::compat::invoke_with_compat;
use crate::models::TargetResponse;
use crate::normalizer::CanonicalRequest;
use crate::pricing::PriceTable;
use crate::providers::{Completion, ProviderError, ProviderRegistry, RegisteredProvider, Target, elapsed_ms};

/// Raw outcome of one provider call.
#[derive(Debug)]
pub struct TargetCall {
    pub result: Result<Completion, ProviderError>,
    pub latency_ms: u64,
    /// The token-limit parameter was renamed and the call repeated once
    pub adapted: bool,
}

/// Call a registered provider for `target` with the request's prompt and parameters.
pub async fn call_target(registered: &RegisteredProvider, target: &Target, request: &CanonicalRequest) -> TargetCall {
    let params = request.invoke_params(registered.token_limit_param);
    let started = Instant::now();

    let outcome = invoke_with_compat(registered.adapter.as_ref(), &request.prompt, &target.model, &params)
        .instrument(info_span!("provider_call", provider = %target.provider, model = %target.model))
        .await;
    let elapsed = started.elapsed();

    let outcome_label = match &outcome.result {
        Ok(_) => "success",
        Err(err) => err.kind.as_str(),
    };
    metrics::counter!(
        "cortex_provider_calls_total",
        "provider" => target.provider.clone(),
        "outcome" => outcome_label
    )
    .increment(1);
    metrics::histogram!("cortex_provider_latency_seconds", "provider" => target.provider.clone()).record(elapsed.as_secs_f64());

    if outcome.adapted {
        info!(provider = %target.provider, model = %target.model, adapted = true, "Provider call retried with max_completion_tokens");
    }
    if let Err(err) = &outcome.result {
        warn!(
            provider = %target.provider,
            model = %target.model,
            kind = %err.kind,
            adapted = outcome.adapted,
            "Provider call failed: {}",
            err.message
        );
    }

    TargetCall {
        result: outcome.result,
        latency_ms: elapsed_ms(elapsed),
        adapted: outcome.adapted,
    }
}

/// Dispatch to one caller-chosen target. Never fails: errors are carried in the response.
pub async fn dispatch_target(registry: &ProviderRegistry, pricing: &PriceTable, target: &Target, request: &CanonicalRequest) -> TargetResponse {
    let Some(registered) = registry.get(&target.provider) else {
        return TargetResponse::failure(Some(target.clone()), &ProviderError::unavailable(&target.provider), 0);
    };

    let call = call_target(registered, target, request).await;
    into_response(pricing, target, call)
}

/// Price a finished call and turn it into a response.
pub fn into_response(pricing: &PriceTable, target: &Target, call: TargetCall) -> TargetResponse {
    match call.result {
        Ok(mut completion) => {
            completion.latency_ms = call.latency_ms;
            let cost = pricing.cost(target, &completion.token_usage);
            TargetResponse::success(target.clone(), completion, cost)
        }
        Err(err) => TargetResponse::failure(Some(target.clone()), &err, call.latency_ms),
    }
}
