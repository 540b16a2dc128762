//! Concurrent fan-out for compare calls.
//!
//! Each target is dispatched on its own task and all tasks share one deadline. A target that has
//! not answered by the deadline is aborted and reported as a timeout; a target whose task panics is
//! reported as an internal error. Neither affects the other targets. Results come back in the
//! caller's target order regardless of completion order, and every target yields exactly one
//! response.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::dispatch::dispatch_target;
use crate::models::TargetResponse;
use crate::normalizer::CanonicalRequest;
use crate::pricing::PriceTable;
use crate::providers::{ErrorKind, ProviderError, ProviderRegistry, Target, elapsed_ms};

/// A finished target, sent as soon as it completes. The index is the target's position.
pub type ProgressEvent = (usize, TargetResponse);

#[derive(Debug, Clone)]
pub struct FanOutCoordinator {
    registry: Arc<ProviderRegistry>,
    pricing: Arc<PriceTable>,
}

impl FanOutCoordinator {
    pub fn new(registry: Arc<ProviderRegistry>, pricing: Arc<PriceTable>) -> Self {
        Self { registry, pricing }
    }

    /// Dispatch every target concurrently and wait for all of them or the shared deadline.
    ///
    /// When `progress` is given, each response is also sent there the moment it is known, in
    /// completion order. A closed receiver does not affect the run.
    pub async fn run(
        &self,
        request: Arc<CanonicalRequest>,
        targets: &[Target],
        timeout: Duration,
        progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Vec<TargetResponse> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut slots: Vec<Option<TargetResponse>> = vec![None; targets.len()];
        let mut pending = FuturesUnordered::new();

        for (index, target) in targets.iter().enumerate() {
            let registry = self.registry.clone();
            let pricing = self.pricing.clone();
            let request = request.clone();
            let task_target = target.clone();
            let span = info_span!("compare_target", index, provider = %target.provider, model = %target.model);

            let handle = tokio::spawn(
                async move { dispatch_target(&registry, &pricing, &task_target, &request).await }.instrument(span),
            );
            let abort = handle.abort_handle();
            let target = target.clone();
            pending.push(async move { (index, target, abort, tokio::time::timeout_at(deadline, handle).await) });
        }

        while let Some((index, target, abort, outcome)) = pending.next().await {
            let response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(join_error)) => {
                    error!(%target, "Compare target task failed: {join_error}");
                    let err = ProviderError::new(ErrorKind::Internal, "target task failed unexpectedly");
                    TargetResponse::failure(Some(target), &err, elapsed_ms(started.elapsed()))
                }
                Err(_) => {
                    abort.abort();
                    warn!(%target, timeout_ms = elapsed_ms(timeout), "Compare target timed out");
                    let err = ProviderError::timeout(format!("no response within {:.1}s", timeout.as_secs_f64()));
                    TargetResponse::failure(Some(target), &err, elapsed_ms(timeout))
                }
            };

            let outcome_label = match &response.error {
                None => "success",
                Some(e) => e.kind.as_str(),
            };
            metrics::counter!("cortex_compare_targets_total", "outcome" => outcome_label).increment(1);

            if let Some(tx) = &progress
                && tx.send((index, response.clone())).is_err()
            {
                debug!(index, "Progress receiver dropped");
            }
            slots[index] = Some(response);
        }

        slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    TargetResponse::failure(
                        Some(target.clone()),
                        &ProviderError::new(ErrorKind::Internal, "target produced no result"),
                        0,
                    )
                })
            })
            .collect()
    }
}
