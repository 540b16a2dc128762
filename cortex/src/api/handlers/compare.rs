//! HTTP handlers for multi-target compare.

use axum::{Json, extract::State, response::Response};
use tokio::sync::mpsc;
use tracing::{Instrument, info_span, warn};

use crate::AppState;
use crate::api::handlers::stream::ndjson_channel;
use crate::api::models::chat::ChatResponse;
use crate::api::models::compare::{CompareRequest, CompareResponse};
use crate::api::models::stream::StreamEvent;
use crate::audit::Caller;
use crate::compare::ProgressEvent;
use crate::errors::Result;

#[utoipa::path(
    post,
    path = "/compare",
    tag = "compare",
    summary = "Compare providers",
    description = "Sends one prompt to 2-4 targets concurrently. Responses come back in target order; a target that \
fails or exceeds the group timeout carries an error without affecting the others.",
    request_body = CompareRequest,
    responses(
        (status = 200, description = "Per-target responses and aggregate counts", body = CompareResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Malformed credentials"),
        (status = 403, description = "Ownership guardrail rejected the caller"),
        (status = 500, description = "Audit trail could not be recorded")
    ),
    security(
        (),
        ("BearerAuth" = []),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn compare(State(state): State<AppState>, caller: Caller, Json(request): Json<CompareRequest>) -> Result<Json<CompareResponse>> {
    let response = state.orchestrator.compare(request, &caller).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/compare/stream",
    tag = "compare",
    summary = "Compare providers, streaming results",
    description = "Same semantics as `POST /compare`, answered as newline-delimited JSON: once the audit trail is \
recorded, a `response_done` event per target in completion order, then `done` carrying the aggregate. If recording \
fails the stream carries only `error` and `done`.",
    request_body = CompareRequest,
    responses(
        (status = 200, description = "NDJSON event stream", body = StreamEvent, content_type = "application/x-ndjson"),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Malformed credentials"),
        (status = 403, description = "Ownership guardrail rejected the caller")
    ),
    security(
        (),
        ("BearerAuth" = []),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn compare_stream(State(state): State<AppState>, caller: Caller, Json(request): Json<CompareRequest>) -> Result<Response> {
    let prepared = state.orchestrator.prepare_compare(request, &caller).await?;
    let (sink, response) = ndjson_channel();

    let group_id = prepared.group_id;
    let request_ids = prepared.request_ids.clone();
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();

    // Per-target results are held until the audit unit commits, then released in completion order
    let collector = tokio::spawn(async move {
        let mut finished = Vec::new();
        while let Some((index, target_response)) = progress_rx.recv().await {
            let Some(request_id) = request_ids.get(index) else {
                warn!(index, "Progress event for unknown target index");
                continue;
            };
            finished.push(StreamEvent::ResponseDone {
                response: ChatResponse::new(*request_id, Some(group_id), &target_response),
            });
        }
        finished
    });

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(
        async move {
            let result = orchestrator.run_compare(prepared, Some(progress_tx)).await;
            // The progress sender is dropped once the fan-out returns, so this drains and ends
            let finished = collector.await.unwrap_or_default();
            match result {
                Ok(compare) => {
                    for event in finished {
                        sink.send(event);
                    }
                    sink.send(StreamEvent::Done { compare: Some(compare) });
                }
                Err(e) => {
                    sink.send(StreamEvent::Error { message: e.user_message() });
                    sink.send(StreamEvent::Done { compare: None });
                }
            }
        }
        .instrument(info_span!("compare_stream")),
    );

    Ok(response)
}
