//! HTTP handlers for single-prompt calls.

use axum::{Json, extract::State, response::Response};
use tracing::{Instrument, info_span};

use crate::AppState;
use crate::api::handlers::stream::ndjson_channel;
use crate::api::models::chat::{ChatRequest, ChatResponse};
use crate::api::models::stream::StreamEvent;
use crate::audit::Caller;
use crate::errors::Result;

#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    summary = "Send a prompt",
    description = "Routes the prompt to one provider. Naming a provider (and optionally a model) calls it directly; \
otherwise smart routing picks a tier and escalates on failure. Provider failures are returned in the `error` field \
with status 200.",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Normalized response, possibly carrying a provider error", body = ChatResponse),
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
pub async fn chat(State(state): State<AppState>, caller: Caller, Json(request): Json<ChatRequest>) -> Result<Json<ChatResponse>> {
    let response = state.orchestrator.chat(request, &caller).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/chat/stream",
    tag = "chat",
    summary = "Send a prompt, streaming the answer",
    description = "Same semantics as `POST /chat`, answered as newline-delimited JSON: one `line` event per line of \
response text, a `response_done` event with the full response, then `done`. Validation and ownership failures are \
plain HTTP errors; a failure after the stream opened is an `error` event followed by `done`.",
    request_body = ChatRequest,
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
pub async fn chat_stream(State(state): State<AppState>, caller: Caller, Json(request): Json<ChatRequest>) -> Result<Response> {
    let prepared = state.orchestrator.prepare_chat(request, &caller).await?;
    let (sink, response) = ndjson_channel();

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(
        async move {
            match orchestrator.run_chat(prepared).await {
                Ok(chat) => {
                    if let Some(text) = &chat.text {
                        for line in text.lines() {
                            sink.send(StreamEvent::Line { text: line.to_string() });
                        }
                    }
                    sink.send(StreamEvent::ResponseDone { response: chat });
                }
                Err(e) => sink.send(StreamEvent::Error { message: e.user_message() }),
            }
            sink.send(StreamEvent::Done { compare: None });
        }
        .instrument(info_span!("chat_stream")),
    );

    Ok(response)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    use crate::api::models::chat::ChatResponse;
    use crate::providers::{ErrorKind, ProviderError};
    use crate::test_utils::{ScriptedProvider, Step, create_test_app, create_test_config, parse_ndjson};

    #[tokio::test]
    async fn test_explicit_chat_returns_provider_answer() {
        let openai = ScriptedProvider::new("openai").then(Step::ok("Borrowing rules"));
        let (app, store) = create_test_app(create_test_config(), vec![openai.clone()]);

        let response = app
            .post("/v1/chat")
            .json(&json!({"prompt": "Explain borrowing", "provider": "openai"}))
            .await;

        response.assert_status(StatusCode::OK);
        let body: ChatResponse = response.json();
        assert_eq!(body.text.as_deref(), Some("Borrowing rules"));
        assert_eq!(body.provider.as_deref(), Some("openai"));
        assert_eq!(body.model.as_deref(), Some("openai-default"));
        assert!(body.error.is_none());
        assert!(body.routing.is_none());
        assert_eq!(openai.call_count(), 1);
        assert_eq!(store.request_count(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_is_embedded_with_status_200() {
        let openai = ScriptedProvider::new("openai").always(Step::err(ProviderError::new(ErrorKind::Auth, "invalid api key")));
        let (app, store) = create_test_app(create_test_config(), vec![openai]);

        let response = app
            .post("/v1/chat")
            .json(&json!({"prompt": "hi", "provider": "openai", "model": "gpt-4o"}))
            .await;

        response.assert_status(StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["text"], Value::Null);
        assert_eq!(body["error"]["kind"], "auth");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(store.request_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_dispatch() {
        let openai = ScriptedProvider::new("openai");
        let (app, store) = create_test_app(create_test_config(), vec![openai.clone()]);

        let empty = app.post("/v1/chat").json(&json!({"prompt": "   "})).await;
        empty.assert_status(StatusCode::BAD_REQUEST);

        let unknown = app.post("/v1/chat").json(&json!({"prompt": "hi", "provider": "nope"})).await;
        unknown.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = unknown.json();
        assert_eq!(body["error"]["code"], "validation_error");

        assert_eq!(openai.call_count(), 0);
        assert_eq!(store.request_count(), 0);
    }

    #[tokio::test]
    async fn test_chat_stream_emits_lines_then_done() {
        let openai = ScriptedProvider::new("openai").then(Step::ok("first line\nsecond line"));
        let (app, _store) = create_test_app(create_test_config(), vec![openai]);

        let response = app
            .post("/v1/chat/stream")
            .json(&json!({"prompt": "two lines please", "provider": "openai"}))
            .await;

        response.assert_status(StatusCode::OK);
        response.assert_header("content-type", "application/x-ndjson");
        let events = parse_ndjson(&response.text());
        let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["line", "line", "response_done", "done"]);
        assert_eq!(events[0]["text"], "first line");
        assert_eq!(events[2]["response"]["provider"], "openai");
    }

    #[tokio::test]
    async fn test_chat_stream_rejects_invalid_request_without_streaming() {
        let (app, _store) = create_test_app(create_test_config(), vec![ScriptedProvider::new("openai")]);

        let response = app.post("/v1/chat/stream").json(&json!({"prompt": ""})).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "validation_error");
    }
}
