//! End-to-end tests through the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::models::chat::ChatResponse;
use crate::api::models::compare::CompareResponse;
use crate::audit::models::ApiKeyOwnership;
use crate::audit::{AuditStore, InMemoryAuditStore};
use crate::config::{Config, ProviderConfig};
use crate::models::AttemptOutcome;
use crate::pricing::ModelPricing;
use crate::providers::{ErrorKind, ProviderError, Target};
use crate::routing::Tier;
use crate::test_utils::{ScriptedProvider, Step, create_test_app, create_test_config};
use crate::types::api_key_id;

fn tiered_config() -> Config {
    let mut config = create_test_config();
    config.routing.tiers = vec![
        Tier::new(
            "cheap",
            vec![Target::new("deepseek", "deepseek-chat"), Target::new("grok", "grok-mini")],
        ),
        Tier::new("strong", vec![Target::new("openai", "gpt-4o")]),
    ];
    config
}

fn tiered_providers() -> (ScriptedProvider, ScriptedProvider, ScriptedProvider) {
    (
        ScriptedProvider::new("deepseek"),
        ScriptedProvider::new("grok"),
        ScriptedProvider::new("openai"),
    )
}

async fn map_key(store: &InMemoryAuditStore, secret: &str, user: Uuid) {
    store
        .register_owner(&ApiKeyOwnership {
            api_key_id: api_key_id(secret),
            user_id: user,
            auto_registered: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn test_smart_request_answered_by_first_candidate() {
    let (deepseek, grok, openai) = tiered_providers();
    let (app, store) = create_test_app(tiered_config(), vec![deepseek.clone(), grok.clone(), openai.clone()]);

    let response = app
        .post("/v1/chat")
        .json(&json!({"prompt": "What is 2+2?", "routing_mode": "smart"}))
        .await;

    response.assert_status(StatusCode::OK);
    let body: ChatResponse = response.json();
    assert!(body.error.is_none());
    assert_eq!(body.provider.as_deref(), Some("deepseek"));
    let routing = body.routing.unwrap();
    assert_eq!(routing.initial_tier, "cheap");
    assert_eq!(routing.final_tier, routing.initial_tier);
    assert_eq!(routing.attempt_count, 1);

    let audit = store.get_request(body.request_id).await.unwrap().unwrap();
    assert_eq!(audit.responses.len(), 1);
    assert!(audit.responses[0].error.is_none());
    assert_eq!(audit.decision.unwrap().attempts.len(), 1);
    assert_eq!((grok.call_count(), openai.call_count()), (0, 0));
}

#[tokio::test]
async fn test_smart_request_escalates_after_tier_exhausted() {
    let (deepseek, grok, openai) = tiered_providers();
    let deepseek = deepseek.then(Step::err(ProviderError::new(ErrorKind::Upstream, "502 bad gateway")));
    let grok = grok.then(Step::err(ProviderError::timeout("no answer")));
    let openai = openai.then(Step::ok("four"));
    let (app, store) = create_test_app(tiered_config(), vec![deepseek, grok, openai]);

    let body: ChatResponse = app.post("/v1/chat").json(&json!({"prompt": "What is 2+2?"})).await.json();

    assert_eq!(body.text.as_deref(), Some("four"));
    let routing = body.routing.unwrap();
    assert_eq!((routing.initial_tier.as_str(), routing.final_tier.as_str()), ("cheap", "strong"));
    assert_eq!(routing.attempt_count, 3);

    let decision = store.get_request(body.request_id).await.unwrap().unwrap().decision.unwrap();
    let numbers: Vec<u32> = decision.attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let outcomes: Vec<AttemptOutcome> = decision.attempts.iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![AttemptOutcome::Failed, AttemptOutcome::Failed, AttemptOutcome::Success]);
    assert_eq!(decision.attempts[1].error.as_ref().unwrap().kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn test_smart_request_exhausted_returns_error_in_body() {
    let failing = Step::err(ProviderError::new(ErrorKind::Auth, "revoked key"));
    let (deepseek, grok, openai) = tiered_providers();
    let (app, store) = create_test_app(
        tiered_config(),
        vec![
            deepseek.always(failing.clone()),
            grok.always(failing.clone()),
            openai.always(failing),
        ],
    );

    let response = app.post("/v1/chat").json(&json!({"prompt": "What is 2+2?"})).await;

    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["text"], Value::Null);
    assert_eq!(body["error"]["kind"], "exhausted_routing");
    assert!(body["error"]["message"].as_str().unwrap().contains("revoked key"));
    assert_eq!(body["routing"]["attempt_count"], 3);
    assert_eq!(store.request_count(), 1);
    assert_eq!(store.attempt_count(), 3);
}

#[tokio::test]
async fn test_compare_with_auth_failure_on_one_target() {
    let x = ScriptedProvider::new("openai").always(Step::err(ProviderError::new(ErrorKind::Auth, "invalid api key")));
    let y = ScriptedProvider::new("grok").then(Step::ok_with_usage("populated", 12, 30));
    let mut config = create_test_config();
    config.providers = vec![ProviderConfig {
        name: "grok".to_string(),
        kind: Default::default(),
        base_url: "https://api.x.ai/v1".parse().unwrap(),
        api_key: None,
        default_model: "grok-2".to_string(),
        timeout: Duration::from_secs(30),
        legacy_max_tokens: true,
        pricing: [(
            "grok-2".to_string(),
            ModelPricing {
                input_per_1k: Decimal::new(2, 3),
                output_per_1k: Decimal::new(10, 3),
            },
        )]
        .into(),
    }];
    let (app, _store) = create_test_app(config, vec![x, y]);

    let body: CompareResponse = app
        .post("/v1/compare")
        .json(&json!({
            "prompt": "Compare these",
            "targets": [{"provider": "openai", "model": "gpt-4o"}, {"provider": "grok", "model": "grok-2"}]
        }))
        .await
        .json();

    assert_eq!((body.success_count, body.error_count), (1, 1));
    let failed = &body.responses[0];
    assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::Auth);
    assert!(failed.text.is_none());
    let ok = &body.responses[1];
    assert_eq!(ok.text.as_deref(), Some("populated"));
    assert_eq!(ok.token_usage.total_tokens, 42);
    assert!(ok.estimated_cost > Decimal::ZERO);
    assert_eq!(body.total_cost, ok.estimated_cost);
}

#[tokio::test]
async fn test_compare_timeout_keeps_completed_results() {
    let fast = ScriptedProvider::new("openai").then(Step::ok("in time"));
    let also_fast = ScriptedProvider::new("grok").then(Step::ok("also in time").after(Duration::from_millis(50)));
    let stuck = ScriptedProvider::new("deepseek").then(Step::Hang);
    let (app, store) = create_test_app(create_test_config(), vec![fast, also_fast, stuck]);

    let body: CompareResponse = app
        .post("/v1/compare")
        .json(&json!({
            "prompt": "race",
            "targets": [{"provider": "openai"}, {"provider": "deepseek"}, {"provider": "grok"}],
            "timeout_s": 1
        }))
        .await
        .json();

    assert_eq!(body.responses[0].text.as_deref(), Some("in time"));
    assert_eq!(body.responses[1].error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert_eq!(body.responses[2].text.as_deref(), Some("also in time"));
    assert_eq!((body.success_count, body.error_count), (2, 1));
    assert_eq!(store.get_group(body.request_group_id).await.unwrap().unwrap().requests.len(), 3);
}

#[tokio::test]
async fn test_unmapped_key_rejected_before_any_provider_call() {
    let openai = ScriptedProvider::new("openai");
    let (app, store) = create_test_app(create_test_config(), vec![openai.clone()]);

    let response = app
        .post("/v1/chat")
        .authorization_bearer("sk-unknown")
        .json(&json!({"prompt": "hello", "provider": "openai"}))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "ownership_guardrail");
    assert_eq!(openai.call_count(), 0);
    assert_eq!(store.request_count(), 0);
}

#[tokio::test]
async fn test_unmapped_key_auto_registered_when_enabled() {
    let mut config = create_test_config();
    config.ownership.auto_register = true;
    let service_user = config.ownership.service_user_id;
    let (app, store) = create_test_app(config, vec![ScriptedProvider::new("openai")]);

    let body: ChatResponse = app
        .post("/v1/chat")
        .authorization_bearer("sk-new")
        .json(&json!({"prompt": "hello", "provider": "openai"}))
        .await
        .json();

    let audit = store.get_request(body.request_id).await.unwrap().unwrap();
    assert_eq!(audit.request.user_id, service_user);
    assert_eq!(audit.request.api_key_id, Some(api_key_id("sk-new")));
    let mapping = store.find_owner(api_key_id("sk-new")).await.unwrap().unwrap();
    assert!(mapping.auto_registered);
}

#[tokio::test]
async fn test_mapped_key_records_owner_and_rejects_other_user() {
    let (app, store) = create_test_app(create_test_config(), vec![ScriptedProvider::new("openai")]);
    let owner = Uuid::new_v4();
    map_key(&store, "sk-owned", owner).await;

    let body: ChatResponse = app
        .post("/v1/chat")
        .authorization_bearer("sk-owned")
        .json(&json!({"prompt": "mine", "provider": "openai"}))
        .await
        .json();
    let audit = store.get_request(body.request_id).await.unwrap().unwrap();
    assert_eq!(audit.request.user_id, owner);

    let impostor = app
        .post("/v1/chat")
        .authorization_bearer("sk-owned")
        .add_header("x-cortex-user", Uuid::new_v4().to_string())
        .json(&json!({"prompt": "not mine", "provider": "openai"}))
        .await;
    impostor.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(store.request_count(), 1);
}

#[tokio::test]
async fn test_malformed_authorization_rejected() {
    let (app, _store) = create_test_app(create_test_config(), vec![ScriptedProvider::new("openai")]);

    let response = app
        .post("/v1/chat")
        .add_header("authorization", "Token abc")
        .json(&json!({"prompt": "hi", "provider": "openai"}))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_max_tokens_clamped_before_dispatch() {
    let openai = ScriptedProvider::new("openai");
    let mut config = create_test_config();
    config.limits.max_tokens_cap = 256;
    let (app, _store) = create_test_app(config, vec![openai.clone()]);

    app.post("/v1/chat")
        .json(&json!({"prompt": "long answer", "provider": "openai", "max_tokens": 100000}))
        .await
        .assert_status(StatusCode::OK);

    assert_eq!(openai.calls()[0].params.max_tokens, Some(256));
}

#[tokio::test]
async fn test_history_trimmed_before_dispatch() {
    let openai = ScriptedProvider::new("openai");
    let mut config = create_test_config();
    config.limits.max_history_entries = 2;
    let (app, _store) = create_test_app(config, vec![openai.clone()]);
    let history: Vec<Value> = (0..5)
        .map(|i| json!({"role": if i % 2 == 0 { "user" } else { "assistant" }, "content": format!("turn {i}")}))
        .collect();

    app.post("/v1/chat")
        .json(&json!({"prompt": "next", "provider": "openai", "context": {"conversation_history": history}}))
        .await
        .assert_status(StatusCode::OK);

    let sent: Vec<String> = openai.calls()[0].params.history.iter().map(|m| m.content.clone()).collect();
    assert_eq!(sent, vec!["turn 3", "turn 4"]);
}

#[tokio::test]
async fn test_openai_compatible_provider_end_to_end() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/v1/chat/completions"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello from the mock"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 4, "total_tokens": 9}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config();
    config.providers = vec![ProviderConfig {
        name: "openai".to_string(),
        kind: Default::default(),
        base_url: format!("{}/v1", server.uri()).parse().unwrap(),
        api_key: Some("sk-upstream".to_string()),
        default_model: "gpt-4o-mini".to_string(),
        timeout: Duration::from_secs(5),
        legacy_max_tokens: true,
        pricing: Default::default(),
    }];
    let app = crate::Application::new(config).await.unwrap().into_test_server();

    let response = app.post("/v1/chat").json(&json!({"prompt": "hi", "provider": "openai"})).await;

    response.assert_status(StatusCode::OK);
    let body: ChatResponse = response.json();
    assert_eq!(body.text.as_deref(), Some("Hello from the mock"));
    assert_eq!(body.model.as_deref(), Some("gpt-4o-mini"));
    assert_eq!(body.token_usage.total_tokens, 9);
}

#[tokio::test]
async fn test_health_and_docs() {
    let (app, _store) = create_test_app(create_test_config(), vec![]);

    let health = app.get("/health").await;
    health.assert_status(StatusCode::OK);
    assert_eq!(health.json::<Value>()["status"], "ok");

    let openapi = app.get("/openapi.json").await;
    openapi.assert_status(StatusCode::OK);
    assert!(openapi.text().contains("Cortex API"));

    app.get("/docs").await.assert_status(StatusCode::OK);
    app.get("/internal/metrics").await.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_store_shared_between_read_and_write_paths() {
    let store = Arc::new(InMemoryAuditStore::new());
    let app = crate::Application::with_components(create_test_config(), crate::test_utils::registry_with(vec![ScriptedProvider::new("openai")]), store.clone())
        .unwrap()
        .into_test_server();

    let body: ChatResponse = app
        .post("/v1/chat")
        .json(&json!({"prompt": "persist", "provider": "openai"}))
        .await
        .json();

    assert!(store.get_request(body.request_id).await.unwrap().is_some());
    app.get(&format!("/v1/requests/{}", body.request_id))
        .await
        .assert_status(StatusCode::OK);
}
