//! Test doubles shared by unit and integration tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::errors::{Result as StoreResult, StoreError};
use crate::audit::models::{
    ApiKeyOwnership, AuditEntry, AuditUnit, CompareSummaryRecord, GroupAudit, RequestAudit, RequestRecord, ResponseRecord,
};
use crate::audit::{AuditStore, InMemoryAuditStore};
use crate::models::RoutingMode;
use crate::types::{ApiKeyId, GroupId, RequestId, UserId, prompt_sha256};
use crate::{Application, Config};

use crate::providers::{
    Completion, FinishReason, InvokeParams, ProviderAdapter, ProviderError, ProviderRegistry, TokenLimitParam, TokenUsage,
};

/// One scripted reaction of a [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub enum Step {
    Reply(Completion),
    Fail(ProviderError),
    /// Sleep, then behave like the inner step
    Delayed(Duration, Box<Step>),
    /// Never return
    Hang,
    /// Panic inside the adapter
    Panic,
}

impl Step {
    pub fn ok(text: &str) -> Self {
        Self::ok_with_usage(text, 10, 20)
    }

    pub fn ok_with_usage(text: &str, prompt_tokens: u32, completion_tokens: u32) -> Self {
        Step::Reply(Completion {
            text: text.to_string(),
            finish_reason: FinishReason::Stop,
            token_usage: TokenUsage::new(prompt_tokens, completion_tokens),
            latency_ms: 5,
        })
    }

    pub fn err(error: ProviderError) -> Self {
        Step::Fail(error)
    }

    pub fn after(self, delay: Duration) -> Self {
        Step::Delayed(delay, Box::new(self))
    }
}

/// What the provider was called with.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub model: String,
    pub params: InvokeParams,
}

/// Provider adapter that plays back queued steps, then falls back to a default step.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    id: String,
    steps: Arc<Mutex<VecDeque<Step>>>,
    fallback: Arc<Mutex<Step>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            steps: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(Step::ok(&format!("reply from {id}")))),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a step for the next unscripted call.
    pub fn then(self, step: Step) -> Self {
        self.steps.lock().push_back(step);
        self
    }

    /// Behaviour once the queue is empty.
    pub fn always(self, step: Step) -> Self {
        *self.fallback.lock() = step;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_step(&self) -> Step {
        self.steps.lock().pop_front().unwrap_or_else(|| self.fallback.lock().clone())
    }
}

async fn play(step: Step) -> Result<Completion, ProviderError> {
    let mut step = step;
    loop {
        match step {
            Step::Reply(completion) => return Ok(completion),
            Step::Fail(error) => return Err(error),
            Step::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                step = *inner;
            }
            Step::Hang => std::future::pending::<()>().await,
            Step::Panic => panic!("scripted provider panic"),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, prompt: &str, model: &str, params: &InvokeParams) -> Result<Completion, ProviderError> {
        self.calls.lock().push(RecordedCall {
            prompt: prompt.to_string(),
            model: model.to_string(),
            params: params.clone(),
        });
        let step = self.next_step();
        play(step).await
    }
}

/// Registry of scripted providers, each with default model `<id>-default`.
pub fn registry_with(providers: Vec<ScriptedProvider>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        let default_model = format!("{}-default", provider.id);
        registry.register_with(Arc::new(provider), default_model, TokenLimitParam::MaxTokens);
    }
    registry
}

/// Configuration for HTTP tests: in-memory store, no metrics recorder.
pub fn create_test_config() -> Config {
    Config {
        enable_metrics: false,
        ..Config::default()
    }
}

/// Serve an application over scripted providers, returning the store for inspection.
pub fn create_test_app(config: Config, providers: Vec<ScriptedProvider>) -> (TestServer, Arc<InMemoryAuditStore>) {
    let store = Arc::new(InMemoryAuditStore::new());
    let app = Application::with_components(config, registry_with(providers), store.clone()).expect("Failed to create application");
    (app.into_test_server(), store)
}

/// Parse a newline-delimited JSON body.
pub fn parse_ndjson(body: &str) -> Vec<Value> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("Stream line should be JSON"))
        .collect()
}

/// An explicit-call audit entry with one successful response.
pub fn audit_entry(group_id: Option<GroupId>, api_key_id: Option<ApiKeyId>, user_id: UserId) -> AuditEntry {
    let request_id = Uuid::new_v4();
    AuditEntry {
        request: RequestRecord {
            id: request_id,
            group_id,
            provider: Some("openai".into()),
            model: Some("gpt-4o".into()),
            prompt: "hi".into(),
            prompt_sha256: prompt_sha256("hi"),
            session_id: None,
            routing_mode: RoutingMode::Explicit,
            api_key_id,
            user_id,
            created_at: Utc::now(),
        },
        response: ResponseRecord {
            id: Uuid::new_v4(),
            request_id,
            group_id,
            provider: Some("openai".into()),
            model: Some("gpt-4o".into()),
            text: Some("hello".into()),
            finish_reason: FinishReason::Stop,
            error: None,
            token_usage: TokenUsage::new(1, 2),
            estimated_cost: Decimal::ZERO,
            latency_ms: 10,
            created_at: Utc::now(),
        },
        decision: None,
    }
}

pub fn key_owner(api_key_id: ApiKeyId, user_id: UserId) -> ApiKeyOwnership {
    ApiKeyOwnership {
        api_key_id,
        user_id,
        auto_registered: false,
        created_at: Utc::now(),
    }
}

pub fn compare_summary(group_id: GroupId, success_count: u32, error_count: u32) -> CompareSummaryRecord {
    CompareSummaryRecord {
        group_id,
        success_count,
        error_count,
        total_tokens: 6,
        total_cost: Decimal::new(2, 3),
        created_at: Utc::now(),
    }
}

/// In-memory store whose unit writes fail while `fail_writes` is set.
#[derive(Debug, Default)]
pub struct UnavailableAuditStore {
    pub inner: InMemoryAuditStore,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl AuditStore for UnavailableAuditStore {
    async fn find_owner(&self, api_key_id: ApiKeyId) -> StoreResult<Option<ApiKeyOwnership>> {
        self.inner.find_owner(api_key_id).await
    }

    async fn register_owner(&self, ownership: &ApiKeyOwnership) -> StoreResult<ApiKeyOwnership> {
        self.inner.register_owner(ownership).await
    }

    async fn write_unit(&self, unit: &AuditUnit) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Other(anyhow::anyhow!("audit database unavailable")));
        }
        self.inner.write_unit(unit).await
    }

    async fn get_request(&self, request_id: RequestId) -> StoreResult<Option<RequestAudit>> {
        self.inner.get_request(request_id).await
    }

    async fn get_group(&self, group_id: GroupId) -> StoreResult<Option<GroupAudit>> {
        self.inner.get_group(group_id).await
    }
}
