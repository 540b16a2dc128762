//! Validation and canonicalization of inbound requests.
//!
//! Normalization is a pure function of the raw request, the limits configuration and the set of
//! registered providers. It either returns a [`CanonicalRequest`] ready for dispatch or a
//! [`Error::BadRequest`] describing the first rule that failed; nothing is dispatched or persisted
//! for a request that fails here.
//!
//! Rules applied:
//! - the prompt must be non-empty after trimming (the text itself is kept as sent)
//! - history keeps the most recent `max_history_entries` entries, then drops the oldest until the
//!   combined content fits in `max_history_chars`
//! - history roles are `user`, `assistant` or `system`
//! - `max_tokens` must be positive and is clamped to `max_tokens_cap`
//! - `temperature` lies in `[0, 2]`
//! - compare calls take 2 to `max_targets` targets, and no context when there are more than two
//! - compare `timeout_s` lies in `(0, 300]`; absent means the configured default
//! - explicit provider ids must be registered
//!
//! Canonical requests are fixed points: normalizing the raw form of a canonical request again
//! produces the same request.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::api::models::chat::{ChatContext, ChatRequest, HistoryEntry};
use crate::api::models::compare::CompareRequest;
use crate::config::{CompareConfig, LimitsConfig};
use crate::errors::{Error, Result};
use crate::models::RoutingMode;
use crate::providers::{InvokeParams, Message, MessageRole, ProviderRegistry, Target, TokenLimitParam};

/// Upper bound for a compare group timeout.
pub const MAX_COMPARE_TIMEOUT_SECS: f64 = 300.0;
const MIN_COMPARE_TARGETS: usize = 2;
/// Above this many targets no conversation context is accepted.
const MAX_TARGETS_WITH_CONTEXT: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestMode {
    /// Provider and model chosen by the routing engine
    Smart,
    /// One caller-chosen target
    Explicit(Target),
    /// Caller-chosen targets dispatched concurrently under one timeout
    Compare { targets: Vec<Target>, timeout: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRequest {
    pub prompt: String,
    pub mode: RequestMode,
    pub session_id: Option<String>,
    pub history: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub max_cost: Option<Decimal>,
}

impl CanonicalRequest {
    pub fn routing_mode(&self) -> RoutingMode {
        match self.mode {
            RequestMode::Smart => RoutingMode::Smart,
            RequestMode::Explicit(_) | RequestMode::Compare { .. } => RoutingMode::Explicit,
        }
    }

    pub fn invoke_params(&self, token_limit_param: TokenLimitParam) -> InvokeParams {
        InvokeParams {
            history: self.history.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            token_limit_param,
        }
    }
}

/// Applies the configured limits to raw requests.
#[derive(Debug, Clone)]
pub struct Normalizer {
    limits: LimitsConfig,
    compare: CompareConfig,
}

impl Normalizer {
    pub fn new(limits: LimitsConfig, compare: CompareConfig) -> Self {
        Self { limits, compare }
    }

    pub fn normalize_chat(&self, raw: &ChatRequest, registry: &ProviderRegistry) -> Result<CanonicalRequest> {
        let prompt = validate_prompt(&raw.prompt)?;

        let requested_mode = raw
            .routing_mode
            .as_deref()
            .map(str::parse::<RoutingMode>)
            .transpose()
            .map_err(bad_request)?;

        let mode = match (requested_mode, raw.provider.as_deref()) {
            (Some(RoutingMode::Smart), _) | (None, None) => RequestMode::Smart,
            (Some(RoutingMode::Explicit), None) => {
                return Err(bad_request("routing_mode 'explicit' requires a provider"));
            }
            (_, Some(provider)) => RequestMode::Explicit(resolve_target(registry, provider, raw.model.as_deref())?),
        };

        let (session_id, history) = self.normalize_context(raw.context.as_ref())?;

        Ok(CanonicalRequest {
            prompt,
            mode,
            session_id,
            history,
            max_tokens: self.normalize_max_tokens(raw.max_tokens)?,
            temperature: validate_temperature(raw.temperature)?,
            max_cost: validate_max_cost(raw.routing_constraints.as_ref().and_then(|c| c.max_cost))?,
        })
    }

    pub fn normalize_compare(&self, raw: &CompareRequest, registry: &ProviderRegistry) -> Result<CanonicalRequest> {
        let prompt = validate_prompt(&raw.prompt)?;

        let count = raw.targets.len();
        if count < MIN_COMPARE_TARGETS || count > self.compare.max_targets {
            return Err(bad_request(format!(
                "compare requires between {MIN_COMPARE_TARGETS} and {} targets, got {count}",
                self.compare.max_targets
            )));
        }
        if count > MAX_TARGETS_WITH_CONTEXT && raw.context.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(bad_request(format!(
                "conversation context is only supported with up to {MAX_TARGETS_WITH_CONTEXT} targets"
            )));
        }

        let targets = raw
            .targets
            .iter()
            .map(|t| resolve_target(registry, &t.provider, t.model.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        let timeout = match raw.timeout_s {
            Some(secs) if secs.is_finite() && secs > 0.0 && secs <= MAX_COMPARE_TIMEOUT_SECS => Duration::from_secs_f64(secs),
            Some(secs) => {
                return Err(bad_request(format!(
                    "timeout_s must be greater than 0 and at most {MAX_COMPARE_TIMEOUT_SECS}, got {secs}"
                )));
            }
            None => self.compare.default_timeout,
        };

        let (session_id, history) = self.normalize_context(raw.context.as_ref())?;

        Ok(CanonicalRequest {
            prompt,
            mode: RequestMode::Compare { targets, timeout },
            session_id,
            history,
            max_tokens: self.normalize_max_tokens(raw.max_tokens)?,
            temperature: validate_temperature(raw.temperature)?,
            max_cost: None,
        })
    }

    fn normalize_context(&self, context: Option<&ChatContext>) -> Result<(Option<String>, Vec<Message>)> {
        let Some(context) = context else {
            return Ok((None, Vec::new()));
        };
        let history = context
            .conversation_history
            .iter()
            .map(parse_history_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok((
            context.session_id.clone(),
            trim_history(history, self.limits.max_history_entries, self.limits.max_history_chars),
        ))
    }

    fn normalize_max_tokens(&self, max_tokens: Option<i64>) -> Result<Option<u32>> {
        match max_tokens {
            None => Ok(None),
            Some(n) if n <= 0 => Err(bad_request(format!("max_tokens must be greater than 0, got {n}"))),
            Some(n) => {
                let cap = self.limits.max_tokens_cap;
                Ok(Some(u32::try_from(n).map_or(cap, |n| n.min(cap))))
            }
        }
    }
}

/// Keep the newest `max_entries` messages, then drop from the oldest end until the combined
/// content length is at most `max_chars`.
pub fn trim_history(history: Vec<Message>, max_entries: usize, max_chars: usize) -> Vec<Message> {
    let skip = history.len().saturating_sub(max_entries);
    let mut kept: Vec<Message> = history.into_iter().skip(skip).collect();

    let mut total: usize = kept.iter().map(|m| m.content.chars().count()).sum();
    let mut drop = 0;
    while total > max_chars && drop < kept.len() {
        total -= kept[drop].content.chars().count();
        drop += 1;
    }
    kept.drain(..drop);
    kept
}

fn parse_history_entry(entry: &HistoryEntry) -> Result<Message> {
    let role = entry.role.parse::<MessageRole>().map_err(bad_request)?;
    Ok(Message {
        role,
        content: entry.content.clone(),
    })
}

fn validate_prompt(prompt: &str) -> Result<String> {
    if prompt.trim().is_empty() {
        return Err(bad_request("prompt cannot be empty"));
    }
    Ok(prompt.to_string())
}

fn validate_temperature(temperature: Option<f64>) -> Result<Option<f32>> {
    match temperature {
        None => Ok(None),
        Some(t) if (0.0..=2.0).contains(&t) => Ok(Some(t as f32)),
        Some(t) => Err(bad_request(format!("temperature must be between 0 and 2, got {t}"))),
    }
}

fn validate_max_cost(max_cost: Option<Decimal>) -> Result<Option<Decimal>> {
    match max_cost {
        Some(cost) if cost.is_sign_negative() => Err(bad_request("routing_constraints.max_cost cannot be negative")),
        other => Ok(other),
    }
}

fn resolve_target(registry: &ProviderRegistry, provider: &str, model: Option<&str>) -> Result<Target> {
    let registered = registry
        .get(provider)
        .ok_or_else(|| bad_request(format!("unknown provider '{provider}'")))?;
    let model = match model {
        Some(m) if !m.trim().is_empty() => m.to_string(),
        _ => registered.default_model.clone(),
    };
    Ok(Target::new(provider, model))
}

fn bad_request(message: impl Into<String>) -> Error {
    Error::BadRequest { message: message.into() }
}
