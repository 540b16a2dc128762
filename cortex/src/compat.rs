//! Provider compatibility retry.
//!
//! Some models reject the legacy `max_tokens` parameter and require `max_completion_tokens`. A
//! call through [`invoke_with_compat`] starts in the provider's configured token-limit style; if
//! the provider reports that the legacy name is incompatible, the call is repeated exactly once with
//! the modern name. The retry is invisible to routing: it is neither a routing attempt nor an
//! escalation. Every other error is returned untouched, and a second incompatibility after adapting
//! is surfaced as-is.

use tracing::{debug, instrument};

use crate::providers::{Completion, ErrorKind, InvokeParams, ProviderAdapter, ProviderError, TokenLimitParam};

/// States of one compatibility-wrapped call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompatState {
    Initial,
    Adapted,
}

/// Result of a wrapped call plus whether the parameter name had to be adapted.
#[derive(Debug)]
pub struct CompatOutcome {
    pub result: Result<Completion, ProviderError>,
    pub adapted: bool,
}

/// Call the adapter, adapting the token-limit parameter name at most once.
#[instrument(skip(adapter, prompt, params), fields(provider = adapter.id(), model = model))]
pub async fn invoke_with_compat(adapter: &dyn ProviderAdapter, prompt: &str, model: &str, params: &InvokeParams) -> CompatOutcome {
    let mut state = CompatState::Initial;
    let mut current = params.clone();

    loop {
        let result = adapter.invoke(prompt, model, &current).await;
        match (&result, state) {
            (Err(err), CompatState::Initial) if needs_modern_limit(err, &current) => {
                debug!(parameter = ?err.parameter, "Provider rejected legacy token limit, retrying with max_completion_tokens");
                metrics::counter!("cortex_compat_retries_total", "provider" => adapter.id().to_string()).increment(1);
                current.token_limit_param = TokenLimitParam::MaxCompletionTokens;
                state = CompatState::Adapted;
            }
            _ => {
                return CompatOutcome {
                    result,
                    adapted: state == CompatState::Adapted,
                };
            }
        }
    }
}

fn needs_modern_limit(err: &ProviderError, params: &InvokeParams) -> bool {
    err.kind == ErrorKind::IncompatibleParameter
        && params.token_limit_param == TokenLimitParam::MaxTokens
        && err
            .parameter
            .as_deref()
            .is_none_or(|p| p.is_empty() || p == TokenLimitParam::MaxTokens.field_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedProvider, Step};

    fn params() -> InvokeParams {
        InvokeParams {
            max_tokens: Some(100),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let provider = ScriptedProvider::new("openai").then(Step::ok("hi"));
        let outcome = invoke_with_compat(&provider, "p", "gpt-4o", &params()).await;
        assert!(outcome.result.is_ok());
        assert!(!outcome.adapted);
        assert_eq!(provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_limit_rejection_retries_once_with_modern_name() {
        let provider = ScriptedProvider::new("openai")
            .then(Step::err(ProviderError::incompatible_parameter("max_tokens", "use max_completion_tokens")))
            .then(Step::ok("adapted"));

        let outcome = invoke_with_compat(&provider, "p", "o1-mini", &params()).await;

        assert_eq!(outcome.result.unwrap().text, "adapted");
        assert!(outcome.adapted);
        let calls = provider.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].params.token_limit_param, TokenLimitParam::MaxTokens);
        assert_eq!(calls[1].params.token_limit_param, TokenLimitParam::MaxCompletionTokens);
        assert_eq!(calls[1].params.max_tokens, Some(100));
    }

    #[tokio::test]
    async fn test_second_incompatibility_surfaces() {
        let provider = ScriptedProvider::new("openai")
            .then(Step::err(ProviderError::incompatible_parameter("max_tokens", "no")))
            .then(Step::err(ProviderError::incompatible_parameter("max_completion_tokens", "also no")));

        let outcome = invoke_with_compat(&provider, "p", "m", &params()).await;

        let err = outcome.result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompatibleParameter);
        assert_eq!(err.parameter.as_deref(), Some("max_completion_tokens"));
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_other_errors_pass_through_unmodified() {
        for err in [
            ProviderError::new(ErrorKind::Auth, "bad key"),
            ProviderError::new(ErrorKind::RateLimit, "slow down"),
            ProviderError::timeout("late"),
            ProviderError::new(ErrorKind::MalformedResponse, "garbage"),
            ProviderError::new(ErrorKind::Upstream, "502"),
            ProviderError::incompatible_parameter("temperature", "unsupported temperature"),
        ] {
            let provider = ScriptedProvider::new("openai").then(Step::err(err.clone()));
            let outcome = invoke_with_compat(&provider, "p", "m", &params()).await;
            assert_eq!(outcome.result.unwrap_err(), err);
            assert!(!outcome.adapted);
            assert_eq!(provider.calls().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_modern_style_is_not_adapted_again() {
        let provider = ScriptedProvider::new("openai").then(Step::err(ProviderError::incompatible_parameter("max_tokens", "no")));
        let modern = InvokeParams {
            token_limit_param: TokenLimitParam::MaxCompletionTokens,
            ..params()
        };
        let outcome = invoke_with_compat(&provider, "p", "m", &modern).await;
        assert!(outcome.result.is_err());
        assert_eq!(provider.calls().len(), 1);
    }
}
