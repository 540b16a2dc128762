//! Caller credentials.
//!
//! Callers may present an API key as `Authorization: Bearer <key>` and may assert a user identity
//! through the configured user header (default `x-cortex-user`). Both are optional. The key secret
//! is never kept: it is reduced to its [`ApiKeyId`](crate::types::ApiKeyId) on extraction.
//! Deciding whether the caller may act as that identity is the job of the
//! [`OwnershipGuardrail`](crate::audit::OwnershipGuardrail).

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::{instrument, trace};
use uuid::Uuid;

use crate::AppState;
use crate::audit::Caller;
use crate::errors::{Error, Result};
use crate::types::api_key_id;

/// Extract the API key from a Bearer authorization header.
///
/// Returns:
/// - `Ok(None)`: no Authorization header
/// - `Ok(Some(secret))`: a non-empty Bearer token
/// - `Err(_)`: header present but not a usable Bearer token
fn bearer_token(parts: &Parts) -> Result<Option<&str>> {
    let Some(header) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = header.to_str().map_err(|e| Error::Unauthenticated {
        message: Some(format!("Invalid authorization header: {e}")),
    })?;
    match value.strip_prefix("Bearer ").map(str::trim) {
        Some(token) if !token.is_empty() => Ok(Some(token)),
        _ => Err(Error::Unauthenticated {
            message: Some("Authorization header must be 'Bearer <api key>'".to_string()),
        }),
    }
}

fn asserted_user(parts: &Parts, header_name: &str) -> Result<Option<Uuid>> {
    let Some(header) = parts.headers.get(header_name) else {
        return Ok(None);
    };
    let invalid = || Error::Unauthenticated {
        message: Some(format!("Header {header_name} must be a user UUID")),
    };
    let value = header.to_str().map_err(|_| invalid())?;
    Uuid::parse_str(value.trim()).map(Some).map_err(|_| invalid())
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let api_key_id = bearer_token(parts)?.map(api_key_id);
        let asserted_user = asserted_user(parts, &state.config.ownership.user_header)?;
        trace!(has_key = api_key_id.is_some(), has_user = asserted_user.is_some(), "Extracted caller");
        Ok(Caller { api_key_id, asserted_user })
    }
}
