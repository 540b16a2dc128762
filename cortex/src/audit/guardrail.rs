//! Resolution of who owns a request, before any provider is called.
//!
//! Policy for a caller presenting an API key:
//! - a mapped key belongs to its owner; asserting a different user is rejected
//! - an unmapped key is auto-registered to the service user when `auto_register` is on
//! - otherwise, with `allow_unmapped_persist` on, the request is recorded under the service user
//!   with no key id
//! - otherwise it is rejected
//!
//! A caller without a key owns its request as the asserted user, or as the service user.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::AuditStore;
use super::models::ApiKeyOwnership;
use crate::config::OwnershipConfig;
use crate::errors::{Error, Result};
use crate::types::{ApiKeyId, UserId, abbrev_uuid};

/// Credentials presented with a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Caller {
    pub api_key_id: Option<ApiKeyId>,
    /// User identity the caller claims to act as
    pub asserted_user: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipSource {
    Mapped,
    AutoRegistered,
    /// Unknown key persisted without its id
    Unmapped,
    Anonymous,
}

/// The owner every row of a request will be written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub user_id: UserId,
    /// Key id recorded on request rows. `None` for anonymous and unmapped callers.
    pub api_key_id: Option<ApiKeyId>,
    pub source: OwnershipSource,
}

#[derive(Clone)]
pub struct OwnershipGuardrail {
    store: Arc<dyn AuditStore>,
    config: OwnershipConfig,
}

impl std::fmt::Debug for OwnershipGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipGuardrail").field("config", &self.config).finish_non_exhaustive()
    }
}

impl OwnershipGuardrail {
    pub fn new(store: Arc<dyn AuditStore>, config: OwnershipConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self), fields(api_key_id = ?caller.api_key_id.map(|k| abbrev_uuid(&k))), err)]
    pub async fn resolve(&self, caller: &Caller) -> Result<Ownership> {
        let Some(api_key_id) = caller.api_key_id else {
            return Ok(Ownership {
                user_id: caller.asserted_user.unwrap_or(self.config.service_user_id),
                api_key_id: None,
                source: OwnershipSource::Anonymous,
            });
        };

        if let Some(owner) = self.store.find_owner(api_key_id).await? {
            return self.check_assertion(caller, owner, OwnershipSource::Mapped);
        }

        if self.config.auto_register {
            let effective = self
                .store
                .register_owner(&ApiKeyOwnership {
                    api_key_id,
                    user_id: self.config.service_user_id,
                    auto_registered: true,
                    created_at: Utc::now(),
                })
                .await?;
            info!(user_id = %abbrev_uuid(&effective.user_id), "Auto-registered API key");
            // A concurrent registration may have won with another owner
            let source = if effective.auto_registered {
                OwnershipSource::AutoRegistered
            } else {
                OwnershipSource::Mapped
            };
            return self.check_assertion(caller, effective, source);
        }

        if self.config.allow_unmapped_persist {
            return Ok(Ownership {
                user_id: self.config.service_user_id,
                api_key_id: None,
                source: OwnershipSource::Unmapped,
            });
        }

        reject("unmapped_key", "API key is not registered to any user")
    }

    fn check_assertion(&self, caller: &Caller, owner: ApiKeyOwnership, source: OwnershipSource) -> Result<Ownership> {
        if let Some(asserted) = caller.asserted_user
            && asserted != owner.user_id
        {
            return reject("user_mismatch", "API key belongs to a different user than the one asserted");
        }
        Ok(Ownership {
            user_id: owner.user_id,
            api_key_id: Some(owner.api_key_id),
            source,
        })
    }
}

fn reject(reason: &'static str, message: &str) -> Result<Ownership> {
    warn!(reason, "Ownership guardrail rejected request");
    metrics::counter!("cortex_guardrail_rejections_total", "reason" => reason).increment(1);
    Err(Error::Ownership {
        reason: message.to_string(),
    })
}
