//! Audit trail: storage, ownership guardrail and the recorder that ties them together.
//!
//! Every client call that reaches a provider leaves one [`AuditUnit`](models::AuditUnit): the
//! request row(s), one response per attempted target, the routing decisions with their
//! attempts and, for compare calls, the group summary. Units are written atomically and never
//! modified afterwards.
//!
//! Two stores implement [`AuditStore`]:
//! - [`InMemoryAuditStore`](in_memory::InMemoryAuditStore) keeps everything behind one lock, for
//!   tests and single-process deployments
//! - [`PostgresAuditStore`](postgres::PostgresAuditStore) writes each unit in one transaction

pub mod errors;
pub mod guardrail;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod recorder;

use async_trait::async_trait;

use crate::types::{ApiKeyId, GroupId, RequestId};
use errors::Result;
use models::{ApiKeyOwnership, AuditUnit, GroupAudit, RequestAudit};

pub use guardrail::{Caller, Ownership, OwnershipGuardrail, OwnershipSource};
pub use in_memory::InMemoryAuditStore;
pub use postgres::PostgresAuditStore;
pub use recorder::PersistenceRecorder;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Owner recorded for an API key, if any.
    async fn find_owner(&self, api_key_id: ApiKeyId) -> Result<Option<ApiKeyOwnership>>;

    /// Insert a mapping unless one already exists, returning whichever mapping is now in effect.
    async fn register_owner(&self, ownership: &ApiKeyOwnership) -> Result<ApiKeyOwnership>;

    /// Validate and write one unit atomically.
    ///
    /// The ownership of every request row carrying an API key is re-checked inside the same
    /// atomic write; any mismatch rejects the whole unit with
    /// [`StoreError::OwnershipViolation`](errors::StoreError::OwnershipViolation).
    async fn write_unit(&self, unit: &AuditUnit) -> Result<()>;

    async fn get_request(&self, request_id: RequestId) -> Result<Option<RequestAudit>>;

    /// A compare group's summary and requests, in the order they were written. `None` when no
    /// request carries the group id.
    async fn get_group(&self, group_id: GroupId) -> Result<Option<GroupAudit>>;
}
