use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use super::AuditStore;
use super::errors::{Result, StoreError};
use super::models::{ApiKeyOwnership, AuditEntry, AuditUnit, CompareSummaryRecord, GroupAudit, RequestAudit};
use crate::types::{ApiKeyId, GroupId, RequestId, abbrev_uuid};

#[derive(Debug, Default)]
struct State {
    owners: HashMap<ApiKeyId, ApiKeyOwnership>,
    entries: HashMap<RequestId, AuditEntry>,
    /// Request ids per group in write order
    groups: HashMap<GroupId, Vec<RequestId>>,
    summaries: HashMap<GroupId, CompareSummaryRecord>,
}

/// Audit store held entirely in process memory.
///
/// A unit is validated, ownership-checked and inserted under a single write lock, so readers never
/// observe a partially written unit.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    state: RwLock<State>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of request rows written so far.
    pub fn request_count(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Number of routing attempt rows written so far.
    pub fn attempt_count(&self) -> usize {
        self.state
            .read()
            .entries
            .values()
            .filter_map(|e| e.decision.as_ref())
            .map(|d| d.attempts.len())
            .sum()
    }
}

fn to_audit(entry: &AuditEntry) -> RequestAudit {
    RequestAudit {
        request: entry.request.clone(),
        responses: vec![entry.response.clone()],
        decision: entry.decision.clone(),
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn find_owner(&self, api_key_id: ApiKeyId) -> Result<Option<ApiKeyOwnership>> {
        Ok(self.state.read().owners.get(&api_key_id).cloned())
    }

    #[instrument(skip(self, ownership), fields(api_key_id = %abbrev_uuid(&ownership.api_key_id)), err)]
    async fn register_owner(&self, ownership: &ApiKeyOwnership) -> Result<ApiKeyOwnership> {
        let mut state = self.state.write();
        let effective = state
            .owners
            .entry(ownership.api_key_id)
            .or_insert_with(|| ownership.clone())
            .clone();
        Ok(effective)
    }

    #[instrument(skip(self, unit), fields(entries = unit.entries.len()), err)]
    async fn write_unit(&self, unit: &AuditUnit) -> Result<()> {
        unit.validate()?;

        let mut state = self.state.write();

        for (api_key_id, user_id) in unit.api_key_claims() {
            match state.owners.get(&api_key_id) {
                Some(owner) if owner.user_id == user_id => {}
                Some(owner) => {
                    return Err(StoreError::OwnershipViolation {
                        api_key_id,
                        message: format!("key is owned by {}, request claims {}", owner.user_id, user_id),
                    });
                }
                None => {
                    return Err(StoreError::OwnershipViolation {
                        api_key_id,
                        message: "key has no recorded owner".to_string(),
                    });
                }
            }
        }

        for entry in &unit.entries {
            if state.entries.contains_key(&entry.request.id) {
                return Err(StoreError::UniqueViolation {
                    constraint: Some("requests_pkey".to_string()),
                    table: Some("requests".to_string()),
                    message: format!("request {} already recorded", entry.request.id),
                });
            }
        }

        if let Some(summary) = &unit.summary
            && state.summaries.contains_key(&summary.group_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: Some("compare_groups_pkey".to_string()),
                table: Some("compare_groups".to_string()),
                message: format!("group {} already summarized", summary.group_id),
            });
        }

        if let Some(summary) = &unit.summary {
            state.summaries.insert(summary.group_id, summary.clone());
        }
        for entry in &unit.entries {
            if let Some(group_id) = entry.request.group_id {
                state.groups.entry(group_id).or_default().push(entry.request.id);
            }
            state.entries.insert(entry.request.id, entry.clone());
        }
        debug!("Audit unit written");
        Ok(())
    }

    async fn get_request(&self, request_id: RequestId) -> Result<Option<RequestAudit>> {
        Ok(self.state.read().entries.get(&request_id).map(to_audit))
    }

    async fn get_group(&self, group_id: GroupId) -> Result<Option<GroupAudit>> {
        let state = self.state.read();
        let Some(ids) = state.groups.get(&group_id) else {
            return Ok(None);
        };
        Ok(Some(GroupAudit {
            summary: state.summaries.get(&group_id).cloned(),
            requests: ids.iter().filter_map(|id| state.entries.get(id)).map(to_audit).collect(),
        }))
    }
}
