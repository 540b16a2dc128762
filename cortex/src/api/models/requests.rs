//! API response models for audit trail lookups.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::audit::models::{CompareSummaryRecord, RequestAudit};
use crate::types::GroupId;

/// Every request row recorded for one compare call, with the call's totals.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GroupAuditResponse {
    #[schema(value_type = String, format = "uuid")]
    pub request_group_id: GroupId,
    pub summary: Option<CompareSummaryRecord>,
    pub requests: Vec<RequestAudit>,
}
