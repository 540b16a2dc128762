//! HTTP handlers for audit trail lookups.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::AppState;
use crate::api::models::requests::GroupAuditResponse;
use crate::audit::models::RequestAudit;
use crate::errors::{Error, Result};
use crate::types::{GroupId, RequestId};

#[utoipa::path(
    get,
    path = "/requests/{request_id}",
    tag = "audit",
    summary = "Get request audit",
    description = "Returns the recorded request with its responses and, for routed requests, the routing decision \
and every attempt.",
    params(
        ("request_id" = uuid::Uuid, Path, description = "Request ID returned with the response"),
    ),
    responses(
        (status = 200, description = "Recorded request", body = RequestAudit),
        (status = 404, description = "No request with this ID"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all, fields(request_id = %request_id))]
pub async fn get_request(State(state): State<AppState>, Path(request_id): Path<RequestId>) -> Result<Json<RequestAudit>> {
    match state.store.get_request(request_id).await? {
        Some(audit) => Ok(Json(audit)),
        None => Err(Error::NotFound {
            resource: "Request".to_string(),
            id: request_id.to_string(),
        }),
    }
}

#[utoipa::path(
    get,
    path = "/groups/{group_id}",
    tag = "audit",
    summary = "Get compare group audit",
    description = "Returns the totals recorded for one compare call and every request of the group, in target order.",
    params(
        ("group_id" = uuid::Uuid, Path, description = "Request group ID returned with the compare response"),
    ),
    responses(
        (status = 200, description = "Recorded requests of the group", body = GroupAuditResponse),
        (status = 404, description = "No group with this ID"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all, fields(group_id = %group_id))]
pub async fn get_group(State(state): State<AppState>, Path(group_id): Path<GroupId>) -> Result<Json<GroupAuditResponse>> {
    let Some(group) = state.store.get_group(group_id).await? else {
        return Err(Error::NotFound {
            resource: "Request group".to_string(),
            id: group_id.to_string(),
        });
    };
    Ok(Json(GroupAuditResponse {
        request_group_id: group_id,
        summary: group.summary,
        requests: group.requests,
    }))
}
