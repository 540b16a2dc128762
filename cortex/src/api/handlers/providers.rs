//! HTTP handler for the provider and tier listing.

use axum::{Json, extract::State};

use crate::AppState;
use crate::api::models::providers::{ProviderInfo, ProvidersResponse, TierInfo};

#[utoipa::path(
    get,
    path = "/providers",
    tag = "providers",
    summary = "List providers",
    description = "Lists the registered providers with their default models, the smart routing tiers and the compare \
target limit.",
    responses(
        (status = 200, description = "Registered providers and tiers", body = ProvidersResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let mut providers: Vec<ProviderInfo> = state
        .orchestrator
        .registry()
        .iter()
        .map(|(id, registered)| ProviderInfo {
            id: id.to_string(),
            default_model: registered.default_model.clone(),
            token_limit_param: registered.token_limit_param.field_name().to_string(),
        })
        .collect();
    providers.sort_by(|a, b| a.id.cmp(&b.id));

    let tiers = state
        .orchestrator
        .engine()
        .tiers()
        .iter()
        .map(|tier| TierInfo {
            name: tier.name.clone(),
            candidates: tier.candidates.clone(),
        })
        .collect();

    Json(ProvidersResponse {
        providers,
        tiers,
        max_compare_targets: state.config.compare.max_targets,
    })
}
