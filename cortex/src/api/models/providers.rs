//! API response models for the provider and tier listing.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::providers::Target;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderInfo {
    pub id: String,
    pub default_model: String,
    /// Token limit name sent on the first call (`max_tokens` or `max_completion_tokens`)
    pub token_limit_param: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TierInfo {
    pub name: String,
    pub candidates: Vec<Target>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderInfo>,
    /// Smart routing tiers, cheapest first
    pub tiers: Vec<TierInfo>,
    pub max_compare_targets: usize,
}
