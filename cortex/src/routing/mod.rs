//! Smart routing across cost/capability tiers.
//!
//! Tiers are configured cheapest first, each with an ordered list of `(provider, model)`
//! candidates. For a smart request the [`RoutingEngine`] asks a [`TierSelector`] for the starting
//! tier, then tries candidates strictly one at a time, escalating to the next tier only after every
//! candidate in the current one failed. Every try is recorded as an attempt in the returned
//! [`RoutingTrace`](crate::models::RoutingTrace).

pub mod engine;
pub mod strategy;

use serde::{Deserialize, Serialize};

use crate::providers::Target;

pub use engine::{RoutedResponse, RoutingEngine};
pub use strategy::{ComplexityTierSelector, SelectionInput, TierSelector};

/// One rung of the routing ladder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Tier {
    pub name: String,
    /// Candidates in priority order
    pub candidates: Vec<Target>,
}

impl Tier {
    pub fn new(name: impl Into<String>, candidates: Vec<Target>) -> Self {
        Self {
            name: name.into(),
            candidates,
        }
    }
}
