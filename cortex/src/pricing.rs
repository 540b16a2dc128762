//! Per-model pricing and cost estimates.
//!
//! Prices are configured per provider and model in units of currency per 1,000 tokens. Models
//! without a configured price cost zero, so an unpriced model never trips a spend budget.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::providers::{Target, TokenUsage};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

impl ModelPricing {
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> Decimal {
        let thousand = Decimal::from(1000);
        (self.input_per_1k * Decimal::from(prompt_tokens) + self.output_per_1k * Decimal::from(completion_tokens)) / thousand
    }
}

#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: HashMap<Target, ModelPricing>,
}

impl PriceTable {
    pub fn from_providers(providers: &[ProviderConfig]) -> Self {
        let prices = providers
            .iter()
            .flat_map(|p| {
                p.pricing
                    .iter()
                    .map(move |(model, price)| (Target::new(p.name.clone(), model.clone()), price.clone()))
            })
            .collect();
        Self { prices }
    }

    pub fn insert(&mut self, target: Target, pricing: ModelPricing) {
        self.prices.insert(target, pricing);
    }

    pub fn get(&self, target: &Target) -> Option<&ModelPricing> {
        self.prices.get(target)
    }

    /// Cost of a completed call.
    pub fn cost(&self, target: &Target, usage: &TokenUsage) -> Decimal {
        self.get(target)
            .map(|p| p.cost(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or(Decimal::ZERO)
    }

    /// Upper-bound estimate before the call: prompt tokens approximated at four characters per
    /// token, completion at the full output limit.
    pub fn estimate(&self, target: &Target, prompt_chars: usize, max_tokens: u32) -> Decimal {
        let prompt_tokens = u32::try_from(prompt_chars.div_ceil(4)).unwrap_or(u32::MAX);
        self.get(target)
            .map(|p| p.cost(prompt_tokens, max_tokens))
            .unwrap_or(Decimal::ZERO)
    }
}
