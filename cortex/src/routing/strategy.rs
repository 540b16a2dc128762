//! Initial tier selection.
//!
//! Which tier a smart request starts in is policy, so it sits behind the [`TierSelector`] trait.
//! The shipped [`ComplexityTierSelector`] scores the prompt with a cheap lexical heuristic and caps
//! the result by the caller's cost constraint.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::Tier;
use crate::pricing::PriceTable;

/// Everything a selector may look at.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInput<'a> {
    pub prompt: &'a str,
    pub max_cost: Option<Decimal>,
    /// Output token limit the call will be made with
    pub max_tokens: u32,
    pub tiers: &'a [Tier],
}

pub trait TierSelector: Send + Sync {
    /// Index into `input.tiers` to start routing from. Out-of-range values are clamped by the engine.
    fn select(&self, input: &SelectionInput<'_>) -> usize;
}

const LONG_PROMPT_CHARS: usize = 400;
const VERY_LONG_PROMPT_CHARS: usize = 2000;

const REASONING_MARKERS: &[&str] = &[
    "step by step",
    "prove",
    "analyze",
    "analyse",
    "derive",
    "architecture",
    "design",
    "optimize",
    "debug",
    "trade-off",
    "tradeoff",
    "refactor",
];

/// Scores prompts by length, code content, reasoning vocabulary and question count.
#[derive(Debug, Clone, Default)]
pub struct ComplexityTierSelector {
    pricing: Arc<PriceTable>,
}

impl ComplexityTierSelector {
    pub fn new(pricing: Arc<PriceTable>) -> Self {
        Self { pricing }
    }

    /// Complexity score from 0 (trivial) upwards.
    pub fn score(prompt: &str) -> usize {
        let lower = prompt.to_lowercase();
        let chars = prompt.chars().count();

        let mut score = 0;
        if chars > LONG_PROMPT_CHARS {
            score += 1;
        }
        if chars > VERY_LONG_PROMPT_CHARS {
            score += 1;
        }
        if prompt.contains("```") || lower.contains("fn ") || lower.contains("def ") {
            score += 1;
        }
        if REASONING_MARKERS.iter().any(|m| lower.contains(m)) {
            score += 1;
        }
        if prompt.matches('?').count() >= 3 {
            score += 1;
        }
        score
    }

    /// Lowest estimated cost among a tier's candidates.
    fn cheapest_estimate(&self, tier: &Tier, prompt_chars: usize, max_tokens: u32) -> Decimal {
        tier.candidates
            .iter()
            .map(|c| self.pricing.estimate(c, prompt_chars, max_tokens))
            .min()
            .unwrap_or(Decimal::ZERO)
    }
}

impl TierSelector for ComplexityTierSelector {
    fn select(&self, input: &SelectionInput<'_>) -> usize {
        if input.tiers.is_empty() {
            return 0;
        }
        let mut tier = Self::score(input.prompt).min(input.tiers.len() - 1);

        if let Some(max_cost) = input.max_cost {
            let prompt_chars = input.prompt.chars().count();
            while tier > 0 && self.cheapest_estimate(&input.tiers[tier], prompt_chars, input.max_tokens) > max_cost {
                tier -= 1;
            }
        }
        tier
    }
}

/// Always starts at a fixed tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTierSelector(pub usize);

impl TierSelector for FixedTierSelector {
    fn select(&self, _input: &SelectionInput<'_>) -> usize {
        self.0
    }
}
