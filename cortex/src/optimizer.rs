//! Prompt optimization hook.
//!
//! An optimizer rewrites prompt text before normalization. Wording transformation itself is an
//! external service; the crate ships [`PassthroughOptimizer`], which returns the text unchanged.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedPrompt {
    pub text: String,
    pub was_optimized: bool,
}

#[async_trait]
pub trait PromptOptimizer: Send + Sync {
    async fn optimize(&self, text: &str) -> OptimizedPrompt;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughOptimizer;

#[async_trait]
impl PromptOptimizer for PassthroughOptimizer {
    async fn optimize(&self, text: &str) -> OptimizedPrompt {
        OptimizedPrompt {
            text: text.to_string(),
            was_optimized: false,
        }
    }
}
