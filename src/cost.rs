use serde::Deserialize;

use crate::types::{normalize_model, normalize_provider, TokenUsage};

/// Per-1000-token pricing for a model, in EUR.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Fallback model name consulted when a provider has no exact entry.
pub const DEFAULT_MODEL: &str = "default";

/// Trait for looking up pricing by provider and model.
///
/// Callers pass raw names; implementations receive them already
/// normalized (lowercase, trimmed, blank model as `unknown`).
pub trait PricingResolver: Send + Sync {
    /// Exact lookup, no fallback.
    fn lookup(&self, provider: &str, model: &str) -> Option<&ModelPricing>;

    /// Exact model first, then the provider's `default` entry.
    fn resolve(&self, provider: &str, model: &str) -> Option<&ModelPricing> {
        let provider = normalize_provider(provider);
        let model = normalize_model(model);
        self.lookup(&provider, &model)
            .or_else(|| self.lookup(&provider, DEFAULT_MODEL))
    }

    /// Estimated cost of one call. `None` means no price is configured,
    /// which is reported separately from a genuine zero cost.
    fn calculate_eur(&self, provider: &str, model: &str, usage: &TokenUsage) -> Option<f64> {
        let p = self.resolve(provider, model)?;
        let usage = usage.reconciled();
        let input = usage.input_tokens.unwrap_or(0) as f64;
        let output = usage.output_tokens.unwrap_or(0) as f64;
        Some((input / 1000.0) * p.input_per_1k + (output / 1000.0) * p.output_per_1k)
    }
}
