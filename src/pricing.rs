use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

use crate::cost::{ModelPricing, PricingResolver};
use crate::types::{normalize_model, normalize_provider, UsageEvent};

/// Raw `[pricing.<provider>.<model>]` section as written in the config file.
pub type RawPricing = HashMap<String, HashMap<String, ModelPricing>>;

/// Static price list, injected from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawPricing")]
pub struct PricingTable {
    providers: HashMap<String, HashMap<String, ModelPricing>>,
}

impl From<RawPricing> for PricingTable {
    fn from(raw: RawPricing) -> Self {
        let mut table = PricingTable::default();
        for (provider, models) in raw {
            for (model, pricing) in models {
                table.insert(&provider, &model, pricing);
            }
        }
        table
    }
}

impl PricingResolver for PricingTable {
    fn lookup(&self, provider: &str, model: &str) -> Option<&ModelPricing> {
        self.providers.get(provider)?.get(model)
    }
}

impl PricingTable {
    /// Keys are stored normalized so lookups are case-insensitive.
    pub fn insert(&mut self, provider: &str, model: &str, pricing: ModelPricing) {
        self.providers
            .entry(normalize_provider(provider))
            .or_default()
            .insert(normalize_model(model), pricing);
    }

    pub fn with(mut self, provider: &str, model: &str, pricing: ModelPricing) -> Self {
        self.insert(provider, model, pricing);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.values().all(|m| m.is_empty())
    }

    /// `provider/model` pairs seen in `events` that resolve to no price.
    pub fn unpriced(&self, events: &[UsageEvent]) -> Vec<String> {
        events
            .iter()
            .filter(|e| self.resolve(&e.provider, &e.model).is_none())
            .map(|e| {
                format!(
                    "{}/{}",
                    normalize_provider(&e.provider),
                    normalize_model(&e.model)
                )
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;

    #[test]
    fn deserializes_from_toml_and_normalizes_keys() {
        let table: PricingTable = toml::from_str(
            r#"
            [OpenAI."GPT-4o-mini"]
            input_per_1k = 0.00015
            output_per_1k = 0.0006

            [anthropic.default]
            input_per_1k = 0.003
            output_per_1k = 0.015
            "#,
        )
        .unwrap();

        assert!(table.lookup("openai", "gpt-4o-mini").is_some());
        assert!(table.resolve("anthropic", "claude-sonnet-4").is_some());
        assert!(table.resolve("google", "gemini").is_none());
    }

    #[test]
    fn provider_without_default_is_unpriced() {
        let table = PricingTable::default().with(
            "openai",
            "gpt-4o",
            ModelPricing {
                input_per_1k: 0.0025,
                output_per_1k: 0.01,
            },
        );
        let events = vec![
            UsageEvent::new("a", "openai", "gpt-4o", TokenUsage::default()),
            UsageEvent::new("a", "openai", "o3", TokenUsage::default()),
            UsageEvent::new("b", "OpenAI", "O3", TokenUsage::default()),
            UsageEvent::new("a", "mistral", "", TokenUsage::default()),
        ];
        assert_eq!(
            table.unpriced(&events),
            vec!["mistral/unknown".to_string(), "openai/o3".to_string()]
        );
    }
}
