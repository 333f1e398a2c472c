//! Judge model pricing.
//!
//! Costs are in nanodollars (1e-9 USD) per token. Entries are keyed by the
//! model id as sent on the wire; OpenRouter-style `vendor/model` ids resolve
//! to the same entry as the bare id.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per input token in nanodollars.
    pub input_nanos_per_token: i64,
    /// Cost per output token in nanodollars.
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// GPT-4o: $2.50/1M input, $10.00/1M output
const GPT_4O: ModelPricing = ModelPricing::new(2_500, 10_000);
// GPT-4o-mini: $0.15/1M input, $0.60/1M output
const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);
// o1: $15.00/1M input, $60.00/1M output
const O1: ModelPricing = ModelPricing::new(15_000, 60_000);
// o1-mini: $1.10/1M input, $4.40/1M output
const O1_MINI: ModelPricing = ModelPricing::new(1_100, 4_400);
// Unknown models are charged at a mid-range rate.
const FALLBACK: ModelPricing = ModelPricing::new(1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();
    map.insert("gpt-4o", GPT_4O);
    map.insert("gpt-4o-2024-08-06", GPT_4O);
    map.insert("gpt-4o-mini", GPT_4O_MINI);
    map.insert("gpt-4o-mini-2024-07-18", GPT_4O_MINI);
    map.insert("o1", O1);
    map.insert("o1-preview", O1);
    map.insert("o1-mini", O1_MINI);
    map
}

/// Get pricing for a model.
pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    let map = PRICING_MAP.get_or_init(init_pricing);
    let bare = model_id.rsplit('/').next().unwrap_or(model_id);
    map.get(model_id).or_else(|| map.get(bare)).copied()
}

/// Calculate chat cost.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(FALLBACK)
        .calculate_cost(input_tokens, output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_cost() {
        // 1K input * 2_500 + 1K output * 10_000 = 12,500,000 nanos
        assert_eq!(chat_cost("gpt-4o", 1_000, 1_000), 12_500_000);
    }

    #[test]
    fn vendor_prefixed_ids_resolve() {
        assert_eq!(
            chat_cost("openai/gpt-4o-mini", 1_000, 0),
            chat_cost("gpt-4o-mini", 1_000, 0)
        );
    }

    #[test]
    fn unknown_model_uses_fallback() {
        assert_eq!(chat_cost("mystery-model", 1, 1), 6_000);
    }
}
