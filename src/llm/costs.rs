//! Per-token pricing used for usage estimates.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// USD per (input, output) token, matched by model-name prefix.
///
/// Longer prefixes come first so `gpt-4o-mini` doesn't match `gpt-4o`.
const PRICING: &[(&str, Decimal, Decimal)] = &[
    ("claude-3-5-haiku", dec!(0.0000008), dec!(0.000004)),
    ("claude-haiku", dec!(0.000001), dec!(0.000005)),
    ("claude-3-5-sonnet", dec!(0.000003), dec!(0.000015)),
    ("claude-sonnet", dec!(0.000003), dec!(0.000015)),
    ("claude-opus", dec!(0.000015), dec!(0.000075)),
    ("gpt-4o-mini", dec!(0.00000015), dec!(0.0000006)),
    ("gpt-4o", dec!(0.0000025), dec!(0.00001)),
    ("gpt-4.1-mini", dec!(0.0000004), dec!(0.0000016)),
    ("gpt-4.1", dec!(0.000002), dec!(0.000008)),
];

/// Cost per (input, output) token. Unknown models cost zero.
pub fn model_cost(model: &str) -> (Decimal, Decimal) {
    let model = model.to_ascii_lowercase();
    PRICING
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|&(_, input, output)| (input, output))
        .unwrap_or((Decimal::ZERO, Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_has_nonzero_cost() {
        let (input, output) = model_cost("claude-sonnet-4-20250514");
        assert_eq!(input, dec!(0.000003));
        assert_eq!(output, dec!(0.000015));
    }

    #[test]
    fn mini_variant_is_not_priced_as_base_model() {
        assert_eq!(model_cost("gpt-4o-mini").0, dec!(0.00000015));
        assert_eq!(model_cost("GPT-4o").0, dec!(0.0000025));
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(model_cost("local-llama"), (Decimal::ZERO, Decimal::ZERO));
    }
}
