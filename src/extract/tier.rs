//! Tier routing and confidence combination.
//!
//! A field's acceptance confidence combines the model's self-report with
//! deterministic heuristics: a penalty when the value reads as "not
//! reported", a bonus when a substantial evidence quote backs it. The
//! per-field threshold comes from the field's declared tier (1-5).

use crate::config::TierConfig;
use crate::core::Tier;
use crate::core::evidence::coerce_to_string;

/// Phrases that mark a value as an explicit non-answer.
pub const NOT_REPORTED_PHRASES: [&str; 5] = [
    "not reported",
    "not stated",
    "not available",
    "n/a",
    "unknown",
];

/// Penalty applied when the value text reads as "not reported".
const NOT_REPORTED_PENALTY: f64 = 0.15;
/// Bonus for a quote longer than the grounding minimum.
const QUOTE_BONUS: f64 = 0.10;
/// Extra bonus for a long quote.
const LONG_QUOTE_BONUS: f64 = 0.05;
/// Quote length above which the extra bonus applies.
const LONG_QUOTE_CHARS: usize = 40;

/// LLM tiers attempted by the cascade, in escalation order: every tier
/// above regex, cheapest first.
pub const LLM_TIER_SEQUENCE: [Tier; 4] = [
    Tier::LocalLight,
    Tier::LocalStandard,
    Tier::CloudCheap,
    Tier::CloudPremium,
];

/// Combines self-reported confidence with value and evidence heuristics.
///
/// Missing self-reports start from 0.5. The result is clamped to [0, 1].
#[must_use]
pub fn combine_confidence(
    self_reported: Option<f64>,
    value: &serde_json::Value,
    quote: Option<&str>,
) -> f64 {
    let mut confidence = self_reported.unwrap_or(0.5).clamp(0.0, 1.0);

    let text = coerce_to_string(value).to_lowercase();
    if NOT_REPORTED_PHRASES.iter().any(|p| text.contains(p)) {
        confidence -= NOT_REPORTED_PENALTY;
    }

    if let Some(quote) = quote {
        let len = quote.trim().len();
        if len > 10 {
            confidence += QUOTE_BONUS;
        }
        if len > LONG_QUOTE_CHARS {
            confidence += LONG_QUOTE_BONUS;
        }
    }

    confidence.clamp(0.0, 1.0)
}

/// Resolves the model name for an LLM tier.
#[must_use]
pub fn model_for_tier(tier: Tier, config: &TierConfig) -> &str {
    match tier {
        Tier::Regex | Tier::LocalLight => &config.local_light_model,
        Tier::LocalStandard => &config.local_standard_model,
        Tier::CloudCheap => &config.cloud_cheap_model,
        Tier::CloudPremium => &config.cloud_premium_model,
    }
}
