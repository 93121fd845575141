//! Tiered extraction: regex Tier 0 plus the LLM cascade.

pub mod cascade;
pub mod models;
pub mod prompt;
pub mod regex;
pub mod tier;

pub use cascade::{CascadeOutcome, PreFilled, TieredExtractor};
pub use models::ExtractorResponse;
pub use regex::{RegexExtractor, RegexResult};
pub use tier::{LLM_TIER_SEQUENCE, combine_confidence, model_for_tier};
