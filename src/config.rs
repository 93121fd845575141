//! Pipeline configuration.
//!
//! A single [`PipelineConfig`] covers the full tunable surface: controller
//! thresholds, filter settings, tier thresholds and models, batch controls,
//! resource limits, and store paths. Defaults are usable out of the box;
//! values can be overridden from a TOML file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum overall score for an extraction to pass validation.
    pub score_threshold: f64,
    /// Maximum validation/revision iterations per document.
    pub max_iterations: u32,
    /// Maximum concurrent documents in a batch.
    pub workers: usize,
    /// Minimum calibrated confidence for Tier-0 regex acceptance.
    pub confidence_threshold_mid: f64,
    /// Maximum characters of relevant-chunk text concatenated into the
    /// extraction context.
    pub max_context_chars: usize,
    /// Weight of the accuracy score in the overall score.
    pub accuracy_weight: f64,
    /// Weight of the consistency score in the overall score.
    pub consistency_weight: f64,
    /// Score subtracted per high-severity audit failure.
    pub audit_high_severity_penalty: f64,
    /// Whether the recall boost also names missing inferred fields,
    /// not just explicit ones.
    pub recall_boost_inferred: bool,
    /// Content filter settings.
    pub filter: FilterConfig,
    /// Tier thresholds and model routing.
    pub tiers: TierConfig,
    /// LLM transport settings.
    pub transport: TransportConfig,
    /// Batch circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Resource monitor thresholds.
    pub resource: ResourceConfig,
    /// Store locations.
    pub paths: PathsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.8,
            max_iterations: 3,
            workers: 4,
            confidence_threshold_mid: 0.75,
            max_context_chars: 24_000,
            accuracy_weight: 0.6,
            consistency_weight: 0.4,
            audit_high_severity_penalty: 0.10,
            recall_boost_inferred: false,
            filter: FilterConfig::default(),
            tiers: TierConfig::default(),
            transport: TransportConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            resource: ResourceConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from a TOML file, filling omitted fields with
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or values are out of range.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if a threshold is outside [0, 1] or a structural
    /// value is zero.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("score_threshold", self.score_threshold),
            ("confidence_threshold_mid", self.confidence_threshold_mid),
            ("audit_high_severity_penalty", self.audit_high_severity_penalty),
            ("filter.similarity_threshold", self.filter.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config {
                    message: format!("{name} must be in [0, 1], got {value}"),
                });
            }
        }
        if self.max_iterations == 0 {
            return Err(Error::Config {
                message: "max_iterations must be >= 1".to_string(),
            });
        }
        if self.max_context_chars == 0 {
            return Err(Error::Config {
                message: "max_context_chars must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Content filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Token-Jaccard similarity at or above which a later chunk is dropped
    /// as a near-duplicate of an earlier one.
    pub similarity_threshold: f64,
    /// Section labels dropped as boilerplate (matched case-insensitively).
    pub boilerplate_sections: Vec<String>,
    /// Watermark tokens stripped from chunk text.
    pub watermark_tokens: Vec<String>,
    /// A line appearing on at least this many pages is treated as a
    /// repeated header/footer and stripped.
    pub header_min_page_count: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.90,
            boilerplate_sections: [
                "references",
                "acknowledgements",
                "funding",
                "conflicts",
                "author contributions",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            watermark_tokens: ["DRAFT", "CONFIDENTIAL"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            header_min_page_count: 3,
        }
    }
}

/// Tier thresholds and model routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Confidence thresholds for field tiers 1 through 5.
    ///
    /// A field declares its tier in the schema; an extracted value is
    /// accepted when its combined confidence meets the threshold for that
    /// field tier.
    pub thresholds: [f64; 5],
    /// Model used for the local-light tier.
    pub local_light_model: String,
    /// Model used for the local-standard tier.
    pub local_standard_model: String,
    /// Model used for the cloud-cheap tier.
    pub cloud_cheap_model: String,
    /// Model used for the cloud-premium tier.
    pub cloud_premium_model: String,
    /// Model used for relevance classification.
    pub classifier_model: String,
    /// Model used by the validator and auditor.
    pub checker_model: String,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            thresholds: [0.90, 0.85, 0.70, 0.60, 0.50],
            local_light_model: "llama3.2:3b".to_string(),
            local_standard_model: "qwen2.5:14b".to_string(),
            cloud_cheap_model: "gpt-4o-mini".to_string(),
            cloud_premium_model: "gpt-4o".to_string(),
            classifier_model: "llama3.2:3b".to_string(),
            checker_model: "qwen2.5:14b".to_string(),
        }
    }
}

impl TierConfig {
    /// Returns the confidence threshold for a 1-based field tier.
    ///
    /// Out-of-range tiers clamp to the outermost defined tier.
    #[must_use]
    pub fn threshold_for(&self, field_tier: u8) -> f64 {
        let index = usize::from(field_tier.clamp(1, 5)) - 1;
        self.thresholds[index]
    }
}

/// LLM transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Provider name resolved by the transport factory.
    pub provider: String,
    /// Base URL of the local OpenAI-compatible endpoint.
    pub local_base_url: String,
    /// Base URL of the cloud endpoint; empty means the provider default.
    pub cloud_base_url: String,
    /// Environment variable holding the cloud API key.
    pub api_key_env: String,
    /// Per-call deadline in seconds.
    pub deadline_secs: u64,
    /// Retry attempts per LLM call before the error propagates.
    pub max_retries: u32,
    /// Initial backoff between retries in milliseconds; doubles per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            provider: "openai-compat".to_string(),
            local_base_url: "http://localhost:11434/v1".to_string(),
            cloud_base_url: String::new(),
            api_key_env: "SR_EXTRACT_API_KEY".to_string(),
            deadline_secs: 120,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Batch circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive document failures that open the breaker.
    pub threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { threshold: 3 }
    }
}

/// Resource monitor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Used RAM above which worker count is halved.
    pub ram_throttle_gb: f64,
    /// Used RAM above which worker count drops to one.
    pub ram_ceiling_gb: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            ram_throttle_gb: 14.0,
            ram_ceiling_gb: 18.0,
        }
    }
}

/// Store locations for the cache, checkpoint, and review queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite file for the result cache.
    pub cache_db: PathBuf,
    /// JSON checkpoint file for batch state.
    pub state_checkpoint: PathBuf,
    /// SQLite file for the manual-review queue.
    pub review_db: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sr-extract");
        Self {
            cache_db: base.join("cache.db"),
            state_checkpoint: base.join("checkpoint.json"),
            review_db: base.join("review.db"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert!((config.score_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.max_iterations, 3);
        assert!((config.filter.similarity_threshold - 0.90).abs() < f64::EPSILON);
        assert_eq!(config.circuit_breaker.threshold, 3);
        assert!(!config.recall_boost_inferred);
    }

    #[test]
    fn test_default_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_tier_thresholds() {
        let tiers = TierConfig::default();
        assert!((tiers.threshold_for(1) - 0.90).abs() < f64::EPSILON);
        assert!((tiers.threshold_for(5) - 0.50).abs() < f64::EPSILON);
        // Out of range clamps instead of panicking.
        assert!((tiers.threshold_for(0) - 0.90).abs() < f64::EPSILON);
        assert!((tiers.threshold_for(9) - 0.50).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = PipelineConfig::from_toml_str(
            r#"
            score_threshold = 0.9
            [tiers]
            local_standard_model = "mistral:7b"
        "#,
        )
        .unwrap();
        assert!((config.score_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.tiers.local_standard_model, "mistral:7b");
        // Untouched sections keep defaults.
        assert_eq!(config.max_iterations, 3);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let result = PipelineConfig::from_toml_str("score_threshold = 1.5");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let result = PipelineConfig::from_toml_str("max_iterations = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_boilerplate_defaults() {
        let filter = FilterConfig::default();
        assert!(filter.boilerplate_sections.contains(&"references".to_string()));
        assert_eq!(filter.boilerplate_sections.len(), 5);
    }
}
