//! Relevance classification response models.
//!
//! Providers answer the classification prompt in several near-shapes:
//! full records, bare lists of 0/1 integers, strings like `"yes"`, or
//! booleans. Coercion to structured records happens here, before typed
//! parsing, and never drops data: a bare value becomes a record with an
//! inferred reason.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// Relevance verdict for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRelevance {
    /// Chunk index the verdict applies to.
    pub index: usize,
    /// 1 if relevant, 0 otherwise.
    pub relevant: u8,
    /// Model-provided reason.
    pub reason: String,
    /// Model-provided confidence in [0, 1], defaulting to 0.5.
    pub confidence: f64,
}

impl ChunkRelevance {
    /// Whether the chunk was classified relevant.
    #[must_use]
    pub const fn is_relevant(&self) -> bool {
        self.relevant == 1
    }
}

/// Full classifier response: one verdict per chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelevanceResponse {
    /// Per-chunk verdicts.
    pub classifications: Vec<ChunkRelevance>,
}

impl<'de> Deserialize<'de> for RelevanceResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Wrapped {
                classifications: Vec<serde_json::Value>,
            },
            Bare(Vec<serde_json::Value>),
        }

        let items = match Shape::deserialize(deserializer)? {
            Shape::Wrapped { classifications } | Shape::Bare(classifications) => classifications,
        };
        Ok(Self {
            classifications: coerce_relevance_list(&items),
        })
    }
}

/// Coerces a heterogeneous classification list into structured records.
///
/// `[0, 1, 0]` becomes three records with inferred reasons; strings accept
/// the usual truthy spellings; records pass through with defaults filled.
/// Item positions supply the chunk index when a record omits one.
#[must_use]
pub fn coerce_relevance_list(items: &[serde_json::Value]) -> Vec<ChunkRelevance> {
    items
        .iter()
        .enumerate()
        .map(|(position, item)| coerce_item(position, item))
        .collect()
}

fn coerce_item(position: usize, item: &serde_json::Value) -> ChunkRelevance {
    match item {
        serde_json::Value::Object(map) => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let index = map
                .get("index")
                .and_then(serde_json::Value::as_u64)
                .map_or(position, |i| i as usize);
            let relevant = map.get("relevant").map_or(0, |v| truthy(v));
            let reason = map
                .get("reason")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("")
                .to_string();
            let confidence = map
                .get("confidence")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            ChunkRelevance {
                index,
                relevant,
                reason,
                confidence,
            }
        }
        bare => ChunkRelevance {
            index: position,
            relevant: truthy(bare),
            reason: "inferred".to_string(),
            confidence: 0.5,
        },
    }
}

fn truthy(value: &serde_json::Value) -> u8 {
    match value {
        serde_json::Value::Bool(b) => u8::from(*b),
        serde_json::Value::Number(n) => u8::from(n.as_f64().is_some_and(|f| f != 0.0)),
        serde_json::Value::String(s) => {
            let s = s.trim().to_lowercase();
            u8::from(matches!(s.as_str(), "1" | "true" | "yes" | "relevant"))
        }
        _ => 0,
    }
}
