//! Tri-state findings and quantified values.
//!
//! A finding answers "was X observed?" with one of four explicit states,
//! optionally quantified as n out of N at a given aggregation unit. The
//! `n <= N` invariant is enforced by the constructor and survives
//! deserialization.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Tri-state answer for explicitly reported outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    /// The finding was reported present.
    Present,
    /// The finding was reported absent.
    Absent,
    /// The source did not report on the finding.
    NotReported,
    /// The source is ambiguous.
    Unclear,
}

/// Level at which a finding is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationUnit {
    /// Per patient.
    #[default]
    Patient,
    /// Per lesion.
    Lesion,
    /// Per specimen.
    Specimen,
    /// Per biopsy.
    Biopsy,
    /// Per imaging series.
    ImagingSeries,
    /// Aggregation level not determinable.
    Unclear,
}

/// Standard format for a binary finding with optional frequencies.
///
/// Deserialization routes through the constructor so an `n > N` report can
/// never be materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFindingReport")]
pub struct FindingReport {
    /// Reported status, if any.
    pub status: Option<FindingStatus>,

    /// Count with the finding.
    pub n: Option<u32>,

    /// Total assessed.
    #[serde(rename = "N")]
    pub total: Option<u32>,

    /// Aggregation level of n/N.
    pub aggregation_unit: AggregationUnit,

    /// Free-text note on aggregation.
    pub aggregation_note: Option<String>,

    /// Supporting quote from the source.
    pub evidence_quote: Option<String>,

    /// Extraction confidence in [0, 1].
    pub confidence: Option<f64>,
}

#[derive(Deserialize)]
struct RawFindingReport {
    #[serde(default)]
    status: Option<FindingStatus>,
    #[serde(default)]
    n: Option<u32>,
    #[serde(default, rename = "N")]
    total: Option<u32>,
    #[serde(default)]
    aggregation_unit: AggregationUnit,
    #[serde(default)]
    aggregation_note: Option<String>,
    #[serde(default)]
    evidence_quote: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl TryFrom<RawFindingReport> for FindingReport {
    type Error = crate::error::Error;

    fn try_from(raw: RawFindingReport) -> Result<Self> {
        let mut report = Self::new(raw.status, raw.n, raw.total)?;
        report.aggregation_unit = raw.aggregation_unit;
        report.aggregation_note = raw.aggregation_note;
        report.evidence_quote = raw.evidence_quote;
        report.confidence = raw.confidence.map(|c| c.clamp(0.0, 1.0));
        Ok(report)
    }
}

impl FindingReport {
    /// Creates a finding report, enforcing `n <= N` when both are set.
    ///
    /// # Errors
    ///
    /// Returns an error if the numerator exceeds the denominator.
    pub fn new(status: Option<FindingStatus>, n: Option<u32>, total: Option<u32>) -> Result<Self> {
        if let (Some(n), Some(total)) = (n, total)
            && n > total
        {
            return Err(PipelineError::InvalidInput(format!(
                "finding numerator ({n}) cannot exceed denominator ({total})"
            ))
            .into());
        }
        Ok(Self {
            status,
            n,
            total,
            aggregation_unit: AggregationUnit::default(),
            aggregation_note: None,
            evidence_quote: None,
            confidence: None,
        })
    }

    /// Creates a bare status-only report.
    #[must_use]
    pub const fn from_status(status: FindingStatus) -> Self {
        Self {
            status: Some(status),
            n: None,
            total: None,
            aggregation_unit: AggregationUnit::Patient,
            aggregation_note: None,
            evidence_quote: None,
            confidence: None,
        }
    }

    /// Returns the frequency n/N as a fraction, when both are set and
    /// N is nonzero.
    #[must_use]
    pub fn frequency(&self) -> Option<f64> {
        match (self.n, self.total) {
            (Some(n), Some(total)) if total > 0 => Some(f64::from(n) / f64::from(total)),
            _ => None,
        }
    }
}

/// Generic continuous measurement with normalization metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Text as it appeared in the source.
    pub raw_text: Option<String>,
    /// Lower end of a reported range.
    pub value_min: Option<f64>,
    /// Upper end of a reported range.
    pub value_max: Option<f64>,
    /// Point estimate when one is reported.
    pub value_point: Option<f64>,
    /// Unit, e.g. "years", "months", "mm".
    pub unit: Option<String>,
    /// Statistic kind, e.g. "mean", "median", "range".
    pub statistic: Option<String>,
}

/// Structured count with context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountValue {
    /// Text as it appeared in the source.
    pub raw_text: Option<String>,
    /// The count.
    pub count: Option<u32>,
    /// Counted unit, e.g. "patients", "lesions".
    pub unit: Option<String>,
}
