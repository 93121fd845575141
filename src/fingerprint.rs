//! Deterministic content fingerprints used as cache keys.
//!
//! Fingerprints are computed over document text only, so the same paper
//! stored under two filenames shares one fingerprint. Cache keys combine
//! the fingerprint with the schema version: bumping the version is a hard
//! cache miss by construction.

/// Computes the blake3 fingerprint of a document's full text.
///
/// # Examples
///
/// ```
/// use sr_extract::fingerprint::document_fingerprint;
///
/// let a = document_fingerprint("We enrolled 50 patients.");
/// let b = document_fingerprint("We enrolled 50 patients.");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[must_use]
pub fn document_fingerprint(full_text: &str) -> String {
    blake3::hash(full_text.as_bytes()).to_hex().to_string()
}

/// Builds the pipeline-result cache key for (fingerprint, schema version).
#[must_use]
pub fn pipeline_key(fingerprint: &str, schema_version: u32) -> String {
    format!("{fingerprint}:v{schema_version}")
}

/// Builds the field-result cache key for (fingerprint, field, schema version).
#[must_use]
pub fn field_key(fingerprint: &str, field: &str, schema_version: u32) -> String {
    format!("{fingerprint}:{field}:v{schema_version}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let text = "DOI: 10.1234/test. Published 2024.";
        assert_eq!(document_fingerprint(text), document_fingerprint(text));
    }

    #[test]
    fn test_fingerprint_differs_on_content() {
        assert_ne!(document_fingerprint("a"), document_fingerprint("b"));
    }

    #[test]
    fn test_fingerprint_ignores_filename() {
        // Identity is content, not provenance: callers hash full_text only.
        let text = "Same content, different file.";
        assert_eq!(document_fingerprint(text), document_fingerprint(text));
    }

    #[test]
    fn test_pipeline_key_embeds_version() {
        let fp = document_fingerprint("text");
        let v1 = pipeline_key(&fp, 1);
        let v2 = pipeline_key(&fp, 2);
        assert_ne!(v1, v2);
        assert!(v1.ends_with(":v1"));
    }

    #[test]
    fn test_field_key_distinct_per_field() {
        let fp = document_fingerprint("text");
        assert_ne!(field_key(&fp, "doi", 1), field_key(&fp, "year", 1));
        assert_ne!(field_key(&fp, "doi", 1), field_key(&fp, "doi", 2));
    }
}
