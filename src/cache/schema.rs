//! Cache database schema.

/// Current cache schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for initial cache setup.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Parsed document text, keyed by content hash + parser version
CREATE TABLE IF NOT EXISTS document_cache (
    doc_hash TEXT NOT NULL,
    parser_version TEXT NOT NULL,
    parsed_text TEXT NOT NULL,
    metadata TEXT,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (doc_hash, parser_version)
);

-- Per-field extraction results
CREATE TABLE IF NOT EXISTS field_cache (
    fingerprint TEXT NOT NULL,
    field TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    payload TEXT NOT NULL,
    tier TEXT,
    confidence REAL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (fingerprint, field, schema_version)
);

-- Index for whole-document invalidation
CREATE INDEX IF NOT EXISTS idx_field_cache_fp ON field_cache(fingerprint);

-- Whole pipeline results
CREATE TABLE IF NOT EXISTS pipeline_cache (
    fingerprint TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (fingerprint, schema_version)
);

CREATE INDEX IF NOT EXISTS idx_pipeline_cache_fp ON pipeline_cache(fingerprint);
";

/// SQL to check if the schema is initialized.
pub const CHECK_SCHEMA_SQL: &str = r"
SELECT COUNT(*) FROM sqlite_master
WHERE type='table' AND name='schema_info';
";

/// SQL to set the schema version.
pub const SET_VERSION_SQL: &str = r"
INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version() {
        const _: () = assert!(CURRENT_SCHEMA_VERSION >= 1);
    }

    #[test]
    fn test_schema_sql_covers_namespaces() {
        assert!(SCHEMA_SQL.contains("document_cache"));
        assert!(SCHEMA_SQL.contains("field_cache"));
        assert!(SCHEMA_SQL.contains("pipeline_cache"));
    }
}
