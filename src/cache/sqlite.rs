//! `SQLite` cache implementation.
//!
//! One file, three namespaces, WAL mode for concurrent readers. The
//! connection sits behind a mutex so workers share a single handle;
//! hit/miss/set counters are lock-free.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use crate::cache::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, SCHEMA_SQL, SET_VERSION_SQL,
};
use crate::cache::traits::{CacheStats, CachedDocument, CachedField, ResultCache};
use crate::core::{PipelineResult, Tier};
use crate::error::{Result, StorageError};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// SQLite-backed result cache.
///
/// # Examples
///
/// ```
/// use sr_extract::cache::SqliteCache;
///
/// let cache = SqliteCache::in_memory().unwrap();
/// ```
pub struct SqliteCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl SqliteCache {
    /// Opens or creates a cache database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(e.to_string()))?;
        }

        let conn = Connection::open(&path).map_err(StorageError::from)?;
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Self::init(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        })
    }

    /// Creates an in-memory cache, for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(conn: &Connection) -> Result<()> {
        let is_init: i64 = conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        if is_init == 0 {
            conn.execute_batch(SCHEMA_SQL).map_err(StorageError::from)?;
            conn.execute(SET_VERSION_SQL, params![CURRENT_SCHEMA_VERSION.to_string()])
                .map_err(StorageError::from)?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            StorageError::Database("cache connection lock poisoned".to_string()).into()
        })
    }

    fn record_lookup<T>(&self, found: &Option<T>) {
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl ResultCache for SqliteCache {
    fn get_document(&self, doc_hash: &str, parser_version: &str) -> Result<Option<CachedDocument>> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                r"
            SELECT parsed_text, metadata, parser_version, created_at
            FROM document_cache WHERE doc_hash = ? AND parser_version = ?
        ",
                params![doc_hash, parser_version],
                |row| {
                    Ok(CachedDocument {
                        parsed_text: row.get(0)?,
                        metadata: row
                            .get::<_, Option<String>>(1)?
                            .and_then(|raw| serde_json::from_str(&raw).ok())
                            .unwrap_or(serde_json::Value::Null),
                        parser_version: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        drop(conn);
        self.record_lookup(&found);
        Ok(found)
    }

    fn set_document(
        &self,
        doc_hash: &str,
        parsed_text: &str,
        metadata: &serde_json::Value,
        parser_version: &str,
    ) -> Result<()> {
        let metadata = serde_json::to_string(metadata).map_err(StorageError::from)?;
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT OR REPLACE INTO document_cache
                (doc_hash, parser_version, parsed_text, metadata, created_at)
            VALUES (?, ?, ?, ?, ?)
        ",
            params![doc_hash, parser_version, parsed_text, metadata, Self::now()],
        )
        .map_err(StorageError::from)?;
        drop(conn);
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get_field(
        &self,
        fingerprint: &str,
        field: &str,
        schema_version: u32,
    ) -> Result<Option<CachedField>> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                r"
            SELECT payload, tier, confidence, created_at
            FROM field_cache WHERE fingerprint = ? AND field = ? AND schema_version = ?
        ",
                params![fingerprint, field, schema_version],
                |row| {
                    Ok(CachedField {
                        payload: serde_json::from_str(&row.get::<_, String>(0)?)
                            .unwrap_or(serde_json::Value::Null),
                        tier: row
                            .get::<_, Option<String>>(1)?
                            .and_then(|raw| serde_json::from_str::<Tier>(&format!("\"{raw}\"")).ok()),
                        confidence: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)?;
        drop(conn);
        self.record_lookup(&found);
        Ok(found)
    }

    fn set_field(
        &self,
        fingerprint: &str,
        field: &str,
        schema_version: u32,
        entry: &CachedField,
    ) -> Result<()> {
        let payload = serde_json::to_string(&entry.payload).map_err(StorageError::from)?;
        let tier = entry.tier.map(|t| t.as_str().to_string());
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT OR REPLACE INTO field_cache
                (fingerprint, field, schema_version, payload, tier, confidence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
            params![
                fingerprint,
                field,
                schema_version,
                payload,
                tier,
                entry.confidence,
                Self::now()
            ],
        )
        .map_err(StorageError::from)?;
        drop(conn);
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get_pipeline(
        &self,
        fingerprint: &str,
        schema_version: u32,
    ) -> Result<Option<PipelineResult>> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload FROM pipeline_cache WHERE fingerprint = ? AND schema_version = ?",
                params![fingerprint, schema_version],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        drop(conn);

        let found = match raw {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(StorageError::from)?),
            None => None,
        };
        self.record_lookup(&found);
        Ok(found)
    }

    fn set_pipeline(
        &self,
        fingerprint: &str,
        schema_version: u32,
        result: &PipelineResult,
    ) -> Result<()> {
        let payload = serde_json::to_string(result).map_err(StorageError::from)?;
        let conn = self.lock()?;
        conn.execute(
            r"
            INSERT OR REPLACE INTO pipeline_cache
                (fingerprint, schema_version, payload, created_at)
            VALUES (?, ?, ?, ?)
        ",
            params![fingerprint, schema_version, payload, Self::now()],
        )
        .map_err(StorageError::from)?;
        drop(conn);
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn invalidate_document(&self, fingerprint: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM document_cache WHERE doc_hash = ?",
            params![fingerprint],
        )
        .map_err(StorageError::from)?;
        conn.execute(
            "DELETE FROM field_cache WHERE fingerprint = ?",
            params![fingerprint],
        )
        .map_err(StorageError::from)?;
        conn.execute(
            "DELETE FROM pipeline_cache WHERE fingerprint = ?",
            params![fingerprint],
        )
        .map_err(StorageError::from)?;
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock()?;
        let cached_documents: i64 = conn
            .query_row("SELECT COUNT(*) FROM document_cache", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        let cached_fields: i64 = conn
            .query_row("SELECT COUNT(*) FROM field_cache", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        let cached_pipelines: i64 = conn
            .query_row("SELECT COUNT(*) FROM pipeline_cache", [], |row| row.get(0))
            .map_err(StorageError::from)?;
        drop(conn);

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            cached_documents: cached_documents as u64,
            cached_fields: cached_fields as u64,
            cached_pipelines: cached_pipelines as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_result(fingerprint: &str) -> PipelineResult {
        PipelineResult {
            filename: "paper.pdf".to_string(),
            fingerprint: fingerprint.to_string(),
            data: std::collections::BTreeMap::new(),
            evidence: Vec::new(),
            checker: crate::core::CheckerResult::default(),
            iteration_count: 1,
            iteration_history: Vec::new(),
            relevant_chunks_count: 3,
            filter_stats: crate::core::FilterStats::default(),
            relevance_stats: crate::core::RelevanceStats::default(),
            tier_used: std::collections::BTreeMap::new(),
            field_confidence: std::collections::BTreeMap::new(),
            route: crate::core::RouteDecision::AutoApprove,
            confidence_breakdown: crate::core::ConfidenceBreakdown::default(),
            usage: crate::core::TokenUsage::default(),
            elapsed_ms: 10,
            timestamp: 0,
        }
    }

    #[test]
    fn test_document_cache_round_trip() {
        let cache = SqliteCache::in_memory().unwrap();
        cache
            .set_document("hash1", "Sample text", &json!({"source": "test.pdf"}), "v1")
            .unwrap();
        let cached = cache.get_document("hash1", "v1").unwrap().unwrap();
        assert_eq!(cached.parsed_text, "Sample text");
        assert_eq!(cached.metadata, json!({"source": "test.pdf"}));
        // Different parser version is a miss.
        assert!(cache.get_document("hash1", "v2").unwrap().is_none());
    }

    #[test]
    fn test_field_cache_version_mismatch_is_miss() {
        let cache = SqliteCache::in_memory().unwrap();
        let entry = CachedField {
            payload: json!({"value": 45}),
            tier: Some(Tier::LocalStandard),
            confidence: Some(0.95),
            created_at: 0,
        };
        cache.set_field("fp", "patient_age", 1, &entry).unwrap();

        let hit = cache.get_field("fp", "patient_age", 1).unwrap().unwrap();
        assert_eq!(hit.payload, json!({"value": 45}));
        assert_eq!(hit.tier, Some(Tier::LocalStandard));

        assert!(cache.get_field("fp", "patient_age", 2).unwrap().is_none());
    }

    #[test]
    fn test_pipeline_cache_round_trip() {
        let cache = SqliteCache::in_memory().unwrap();
        let result = sample_result("fp");
        cache.set_pipeline("fp", 1, &result).unwrap();
        let cached = cache.get_pipeline("fp", 1).unwrap().unwrap();
        assert_eq!(cached, result);
        assert!(cache.get_pipeline("fp", 2).unwrap().is_none());
    }

    #[test]
    fn test_invalidation_purges_all_namespaces() {
        let cache = SqliteCache::in_memory().unwrap();
        cache
            .set_document("fp", "text", &json!({}), "v1")
            .unwrap();
        cache
            .set_field(
                "fp",
                "age",
                1,
                &CachedField {
                    payload: json!(52),
                    tier: None,
                    confidence: None,
                    created_at: 0,
                },
            )
            .unwrap();
        cache.set_pipeline("fp", 1, &sample_result("fp")).unwrap();

        cache.invalidate_document("fp").unwrap();
        assert!(cache.get_document("fp", "v1").unwrap().is_none());
        assert!(cache.get_field("fp", "age", 1).unwrap().is_none());
        assert!(cache.get_pipeline("fp", 1).unwrap().is_none());
    }

    #[test]
    fn test_stats_counters() {
        let cache = SqliteCache::in_memory().unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.cached_documents, 0);

        cache.set_document("fp", "text", &json!({}), "v1").unwrap();
        let _ = cache.get_document("fp", "v1").unwrap();
        let _ = cache.get_document("missing", "v1").unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.cached_documents, 1);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let cache = SqliteCache::open(&path).unwrap();
        assert_eq!(cache.path(), Some(path.as_path()));
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = SqliteCache::open(&path).unwrap();
            cache.set_document("fp", "text", &json!({}), "v1").unwrap();
        }
        let cache = SqliteCache::open(&path).unwrap();
        assert!(cache.get_document("fp", "v1").unwrap().is_some());
    }
}
