//! `SQLite` review queue implementation.

use crate::error::{Result, StorageError};
use crate::review::{ReviewCounts, ReviewItem, ReviewQueue, ReviewStatus};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS review_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_path TEXT NOT NULL,
    failure_reason TEXT NOT NULL,
    field_name TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    resolved_at INTEGER,
    resolution TEXT,
    resolved_value TEXT,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_review_status ON review_queue(status);
CREATE INDEX IF NOT EXISTS idx_review_paper ON review_queue(paper_path);

-- Enqueue idempotence: one item per (paper, field). NULL field names
-- collapse onto the empty string so whole-document failures dedupe too.
CREATE UNIQUE INDEX IF NOT EXISTS idx_review_dedup
    ON review_queue(paper_path, COALESCE(field_name, ''));
";

/// SQLite-backed manual review queue.
pub struct SqliteReviewQueue {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteReviewQueue {
    /// Opens or creates a review queue database at the given path.
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
        conn.execute_batch(SCHEMA_SQL).map_err(StorageError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Creates an in-memory queue, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(StorageError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            StorageError::Database("review queue lock poisoned".to_string()).into()
        })
    }

    #[allow(clippy::cast_possible_wrap)]
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewItem> {
        Ok(ReviewItem {
            id: row.get(0)?,
            paper_path: row.get(1)?,
            failure_reason: row.get(2)?,
            field_name: row.get(3)?,
            status: ReviewStatus::parse(&row.get::<_, String>(4)?),
            created_at: row.get(5)?,
            resolved_at: row.get(6)?,
            resolution: row.get(7)?,
            resolved_value: row.get(8)?,
            metadata: row
                .get::<_, Option<String>>(9)?
                .and_then(|raw| serde_json::from_str(&raw).ok()),
        })
    }
}

const ITEM_COLUMNS: &str = "id, paper_path, failure_reason, field_name, status, \
                            created_at, resolved_at, resolution, resolved_value, metadata";

impl ReviewQueue for SqliteReviewQueue {
    fn add(
        &self,
        paper_path: &str,
        failure_reason: &str,
        field_name: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let metadata = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(StorageError::from)?;
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                r"
            INSERT OR IGNORE INTO review_queue
                (paper_path, failure_reason, field_name, metadata, created_at)
            VALUES (?, ?, ?, ?, ?)
        ",
                params![paper_path, failure_reason, field_name, metadata, Self::now()],
            )
            .map_err(StorageError::from)?;

        if inserted > 0 {
            tracing::info!(paper = paper_path, field = ?field_name, "added to review queue");
            return Ok(conn.last_insert_rowid());
        }

        // Repeat enqueue: hand back the existing item's ID.
        let id: i64 = conn
            .query_row(
                r"
            SELECT id FROM review_queue
            WHERE paper_path = ? AND COALESCE(field_name, '') = COALESCE(?, '')
        ",
                params![paper_path, field_name],
                |row| row.get(0),
            )
            .map_err(StorageError::from)?;
        Ok(id)
    }

    fn get(&self, id: i64) -> Result<Option<ReviewItem>> {
        let conn = self.lock()?;
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM review_queue WHERE id = ?"),
                params![id],
                Self::row_to_item,
            )
            .optional()
            .map_err(StorageError::from)?;
        Ok(item)
    }

    fn list(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<ReviewItem>> {
        let conn = self.lock()?;
        let mut items = Vec::new();
        if let Some(status) = status {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM review_queue WHERE status = ? \
                     ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .map_err(StorageError::from)?;
            let rows = stmt
                .query_map(params![status.as_str(), limit as i64], Self::row_to_item)
                .map_err(StorageError::from)?;
            for row in rows {
                items.push(row.map_err(StorageError::from)?);
            }
        } else {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ITEM_COLUMNS} FROM review_queue \
                     ORDER BY created_at DESC, id DESC LIMIT ?"
                ))
                .map_err(StorageError::from)?;
            let rows = stmt
                .query_map(params![limit as i64], Self::row_to_item)
                .map_err(StorageError::from)?;
            for row in rows {
                items.push(row.map_err(StorageError::from)?);
            }
        }
        Ok(items)
    }

    fn resolve(&self, id: i64, resolution: &str, resolved_value: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                r"
            UPDATE review_queue
            SET status = 'resolved', resolution = ?, resolved_value = ?, resolved_at = ?
            WHERE id = ?
        ",
                params![resolution, resolved_value, Self::now(), id],
            )
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(StorageError::ItemNotFound { id }.into());
        }
        tracing::info!(id, "resolved review item");
        Ok(())
    }

    fn skip(&self, id: i64, reason: &str) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                r"
            UPDATE review_queue
            SET status = 'skipped', resolution = ?, resolved_at = ?
            WHERE id = ?
        ",
                params![reason, Self::now(), id],
            )
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(StorageError::ItemNotFound { id }.into());
        }
        tracing::info!(id, reason, "skipped review item");
        Ok(())
    }

    fn counts(&self) -> Result<ReviewCounts> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM review_queue GROUP BY status")
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(StorageError::from)?;

        let mut counts = ReviewCounts::default();
        for row in rows {
            let (status, count) = row.map_err(StorageError::from)?;
            #[allow(clippy::cast_sign_loss)]
            let count = count as u64;
            match ReviewStatus::parse(&status) {
                ReviewStatus::Pending => counts.pending = count,
                ReviewStatus::Resolved => counts.resolved = count,
                ReviewStatus::Skipped => counts.skipped = count,
            }
        }
        Ok(counts)
    }
}
