//! SQLite identity store.

use rollcall_core::codec::CodecError;
use rollcall_core::{GalleryError, GallerySource, GroupLabels, StoredEntry};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    identity_id  TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    department   TEXT,
    faculty      TEXT,
    level        TEXT,
    created_at   TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS embeddings (
    id            TEXT PRIMARY KEY,
    identity_id   TEXT NOT NULL REFERENCES identities(identity_id) ON DELETE CASCADE,
    vector        TEXT NOT NULL,
    model_version TEXT,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS embeddings_identity ON embeddings(identity_id);
";

/// Latest embedding per identity, in enrollment order.
const FETCH_ENROLLED: &str = "
SELECT i.identity_id, i.display_name, i.department, i.faculty, i.level, e.vector
FROM identities i
JOIN embeddings e ON e.rowid = (
    SELECT e2.rowid FROM embeddings e2
    WHERE e2.identity_id = i.identity_id
    ORDER BY e2.rowid DESC
    LIMIT 1
)
WHERE e.vector != ''
ORDER BY i.rowid
";

/// Identity rows with their embedding count and latest enrollment time.
const SUMMARY_SELECT: &str = "
SELECT i.identity_id, i.display_name, i.department, i.faculty, i.level,
       COUNT(e.id), MAX(e.created_at)
FROM identities i
LEFT JOIN embeddings e ON e.identity_id = i.identity_id
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding rejected: {0}")]
    InvalidEmbedding(#[from] CodecError),
    #[error("identity id must not be empty")]
    EmptyIdentityId,
}

/// One enrolled identity, as listed for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub identity_id: String,
    pub display_name: String,
    pub labels: GroupLabels,
    pub embeddings: usize,
    pub last_enrolled_at: Option<String>,
}

/// Handle to the identity database.
pub struct IdentityStore {
    pub(crate) conn: Connection,
}

impl IdentityStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "identity store opened");
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Rows with a non-empty stored vector, latest enrollment per identity.
    ///
    /// Vectors come back still serialized; decoding and dropping malformed
    /// ones is the gallery loader's job.
    pub fn fetch_rows(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let mut stmt = self.conn.prepare(FETCH_ENROLLED)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredEntry {
                    identity_id: row.get(0)?,
                    display_name: row.get(1)?,
                    labels: GroupLabels {
                        department: row.get(2)?,
                        faculty: row.get(3)?,
                        level: row.get(4)?,
                    },
                    serialized_vector: row.get::<_, String>(5)?.into_bytes(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(rows = rows.len(), "fetched enrolled rows");
        Ok(rows)
    }

    /// Every identity, with or without an embedding.
    pub fn list(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SUMMARY_SELECT} GROUP BY i.identity_id ORDER BY i.rowid"))?;
        let summaries = stmt
            .query_map([], summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Look up one identity.
    pub fn get(&self, identity_id: &str) -> Result<Option<IdentitySummary>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("{SUMMARY_SELECT} WHERE i.identity_id = ?1 GROUP BY i.identity_id"),
                params![identity_id],
                summary_from_row,
            )
            .optional()?)
    }

    /// Delete an identity and its embeddings. Returns whether it existed.
    pub fn remove(&self, identity_id: &str) -> Result<bool, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM identities WHERE identity_id = ?1",
            params![identity_id],
        )?;
        if removed > 0 {
            tracing::info!(identity = identity_id, "identity removed");
        }
        Ok(removed > 0)
    }

    /// Drop stored embeddings but keep the identity. It stops taking part
    /// in matching until re-enrolled.
    pub fn clear_embeddings(&self, identity_id: &str) -> Result<usize, StoreError> {
        let cleared = self.conn.execute(
            "DELETE FROM embeddings WHERE identity_id = ?1",
            params![identity_id],
        )?;
        tracing::info!(identity = identity_id, cleared, "embeddings cleared");
        Ok(cleared)
    }

    /// Number of identities that currently have an embedding.
    pub fn enrolled_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT identity_id) FROM embeddings",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub(crate) fn identity_exists(&self, identity_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM identities WHERE identity_id = ?1",
                params![identity_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }
}

fn summary_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentitySummary> {
    Ok(IdentitySummary {
        identity_id: row.get(0)?,
        display_name: row.get(1)?,
        labels: GroupLabels {
            department: row.get(2)?,
            faculty: row.get(3)?,
            level: row.get(4)?,
        },
        embeddings: row.get::<_, i64>(5)? as usize,
        last_enrolled_at: row.get(6)?,
    })
}

impl GallerySource for IdentityStore {
    fn fetch_enrolled_entries(&self) -> Result<Vec<StoredEntry>, GalleryError> {
        self.fetch_rows().map_err(|e| GalleryError::Load(e.to_string()))
    }
}
