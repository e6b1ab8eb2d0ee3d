//! hadir-store — SQLite-backed identifier → embedding records.
//!
//! One row per enrolled identity. Identifiers are unique; enrollment only
//! ever inserts, never overwrites.

use chrono::{DateTime, Utc};
use hadir_core::{Embedding, IdentityStore, NewIdentity};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod legacy;

pub use legacy::ImportSummary;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("identifier '{0}' already exists")]
    Duplicate(String),
    #[error("identifier '{0}' not found")]
    NotFound(String),
    #[error("embedding for '{identifier}' has dimension {dim}, expected {expected}")]
    InvalidEmbedding {
        identifier: String,
        dim: usize,
        expected: usize,
    },
    #[error("corrupt record '{identifier}': {reason}")]
    Corrupt { identifier: String, reason: String },
}

/// A stored identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityRecord {
    pub id: String,
    pub identifier: String,
    pub embedding: Embedding,
    /// Samples averaged into the embedding. `None` for imported records.
    pub sample_count: Option<usize>,
    /// Mean quality of those samples. `None` for imported records.
    pub mean_quality: Option<f32>,
    pub created_at: DateTime<Utc>,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self { conn };
        store.init_schema()?;

        tracing::info!(path = %path.display(), "identity store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY,
                identifier TEXT NOT NULL UNIQUE,
                embedding TEXT NOT NULL,
                sample_count INTEGER,
                mean_quality REAL,
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn contains(&self, identifier: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM identities WHERE identifier = ?1",
                params![identifier],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a freshly enrolled identity. Fails with
    /// [`StoreError::Duplicate`] if the identifier exists.
    pub fn insert(&self, identity: &NewIdentity) -> Result<IdentityRecord, StoreError> {
        let record = IdentityRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: identity.identifier.clone(),
            embedding: identity.embedding.clone(),
            sample_count: Some(identity.sample_count),
            mean_quality: Some(identity.mean_quality),
            created_at: Utc::now(),
        };
        insert_record(&self.conn, &record)?;
        tracing::info!(identifier = %record.identifier, id = %record.id, "identity stored");
        Ok(record)
    }

    pub fn get(&self, identifier: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, identifier, embedding, sample_count, mean_quality, created_at
                 FROM identities WHERE identifier = ?1",
                params![identifier],
                RawRecord::from_row,
            )
            .optional()?;
        row.map(RawRecord::into_record).transpose()
    }

    /// All identities, ordered by identifier.
    pub fn list(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identifier, embedding, sample_count, mean_quality, created_at
             FROM identities ORDER BY identifier",
        )?;
        let rows = stmt.query_map([], RawRecord::from_row)?;
        rows.map(|row| row.map_err(StoreError::from).and_then(RawRecord::into_record))
            .collect()
    }

    pub fn remove(&self, identifier: &str) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM identities WHERE identifier = ?1", params![identifier])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(identifier.to_string()));
        }
        tracing::info!(identifier, "identity removed");
        Ok(())
    }
}

impl IdentityStore for SqliteStore {
    type Error = StoreError;

    fn contains(&self, identifier: &str) -> Result<bool, StoreError> {
        SqliteStore::contains(self, identifier)
    }

    fn insert_new(&mut self, identity: &NewIdentity) -> Result<(), StoreError> {
        self.insert(identity).map(|_| ())
    }
}

fn insert_record(conn: &Connection, record: &IdentityRecord) -> Result<(), StoreError> {
    let embedding = serde_json::to_string(&record.embedding.values)?;
    let result = conn.execute(
        "INSERT INTO identities (id, identifier, embedding, sample_count, mean_quality, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.identifier,
            embedding,
            record.sample_count.map(|n| n as i64),
            record.mean_quality.map(f64::from),
            record.created_at.to_rfc3339(),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(StoreError::Duplicate(record.identifier.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Row as read from SQLite, before JSON and timestamp decoding.
struct RawRecord {
    id: String,
    identifier: String,
    embedding: String,
    sample_count: Option<i64>,
    mean_quality: Option<f64>,
    created_at: String,
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            identifier: row.get(1)?,
            embedding: row.get(2)?,
            sample_count: row.get(3)?,
            mean_quality: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<IdentityRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            identifier: self.identifier.clone(),
            reason,
        };
        let values: Vec<f32> = serde_json::from_str(&self.embedding)
            .map_err(|e| corrupt(format!("embedding: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(IdentityRecord {
            id: self.id,
            identifier: self.identifier,
            embedding: Embedding::new(values),
            sample_count: self.sample_count.map(|n| n.max(0) as usize),
            mean_quality: self.mean_quality.map(|q| q as f32),
            created_at,
        })
    }
}
