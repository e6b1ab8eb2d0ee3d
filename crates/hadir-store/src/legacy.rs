//! Interchange with the flat JSON database of earlier deployments:
//! a single object mapping identifier to its embedding array.

use crate::{insert_record, IdentityRecord, SqliteStore, StoreError};
use chrono::Utc;
use hadir_core::{Embedding, EMBEDDING_DIM};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Outcome of [`SqliteStore::import_json`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Identifiers already present; their stored records are kept.
    pub skipped: usize,
}

impl SqliteStore {
    /// Import every identifier not yet enrolled.
    ///
    /// The whole file is validated before anything is written, and all
    /// inserts happen in one transaction.
    pub fn import_json(&mut self, path: &Path) -> Result<ImportSummary, StoreError> {
        let src = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: BTreeMap<String, Vec<f32>> = serde_json::from_str(&src)?;

        for (identifier, values) in &entries {
            if values.len() != EMBEDDING_DIM {
                return Err(StoreError::InvalidEmbedding {
                    identifier: identifier.clone(),
                    dim: values.len(),
                    expected: EMBEDDING_DIM,
                });
            }
        }

        let mut summary = ImportSummary::default();
        let tx = self.conn.transaction()?;
        for (identifier, values) in entries {
            let identifier = identifier.trim().to_string();
            if identifier.is_empty() {
                tracing::warn!("skipping entry with empty identifier");
                summary.skipped += 1;
                continue;
            }
            let record = IdentityRecord {
                id: uuid::Uuid::new_v4().to_string(),
                identifier,
                embedding: Embedding::new(values),
                sample_count: None,
                mean_quality: None,
                created_at: Utc::now(),
            };
            match insert_record(&tx, &record) {
                Ok(()) => summary.imported += 1,
                Err(StoreError::Duplicate(id)) => {
                    tracing::debug!(identifier = %id, "already enrolled; skipped");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        tx.commit()?;

        tracing::info!(
            path = %path.display(),
            imported = summary.imported,
            skipped = summary.skipped,
            "imported JSON identities"
        );
        Ok(summary)
    }

    /// Write every identity as `{identifier: [f32; 128]}` with 4-space
    /// indentation. Returns the number of identities written.
    pub fn export_json(&self, path: &Path) -> Result<usize, StoreError> {
        let records = self.list()?;
        let entries: BTreeMap<&str, &[f32]> = records
            .iter()
            .map(|r| (r.identifier.as_str(), r.embedding.values.as_slice()))
            .collect();

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        entries.serialize(&mut ser)?;

        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        file.write_all(&buf).map_err(io_err)?;

        tracing::info!(path = %path.display(), count = entries.len(), "exported JSON identities");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hadir_core::NewIdentity;

    fn vector(seed: f32) -> Vec<f32> {
        (0..EMBEDDING_DIM).map(|i| seed + i as f32 * 0.5).collect()
    }

    fn write_json(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_import_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let body = serde_json::json!({
            "alice": vector(1.0),
            "bob": vector(2.0),
        })
        .to_string();
        let path = write_json(dir.path(), "database.json", &body);

        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .insert(&NewIdentity {
                identifier: "bob".into(),
                embedding: Embedding::new(vector(9.0)),
                sample_count: 10,
                mean_quality: 80.0,
            })
            .unwrap();

        let summary = store.import_json(&path).unwrap();
        assert_eq!(summary, ImportSummary { imported: 1, skipped: 1 });

        let alice = store.get("alice").unwrap().unwrap();
        assert_eq!(alice.embedding.values, vector(1.0));
        assert_eq!(alice.sample_count, None);
        // Existing record is not overwritten.
        assert_eq!(store.get("bob").unwrap().unwrap().embedding.values, vector(9.0));
    }

    #[test]
    fn test_import_rejects_wrong_dimension_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let body = serde_json::json!({
            "alice": vector(1.0),
            "zed": [0.1, 0.2],
        })
        .to_string();
        let path = write_json(dir.path(), "database.json", &body);

        let mut store = SqliteStore::open_in_memory().unwrap();
        let err = store.import_json(&path).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbedding { dim: 2, .. }));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_import_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_json(dir.path(), "database.json", "{\"alice\": ");
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.import_json(&path), Err(StoreError::Json(_))));
    }

    #[test]
    fn test_import_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();
        let err = store.import_json(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_export_then_import_into_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");

        let store = SqliteStore::open_in_memory().unwrap();
        for (id, seed) in [("bob", 2.0), ("alice", 1.0)] {
            store
                .insert(&NewIdentity {
                    identifier: id.into(),
                    embedding: Embedding::new(vector(seed)),
                    sample_count: 12,
                    mean_quality: 90.0,
                })
                .unwrap();
        }
        assert_eq!(store.export_json(&path).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"alice\": [\n        "));

        let mut fresh = SqliteStore::open_in_memory().unwrap();
        let summary = fresh.import_json(&path).unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(fresh.get("bob").unwrap().unwrap().embedding.values, vector(2.0));
    }
}
