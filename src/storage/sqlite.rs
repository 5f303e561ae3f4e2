//! SQLite backing for documents and model artifacts.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::{KeyValueStore, ModelStore, StorageError};
use crate::app_dirs::AppPaths;

/// Filename of the application database under the app root.
pub const DATABASE_FILE_NAME: &str = "gesturelab.db";

/// Single-file store holding the dataset document and saved models.
pub struct SqliteStore {
    connection: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Open the default database under the application root.
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(AppPaths::resolve()?.database_file())
    }

    /// Open (or create) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        create_parent_if_needed(path)?;
        let connection = Connection::open(path)?;
        let store = Self {
            connection,
            path: path.to_path_buf(),
        };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply_pragmas(&self) -> Result<(), StorageError> {
        self.connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        Ok(())
    }

    fn apply_schema(&self) -> Result<(), StorageError> {
        self.connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
             CREATE TABLE IF NOT EXISTS models (
                id TEXT PRIMARY KEY,
                artifact TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .connection
            .prepare_cached("SELECT value FROM documents WHERE key = ?1")?
            .query_row(params![key], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(value)
    }

    fn put(&mut self, key: &str, document: &str) -> Result<(), StorageError> {
        self.connection
            .prepare_cached(
                "INSERT INTO documents (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?
            .execute(params![key, document])?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.connection
            .execute("DELETE FROM documents WHERE key = ?1", params![key])?;
        Ok(())
    }
}

impl ModelStore for SqliteStore {
    fn save_model(&mut self, id: &str, artifact: &str) -> Result<(), StorageError> {
        let saved_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        self.connection
            .prepare_cached(
                "INSERT INTO models (id, artifact, saved_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET artifact = excluded.artifact,
                                              saved_at = excluded.saved_at",
            )?
            .execute(params![id, artifact, saved_at])?;
        Ok(())
    }

    fn load_model(&self, id: &str) -> Result<Option<String>, StorageError> {
        let artifact = self
            .connection
            .prepare_cached("SELECT artifact FROM models WHERE id = ?1")?
            .query_row(params![id], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(artifact)
    }
}

fn create_parent_if_needed(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn documents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(DATABASE_FILE_NAME);
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.put("gestureData", r#"{"a":[]}"#).unwrap();
            store.put("gestureData", r#"{"b":[]}"#).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("gestureData").unwrap().as_deref(),
            Some(r#"{"b":[]}"#)
        );
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn delete_and_missing_keys() {
        let dir = tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("db.sqlite")).unwrap();
        assert_eq!(store.get("missing").unwrap(), None);
        store.put("k", "v").unwrap();
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        store.delete("k").unwrap();
    }

    #[test]
    fn model_artifacts_overwrite_by_id() {
        let dir = tempdir().unwrap();
        let mut store = SqliteStore::open(dir.path().join("db.sqlite")).unwrap();
        assert_eq!(store.load_model("gesture-model").unwrap(), None);
        store.save_model("gesture-model", "first").unwrap();
        store.save_model("gesture-model", "second").unwrap();
        assert_eq!(
            store.load_model("gesture-model").unwrap().as_deref(),
            Some("second")
        );
    }
}
