//! Durable storage seams used by the dataset and classifier.
//!
//! Two small interfaces keep the core independent of where bytes end up: a
//! document store keyed by string, and a model-artifact store keyed by id.
//! A missing key is `Ok(None)`, never an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::app_dirs::AppDirError;

mod sqlite;

pub use sqlite::{DATABASE_FILE_NAME, SqliteStore};

/// Errors returned by storage backings.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("Could not create storage directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Dirs(#[from] AppDirError),
    #[error("Storage is unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store holding whole serialized documents.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn put(&mut self, key: &str, document: &str) -> Result<(), StorageError>;
    fn delete(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Store for serialized trained-model artifacts.
pub trait ModelStore {
    fn save_model(&mut self, id: &str, artifact: &str) -> Result<(), StorageError>;
    fn load_model(&self, id: &str) -> Result<Option<String>, StorageError>;
}

/// In-process store; clones share the same underlying maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    documents: HashMap<String, String>,
    models: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.documents.get(key).cloned())
    }

    fn put(&mut self, key: &str, document: &str) -> Result<(), StorageError> {
        self.lock()?
            .documents
            .insert(key.to_string(), document.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.lock()?.documents.remove(key);
        Ok(())
    }
}

impl ModelStore for MemoryStore {
    fn save_model(&mut self, id: &str, artifact: &str) -> Result<(), StorageError> {
        self.lock()?
            .models
            .insert(id.to_string(), artifact.to_string());
        Ok(())
    }

    fn load_model(&self, id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.models.get(id).cloned())
    }
}
