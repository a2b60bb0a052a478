//! In-memory backend for tests and ephemeral databases.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::adapter::{StorageAdapter, validate_collection_name};
use crate::{JsonObject, Result};

/// Collections held in a `HashMap`.
///
/// Loads and saves copy, so callers never alias stored data.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    collections: RwLock<HashMap<String, Vec<JsonObject>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn load_collection(&self, name: &str) -> Result<Vec<JsonObject>> {
        validate_collection_name(name)?;
        Ok(self
            .collections
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_collection(&self, name: &str, records: &[JsonObject]) -> Result<()> {
        validate_collection_name(name)?;
        self.collections
            .write()
            .insert(name.to_string(), records.to_vec());
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        validate_collection_name(name)?;
        Ok(self.collections.read().contains_key(name))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        self.collections.write().remove(name);
        Ok(())
    }
}
