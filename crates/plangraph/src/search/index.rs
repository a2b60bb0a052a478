//! Persisted per-type vector index.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use plangraph_embed::cosine_similarity;
use plangraph_storage::{JsonObject, StorageAdapter, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, StoreError};

/// One stored vector and the text it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub text: String,
    /// `content_hash` of `text`.
    pub hash: String,
    pub model_version: u32,
    pub vector: Vec<f32>,
}

impl VectorEntry {
    /// Whether this entry was produced from `hash` by model `version`.
    pub fn matches(&self, hash: &str, version: u32) -> bool {
        self.hash == hash && self.model_version == version
    }
}

/// Vectors for one namespace (one embeddable type), kept in memory and
/// written through to a collection named after the namespace.
pub struct VectorIndex {
    namespace: String,
    storage: Arc<dyn StorageAdapter>,
    entries: RwLock<BTreeMap<String, VectorEntry>>,
    write_gate: tokio::sync::Mutex<()>,
}

impl VectorIndex {
    pub fn new(namespace: impl Into<String>, storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            namespace: namespace.into(),
            storage,
            entries: RwLock::new(BTreeMap::new()),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Replace the in-memory entries with the persisted ones.
    pub async fn load(&self) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let objects = self
            .storage
            .load_collection(&self.namespace)
            .await
            .map_err(|e| StoreError::storage(&self.namespace, e))?;

        let mut entries = BTreeMap::new();
        for (position, object) in objects.into_iter().enumerate() {
            let entry: VectorEntry = serde_json::from_value(Value::Object(object)).map_err(|e| {
                StoreError::MalformedData {
                    collection: self.namespace.clone(),
                    reason: format!("vector {}: {}", position + 1, e),
                }
            })?;
            entries.insert(entry.id.clone(), entry);
        }

        let count = entries.len();
        *self.entries.write() = entries;
        debug!(namespace = %self.namespace, count, "Loaded vector index");
        Ok(count)
    }

    pub async fn upsert(&self, entry: VectorEntry) -> Result<()> {
        self.upsert_many(vec![entry]).await
    }

    /// Insert or replace entries, persisting once.
    pub async fn upsert_many(&self, batch: Vec<VectorEntry>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let _gate = self.write_gate.lock().await;
        let mut staged = self.entries.read().clone();
        for entry in batch {
            staged.insert(entry.id.clone(), entry);
        }
        self.persist(&staged).await?;
        *self.entries.write() = staged;
        Ok(())
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.remove_many(&[id.to_string()]).await? > 0)
    }

    /// Remove entries, persisting once. Returns how many existed.
    pub async fn remove_many(&self, ids: &[String]) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let mut staged = self.entries.read().clone();
        let removed = ids.iter().filter(|id| staged.remove(*id).is_some()).count();
        if removed == 0 {
            return Ok(0);
        }
        self.persist(&staged).await?;
        *self.entries.write() = staged;
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<VectorEntry> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Top-`k` entries by descending cosine similarity to `query`.
    ///
    /// Ties keep id order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(VectorEntry, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let entries = self.entries.read();
        let mut scored: Vec<(&VectorEntry, f32)> = entries
            .values()
            .map(|e| (e, cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored.into_iter().map(|(e, s)| (e.clone(), s)).collect()
    }

    async fn persist(&self, entries: &BTreeMap<String, VectorEntry>) -> Result<()> {
        let objects = entries
            .values()
            .map(to_object)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StoreError::storage(&self.namespace, StorageError::Serialization(e)))?;
        self.storage
            .save_collection(&self.namespace, &objects)
            .await
            .map_err(|e| StoreError::storage(&self.namespace, e))
    }
}

fn to_object(entry: &VectorEntry) -> serde_json::Result<JsonObject> {
    match serde_json::to_value(entry)? {
        Value::Object(map) => Ok(map),
        _ => Ok(JsonObject::new()),
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("namespace", &self.namespace)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plangraph_storage::MemoryStorage;

    fn entry(id: &str, vector: Vec<f32>) -> VectorEntry {
        VectorEntry {
            id: id.into(),
            text: format!("text of {id}"),
            hash: format!("hash-{id}"),
            model_version: 1,
            vector,
        }
    }

    #[tokio::test]
    async fn test_upsert_search_remove() {
        let index = VectorIndex::new("task", Arc::new(MemoryStorage::new()));
        index
            .upsert_many(vec![
                entry("a", vec![1.0, 0.0]),
                entry("b", vec![0.0, 1.0]),
                entry("c", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();
        assert_eq!(index.len(), 3);

        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, "a");
        assert_eq!(hits[1].0.id, "c");
        assert!(hits[0].1 > hits[1].1);

        assert!(index.search(&[1.0, 0.0], 0).is_empty());

        index.upsert(entry("a", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.search(&[1.0, 0.0], 1)[0].0.id, "c");

        assert!(index.remove("a").await.unwrap());
        assert!(!index.remove("a").await.unwrap());
        assert_eq!(index.ids(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_persisted_and_reloaded() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let index = VectorIndex::new("task", storage.clone());
        index.upsert(entry("a", vec![0.5, 0.5])).await.unwrap();

        let reloaded = VectorIndex::new("task", storage);
        assert_eq!(reloaded.load().await.unwrap(), 1);
        let stored = reloaded.get("a").unwrap();
        assert_eq!(stored, entry("a", vec![0.5, 0.5]));
        assert!(stored.matches("hash-a", 1));
        assert!(!stored.matches("hash-a", 2));
    }

    #[tokio::test]
    async fn test_malformed_entry_fails_load() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(MemoryStorage::new());
        let mut bad = JsonObject::new();
        bad.insert("id".into(), Value::String("a".into()));
        storage.save_collection("task", &[bad]).await.unwrap();

        let index = VectorIndex::new("task", storage);
        assert!(matches!(
            index.load().await,
            Err(StoreError::MalformedData { .. })
        ));
    }
}
