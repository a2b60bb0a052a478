//! Durable JSONL backend.
//!
//! Layout: `{root}/{collection}.jsonl`, one JSON object per line.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::adapter::{StorageAdapter, validate_collection_name};
use crate::{JsonObject, Result, StorageError};

const EXTENSION: &str = "jsonl";

/// One `.jsonl` file per collection under a root directory.
///
/// Saves go through a hidden sibling temp file that is synced and then
/// renamed over the target, so a crash mid-write leaves the previous file
/// intact. The root directory is created on first save.
#[derive(Debug, Clone)]
pub struct JsonlStorage {
    root: PathBuf,
}

impl JsonlStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to a collection's file.
    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{EXTENSION}"))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!(".{name}.{EXTENSION}.{}.tmp", Uuid::new_v4()))
    }
}

/// Parse JSONL text. Blank lines are skipped; anything else must be an object.
pub(crate) fn parse_lines(collection: &str, text: &str) -> Result<Vec<JsonObject>> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: String| StorageError::Malformed {
            collection: collection.to_string(),
            line: idx + 1,
            reason,
        };
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => records.push(map),
            Ok(other) => {
                return Err(malformed(format!(
                    "expected a JSON object, found {}",
                    kind_of(&other)
                )));
            }
            Err(e) => return Err(malformed(e.to_string())),
        }
    }
    Ok(records)
}

/// Serialize records as JSONL: every line `\n` terminated, no blank lines.
pub(crate) fn render_lines(records: &[JsonObject]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl StorageAdapter for JsonlStorage {
    async fn load_collection(&self, name: &str) -> Result<Vec<JsonObject>> {
        validate_collection_name(name)?;
        let path = self.collection_path(name);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        let records = parse_lines(name, &text)?;
        debug!(collection = name, count = records.len(), "Loaded collection");
        Ok(records)
    }

    async fn save_collection(&self, name: &str, records: &[JsonObject]) -> Result<()> {
        validate_collection_name(name)?;
        let body = render_lines(records)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;

        let tmp = self.temp_path(name);
        let target = self.collection_path(name);

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(body.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &target).await
        };

        if let Err(e) = write.await {
            // The target is untouched; only the temp file needs cleaning up.
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(target, e));
        }

        trace!(collection = name, count = records.len(), "Saved collection");
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        validate_collection_name(name)?;
        let path = self.collection_path(name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(stem) = file_name.strip_suffix(".jsonl")
                && validate_collection_name(stem).is_ok()
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let path = self.collection_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(collection = name, "Deleted collection");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_storage() -> (tempfile::TempDir, JsonlStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonlStorage::new(dir.path().join("data"));
        (dir, storage)
    }

    fn obj(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, storage) = temp_storage();
        let records = vec![
            obj(json!({"id": "T1", "title": "first"})),
            obj(json!({"id": "T2", "title": "second\nline", "tags": ["a", "b"]})),
        ];

        storage.save_collection("tasks", &records).await.unwrap();
        let loaded = storage.load_collection("tasks").await.unwrap();
        assert_eq!(loaded, records);

        let text = std::fs::read_to_string(storage.collection_path("tasks")).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
        assert!(!text.contains("\n\n"));
    }

    #[tokio::test]
    async fn test_missing_collection_is_empty() {
        let (_dir, storage) = temp_storage();
        assert!(storage.load_collection("tasks").await.unwrap().is_empty());
        assert!(!storage.has_collection("tasks").await.unwrap());
        assert!(storage.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_collection_is_empty_file() {
        let (_dir, storage) = temp_storage();
        storage.save_collection("tasks", &[]).await.unwrap();
        assert!(storage.has_collection("tasks").await.unwrap());
        let text = std::fs::read_to_string(storage.collection_path("tasks")).unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_blank_lines_tolerated() {
        let (_dir, storage) = temp_storage();
        std::fs::create_dir_all(storage.root()).unwrap();
        std::fs::write(
            storage.collection_path("tasks"),
            "{\"id\":\"T1\"}\n\n   \n{\"id\":\"T2\"}\n",
        )
        .unwrap();
        let loaded = storage.load_collection("tasks").await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_line_is_fatal() {
        let (_dir, storage) = temp_storage();
        std::fs::create_dir_all(storage.root()).unwrap();
        std::fs::write(
            storage.collection_path("tasks"),
            "{\"id\":\"T1\"}\n{\"id\": oops\n",
        )
        .unwrap();
        let err = storage.load_collection("tasks").await.unwrap_err();
        match err {
            StorageError::Malformed {
                collection, line, ..
            } => {
                assert_eq!(collection, "tasks");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_object_line_is_fatal() {
        let (_dir, storage) = temp_storage();
        std::fs::create_dir_all(storage.root()).unwrap();
        std::fs::write(storage.collection_path("tasks"), "[1,2]\n").unwrap();
        assert!(matches!(
            storage.load_collection("tasks").await,
            Err(StorageError::Malformed { line: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_leftover_temp_file_ignored() {
        let (_dir, storage) = temp_storage();
        let records = vec![obj(json!({"id": "T1"}))];
        storage.save_collection("tasks", &records).await.unwrap();

        // A crashed writer leaves a partial temp file behind.
        let partial = storage.root().join(".tasks.jsonl.deadbeef.tmp");
        std::fs::write(&partial, "{\"id\":\"T2\"").unwrap();

        assert_eq!(storage.load_collection("tasks").await.unwrap(), records);
        assert_eq!(storage.list_collections().await.unwrap(), vec!["tasks"]);

        storage
            .save_collection("tasks", &[obj(json!({"id": "T3"}))])
            .await
            .unwrap();
        let loaded = storage.load_collection("tasks").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0]["id"], "T3");
    }

    #[tokio::test]
    async fn test_no_temp_files_after_save() {
        let (_dir, storage) = temp_storage();
        for i in 0..3 {
            storage
                .save_collection("tasks", &[obj(json!({"id": format!("T{i}")}))])
                .await
                .unwrap();
        }
        let leftovers: Vec<_> = std::fs::read_dir(storage.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (_dir, storage) = temp_storage();
        storage.save_collection("tasks", &[]).await.unwrap();
        storage.save_collection("epics", &[]).await.unwrap();
        std::fs::write(storage.root().join("README.md"), "not a collection").unwrap();

        assert_eq!(
            storage.list_collections().await.unwrap(),
            vec!["epics", "tasks"]
        );

        storage.delete_collection("tasks").await.unwrap();
        storage.delete_collection("tasks").await.unwrap();
        assert_eq!(storage.list_collections().await.unwrap(), vec!["epics"]);
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let (_dir, storage) = temp_storage();
        assert!(matches!(
            storage.load_collection("../etc").await,
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            storage.save_collection("a/b", &[]).await,
            Err(StorageError::InvalidName(_))
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn record_strategy() -> impl Strategy<Value = JsonObject> {
        ("[a-zA-Z0-9]{1,12}", any::<String>(), any::<i64>(), any::<bool>()).prop_map(
            |(id, text, n, flag)| {
                let mut map = JsonObject::new();
                map.insert("id".into(), Value::String(id));
                map.insert("text".into(), Value::String(text));
                map.insert("n".into(), Value::from(n));
                map.insert("flag".into(), Value::Bool(flag));
                map
            },
        )
    }

    proptest! {
        /// Property: any set of records, including strings with newlines and
        /// control characters, loads back exactly as saved.
        #[test]
        fn save_then_load_round_trips(records in prop::collection::vec(record_strategy(), 0..8)) {
            let dir = tempfile::tempdir().unwrap();
            let storage = JsonlStorage::new(dir.path());
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let loaded = rt.block_on(async {
                storage.save_collection("records", &records).await.unwrap();
                storage.load_collection("records").await.unwrap()
            });

            prop_assert_eq!(loaded, records);
        }
    }
}
