//! Identified, immutable record snapshots.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Violation, ViolationKind};

/// A JSON object as stored on disk.
pub type JsonObject = Map<String, Value>;

/// Name of the identifier field every record carries.
pub const ID_FIELD: &str = "id";

/// Name of the state-machine field checked against transition tables.
pub const STATUS_FIELD: &str = "status";

/// Digest of the text last embedded for this record.
pub const EMBED_HASH_FIELD: &str = "embed_hash";

/// Embedding model version that produced the record's vector.
pub const EMBED_VERSION_FIELD: &str = "embed_version";

/// A record: a JSON object that always carries a non-empty string `id`.
///
/// Records are snapshots. Mutation goes through a repository, which builds a
/// new validated `Record` and swaps it into its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JsonObject", into = "JsonObject")]
pub struct Record {
    fields: JsonObject,
}

impl Record {
    /// Wrap a JSON object, checking only the `id` invariant.
    pub fn from_object(fields: JsonObject) -> Result<Self, Violation> {
        match fields.get(ID_FIELD) {
            Some(Value::String(id)) if !id.trim().is_empty() => Ok(Self { fields }),
            _ => Err(Violation::new(ID_FIELD, ViolationKind::InvalidId)),
        }
    }

    /// Wrap any JSON value, which must be an object with a valid `id`.
    pub fn from_value(value: Value) -> Result<Self, Violation> {
        match value {
            Value::Object(map) => Self::from_object(map),
            _ => Err(Violation::new("", ViolationKind::NotAnObject)),
        }
    }

    /// The record identifier.
    pub fn id(&self) -> &str {
        // Invariant established by every constructor.
        self.fields
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of `field`, if present and a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.fields.get(field).and_then(Value::as_u64)
    }

    /// Current value of the `status` field.
    pub fn status(&self) -> Option<&str> {
        self.get_str(STATUS_FIELD)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &JsonObject {
        &self.fields
    }

    pub fn into_object(self) -> JsonObject {
        self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Shallow merge-patch: keys in `patch` replace existing keys, a `null`
    /// value removes the key. Returns the merged object without validating it.
    pub fn merged(&self, patch: &JsonObject) -> JsonObject {
        let mut merged = self.fields.clone();
        for (key, value) in patch {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Keep only `fields` (plus `id`).
    pub fn project(&self, fields: &[String]) -> Self {
        let mut projected = JsonObject::new();
        if let Some(id) = self.fields.get(ID_FIELD) {
            projected.insert(ID_FIELD.to_string(), id.clone());
        }
        for name in fields {
            if let Some(value) = self.fields.get(name) {
                projected.insert(name.clone(), value.clone());
            }
        }
        Self { fields: projected }
    }

    /// Deserialize into a caller-defined typed view.
    pub fn to_typed<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.to_value())
    }
}

impl TryFrom<JsonObject> for Record {
    type Error = String;

    fn try_from(fields: JsonObject) -> Result<Self, Self::Error> {
        Self::from_object(fields).map_err(|v| v.to_string())
    }
}

impl From<Record> for JsonObject {
    fn from(record: Record) -> Self {
        record.fields
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_requires_string_id() {
        assert!(Record::from_value(json!({"id": "T1"})).is_ok());
        assert_eq!(
            Record::from_value(json!({"title": "x"})).unwrap_err().kind,
            ViolationKind::InvalidId
        );
        assert!(Record::from_value(json!({"id": ""})).is_err());
        assert!(Record::from_value(json!({"id": 7})).is_err());
        assert_eq!(
            Record::from_value(json!([1, 2])).unwrap_err().kind,
            ViolationKind::NotAnObject
        );
    }

    #[test]
    fn test_merged_replaces_and_removes() {
        let r = record(json!({"id": "T1", "title": "a", "notes": "n"}));
        let patch = json!({"title": "b", "notes": null, "owner": "sam"});
        let merged = r.merged(patch.as_object().unwrap());
        assert_eq!(merged.get("title"), Some(&json!("b")));
        assert_eq!(merged.get("owner"), Some(&json!("sam")));
        assert!(!merged.contains_key("notes"));
        // Original snapshot untouched.
        assert_eq!(r.get_str("title"), Some("a"));
    }

    #[test]
    fn test_project_keeps_id() {
        let r = record(json!({"id": "T1", "title": "a", "score": 3}));
        let p = r.project(&["score".to_string()]);
        assert_eq!(p.id(), "T1");
        assert_eq!(p.get("score"), Some(&json!(3)));
        assert!(!p.contains("title"));
    }

    #[test]
    fn test_serde_roundtrip_enforces_id() {
        let r = record(json!({"id": "T1", "status": "pending"}));
        let text = serde_json::to_string(&r).unwrap();
        let back: Record = serde_json::from_str(&text).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.status(), Some("pending"));
        assert!(serde_json::from_str::<Record>(r#"{"title":"no id"}"#).is_err());
    }

    #[test]
    fn test_to_typed() {
        #[derive(Deserialize)]
        struct Task {
            id: String,
            title: String,
        }
        let r = record(json!({"id": "T1", "title": "write docs"}));
        let task: Task = r.to_typed().unwrap();
        assert_eq!(task.id, "T1");
        assert_eq!(task.title, "write docs");
    }
}
