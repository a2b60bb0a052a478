//! Which fields of a record make up its embedding text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Default separator placed between the rendered fields.
pub const TEXT_SEPARATOR: &str = "\n";

/// Per-type ordered field lists.
///
/// Types that are absent from the map are not embeddable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedTextConfig {
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
}

fn default_separator() -> String {
    TEXT_SEPARATOR.to_string()
}

impl Default for EmbedTextConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            fields: BTreeMap::new(),
        }
    }
}

impl EmbedTextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join rendered fields with `separator` instead of a newline.
    ///
    /// Changing it changes every text hash, so the next startup sync
    /// re-embeds everything.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Embed `entity_type` using `fields`, in that order.
    pub fn with_type<I, S>(mut self, entity_type: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.insert(
            entity_type.into(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Field lists for the default project registry.
    pub fn project_defaults() -> Self {
        Self::new()
            .with_type("project", ["name", "description", "goals"])
            .with_type("epic", ["title", "description"])
            .with_type("task", ["title", "description", "tags"])
            .with_type(
                "decision",
                ["title", "context", "decision", "consequences", "alternatives"],
            )
            .with_type("risk", ["title", "description", "mitigation"])
            .with_type("issue", ["title", "description"])
            .with_type("requirement", ["title", "description", "acceptance_criteria"])
            .with_type("meeting", ["title", "summary"])
            .with_type("assumption", ["statement", "rationale"])
            .with_type("lesson", ["title", "what_happened", "takeaway"])
            .with_type("note", ["title", "body", "tags"])
            .with_type("objective", ["title", "description"])
            .with_type("feature", ["title", "description"])
            .with_type(
                "user_story",
                ["title", "as_a", "i_want", "so_that", "acceptance_criteria"],
            )
            .with_type("release", ["title", "version", "notes"])
            .with_type("retrospective", ["title", "went_well", "to_improve"])
            .with_type("change_request", ["title", "description", "impact"])
            .with_type("constraint", ["title", "description"])
            .with_type("document", ["title", "summary", "tags"])
            .with_type("glossary_term", ["term", "definition", "aliases"])
    }

    pub fn is_embeddable(&self, entity_type: &str) -> bool {
        self.fields.contains_key(entity_type)
    }

    pub fn embeddable_types(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Text to embed for `record`, or `None` when there is nothing to embed.
    pub fn text_for(&self, entity_type: &str, record: &Map<String, Value>) -> Option<String> {
        let fields = self.fields.get(entity_type)?;
        let parts: Vec<String> = fields
            .iter()
            .filter_map(|field| record.get(field).and_then(render))
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(&self.separator))
        }
    }
}

fn render(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(render)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Lowercase hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_text_for_joins_in_declared_order() {
        let config = EmbedTextConfig::new().with_type("task", ["title", "description", "tags"]);
        let record = obj(json!({
            "id": "T1",
            "tags": ["api", "", "db"],
            "title": "Ship it",
            "description": "  "
        }));
        assert_eq!(
            config.text_for("task", &record).as_deref(),
            Some("Ship it\napi, db")
        );
    }

    #[test]
    fn test_text_for_none_cases() {
        let config = EmbedTextConfig::new().with_type("task", ["title"]);
        assert!(config.text_for("epic", &obj(json!({"title": "x"}))).is_none());
        assert!(config.text_for("task", &obj(json!({"id": "T1"}))).is_none());
        assert!(config.text_for("task", &obj(json!({"title": ""}))).is_none());
    }

    #[test]
    fn test_scalars_rendered() {
        let config = EmbedTextConfig::new().with_type("x", ["n", "b"]);
        assert_eq!(
            config.text_for("x", &obj(json!({"n": 3, "b": true}))).as_deref(),
            Some("3\ntrue")
        );
    }

    #[test]
    fn test_custom_separator() {
        let config = EmbedTextConfig::new()
            .with_separator(" | ")
            .with_type("task", ["title", "description"]);
        assert_eq!(
            config
                .text_for("task", &obj(json!({"title": "a", "description": "b"})))
                .as_deref(),
            Some("a | b")
        );
    }

    #[test]
    fn test_separator_defaults_when_deserialized() {
        let config: EmbedTextConfig =
            serde_json::from_value(json!({"fields": {"task": ["title"]}})).unwrap();
        assert_eq!(config.separator, "\n");
        assert!(config.is_embeddable("task"));
    }

    #[test]
    fn test_project_defaults() {
        let config = EmbedTextConfig::project_defaults();
        assert!(config.is_embeddable("task"));
        assert!(!config.is_embeddable("stakeholder"));
        assert_eq!(config.embeddable_types().count(), 20);
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("abc").len(), 64);
        assert_ne!(content_hash("a"), content_hash("b"));
    }
}
