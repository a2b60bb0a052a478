//! Per-type record shapes and the [`Validator`] seam.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DecodeError, ValidationError, Violation, ViolationKind};
use crate::field::{FieldKind, FieldSpec};
use crate::record::{EMBED_HASH_FIELD, EMBED_VERSION_FIELD, ID_FIELD, Record, STATUS_FIELD};
use crate::transition::TransitionTable;

/// Accepts or rejects arbitrary input for one record type.
///
/// On success the validator hands back a [`Record`]; on failure it reports
/// every violated constraint at once.
pub trait Validator: Send + Sync {
    /// The record type this validator guards.
    fn entity_type(&self) -> &str;

    /// Validate `input` as a whole.
    fn validate(&self, input: &Value) -> Result<Record, ValidationError>;

    /// Validate, then deserialize into a typed view.
    fn decode<T: DeserializeOwned>(&self, input: &Value) -> Result<T, DecodeError>
    where
        Self: Sized,
    {
        let record = self.validate(input)?;
        Ok(record.to_typed()?)
    }
}

/// Declared shape of one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    /// Type name (e.g. `task`).
    pub name: String,
    /// Collection name (e.g. `tasks`).
    pub collection: String,
    /// Declared fields, excluding the implicit `id`.
    pub fields: Vec<FieldSpec>,
    /// Reject fields that are not declared.
    pub strict: bool,
    /// Carries `embed_hash` / `embed_version` system fields.
    pub embeddable: bool,
    /// Legal status changes, for types with a `status` field.
    pub transitions: Option<TransitionTable>,
}

impl EntitySchema {
    pub fn builder(name: impl Into<String>, collection: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            schema: EntitySchema {
                name: name.into(),
                collection: collection.into(),
                fields: Vec::new(),
                strict: true,
                embeddable: false,
                transitions: None,
            },
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` is declared (the implicit `id` counts).
    pub fn declares(&self, name: &str) -> bool {
        name == ID_FIELD || self.field(name).is_some()
    }

    /// Allowed values of the `status` field, when it is an enum.
    pub fn status_values(&self) -> Option<&[String]> {
        match self.field(STATUS_FIELD).map(|f| &f.kind) {
            Some(FieldKind::Enum(values)) => Some(values),
            _ => None,
        }
    }

    /// Fields that reference other types, with their target type.
    pub fn reference_fields(&self) -> impl Iterator<Item = (&FieldSpec, &str)> {
        self.fields
            .iter()
            .filter_map(|f| f.kind.reference_target().map(|t| (f, t)))
    }

    fn collect_violations(&self, input: &Value) -> Vec<Violation> {
        let Some(map) = input.as_object() else {
            return vec![Violation::new("", ViolationKind::NotAnObject)];
        };

        let mut violations = Vec::new();

        match map.get(ID_FIELD) {
            Some(Value::String(id)) if !id.trim().is_empty() => {}
            _ => violations.push(Violation::new(ID_FIELD, ViolationKind::InvalidId)),
        }

        for spec in &self.fields {
            match map.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        violations.push(Violation::new(&spec.name, ViolationKind::MissingRequired));
                    }
                }
                Some(value) => spec.kind.check(&spec.name, value, &mut violations),
            }
        }

        if self.strict {
            for key in map.keys() {
                if !self.declares(key) {
                    violations.push(Violation::new(key, ViolationKind::UnknownField));
                }
            }
        }

        violations
    }
}

impl Validator for EntitySchema {
    fn entity_type(&self) -> &str {
        &self.name
    }

    fn validate(&self, input: &Value) -> Result<Record, ValidationError> {
        let violations = self.collect_violations(input);
        if !violations.is_empty() {
            return Err(ValidationError::new(&self.name, violations));
        }
        Record::from_value(input.clone()).map_err(|v| ValidationError::new(&self.name, vec![v]))
    }
}

/// Builder for [`EntitySchema`].
#[derive(Debug, Clone)]
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.schema.fields.push(FieldSpec::required(name, kind));
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.schema.fields.push(FieldSpec::optional(name, kind));
        self
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.schema.fields.push(spec);
        self
    }

    /// Required `status` enum field.
    pub fn status<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required(STATUS_FIELD, FieldKind::one_of(values))
    }

    /// Accept undeclared fields instead of rejecting them.
    pub fn lenient(mut self) -> Self {
        self.schema.strict = false;
        self
    }

    /// Declare the semantic-search system fields.
    pub fn embeddable(mut self) -> Self {
        self.schema.embeddable = true;
        self
    }

    pub fn transitions(mut self, table: TransitionTable) -> Self {
        self.schema.transitions = Some(table);
        self
    }

    pub fn build(mut self) -> EntitySchema {
        if self.schema.embeddable {
            for (name, kind) in [
                (EMBED_HASH_FIELD, FieldKind::Text),
                (EMBED_VERSION_FIELD, FieldKind::Integer),
            ] {
                if self.schema.field(name).is_none() {
                    self.schema.fields.push(FieldSpec::optional(name, kind));
                }
            }
        }
        self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn task_schema() -> EntitySchema {
        EntitySchema::builder("task", "tasks")
            .required("title", FieldKind::String)
            .required("priority", FieldKind::one_of(["low", "medium", "high"]))
            .status(["pending", "active", "done"])
            .optional("estimate", FieldKind::Number)
            .optional("epic_id", FieldKind::Reference("epic".into()))
            .embeddable()
            .build()
    }

    #[test]
    fn test_valid_record() {
        let schema = task_schema();
        let record = schema
            .validate(&json!({
                "id": "T1", "title": "Write docs", "priority": "low", "status": "pending"
            }))
            .unwrap();
        assert_eq!(record.id(), "T1");
        assert_eq!(record.status(), Some("pending"));
    }

    #[test]
    fn test_reports_every_missing_field() {
        let schema = task_schema();
        let err = schema
            .validate(&json!({"id": "T1", "status": "pending"}))
            .unwrap_err();
        assert_eq!(err.entity_type, "task");
        assert!(err.violations.len() >= 2);
        assert_eq!(err.for_field("title").count(), 1);
        assert_eq!(err.for_field("priority").count(), 1);
    }

    #[test]
    fn test_mixed_violations_all_reported() {
        let schema = task_schema();
        let err = schema
            .validate(&json!({
                "id": "",
                "title": 4,
                "priority": "urgent",
                "status": "pending",
                "colour": "red"
            }))
            .unwrap_err();
        let kinds: Vec<_> = err.violations.iter().map(|v| v.field.as_str()).collect();
        assert!(kinds.contains(&"id"));
        assert!(kinds.contains(&"title"));
        assert!(kinds.contains(&"priority"));
        assert!(kinds.contains(&"colour"));
    }

    #[test]
    fn test_null_optional_is_absent() {
        let schema = task_schema();
        assert!(
            schema
                .validate(&json!({
                    "id": "T1", "title": "x", "priority": "low", "status": "pending",
                    "estimate": null
                }))
                .is_ok()
        );
    }

    #[test]
    fn test_lenient_accepts_extra_fields() {
        let schema = EntitySchema::builder("note", "notes")
            .required("body", FieldKind::Text)
            .lenient()
            .build();
        assert!(schema.validate(&json!({"id": "N1", "body": "", "extra": 1})).is_ok());
    }

    #[test]
    fn test_embeddable_declares_system_fields() {
        let schema = task_schema();
        assert!(schema.declares("embed_hash"));
        assert!(schema.declares("embed_version"));
        let err = schema
            .validate(&json!({
                "id": "T1", "title": "x", "priority": "low", "status": "pending",
                "embed_version": "one"
            }))
            .unwrap_err();
        assert_eq!(err.for_field("embed_version").count(), 1);
    }

    #[test]
    fn test_status_values_and_references() {
        let schema = task_schema();
        assert_eq!(
            schema.status_values().unwrap(),
            &["pending".to_string(), "active".into(), "done".into()]
        );
        let refs: Vec<_> = schema.reference_fields().map(|(f, t)| (f.name.as_str(), t)).collect();
        assert_eq!(refs, vec![("epic_id", "epic")]);
    }

    #[test]
    fn test_decode_typed() {
        #[derive(Debug, Deserialize)]
        struct Task {
            id: String,
            title: String,
            estimate: Option<f64>,
        }
        let schema = task_schema();
        let task: Task = schema
            .decode(&json!({
                "id": "T1", "title": "x", "priority": "low", "status": "pending", "estimate": 2.5
            }))
            .unwrap();
        assert_eq!(task.id, "T1");
        assert_eq!(task.title, "x");
        assert_eq!(task.estimate, Some(2.5));

        let err = schema.decode::<Task>(&json!({"id": "T1"})).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }
}
