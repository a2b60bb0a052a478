//! Field declarations and per-value checks.

use serde_json::Value;

use crate::error::{Violation, ViolationKind};

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty string.
    String,
    /// Free text, may be empty.
    Text,
    Integer,
    Number,
    Boolean,
    /// RFC 3339 timestamp string.
    Timestamp,
    /// String restricted to a literal set.
    Enum(Vec<String>),
    /// Array of strings.
    StringList,
    /// Foreign key (string) into another type.
    Reference(String),
    /// Array of foreign keys into another type.
    ReferenceList(String),
    /// Arbitrary JSON object.
    Object,
    /// Any JSON value.
    Any,
}

impl FieldKind {
    /// Convenience constructor for enum fields.
    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(values.into_iter().map(Into::into).collect())
    }

    /// Target type when this field is a reference.
    pub fn reference_target(&self) -> Option<&str> {
        match self {
            Self::Reference(t) | Self::ReferenceList(t) => Some(t),
            _ => None,
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            Self::String | Self::Text | Self::Timestamp | Self::Enum(_) | Self::Reference(_) => {
                "string"
            }
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::StringList | Self::ReferenceList(_) => "array of strings",
            Self::Object => "object",
            Self::Any => "any value",
        }
    }

    /// Check `value` against this kind, appending violations for `field`.
    pub(crate) fn check(&self, field: &str, value: &Value, out: &mut Vec<Violation>) {
        let wrong_type = || {
            Violation::new(
                field,
                ViolationKind::WrongType {
                    expected: self.expected(),
                },
            )
        };

        match self {
            Self::Any => {}
            Self::String | Self::Reference(_) => match value.as_str() {
                Some(s) if s.trim().is_empty() => {
                    out.push(Violation::new(field, ViolationKind::EmptyString))
                }
                Some(_) => {}
                None => out.push(wrong_type()),
            },
            Self::Text => {
                if !value.is_string() {
                    out.push(wrong_type());
                }
            }
            Self::Integer => {
                if !(value.is_i64() || value.is_u64()) {
                    out.push(wrong_type());
                }
            }
            Self::Number => {
                if !value.is_number() {
                    out.push(wrong_type());
                }
            }
            Self::Boolean => {
                if !value.is_boolean() {
                    out.push(wrong_type());
                }
            }
            Self::Timestamp => match value.as_str() {
                Some(s) => {
                    if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                        out.push(Violation::new(field, ViolationKind::InvalidTimestamp));
                    }
                }
                None => out.push(wrong_type()),
            },
            Self::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => {}
                Some(_) => out.push(Violation::new(
                    field,
                    ViolationKind::NotInEnum {
                        allowed: allowed.clone(),
                    },
                )),
                None => out.push(wrong_type()),
            },
            Self::StringList | Self::ReferenceList(_) => match value.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if !item.is_string() {
                            out.push(Violation::new(
                                format!("{field}[{i}]"),
                                ViolationKind::WrongType { expected: "string" },
                            ));
                        }
                    }
                }
                None => out.push(wrong_type()),
            },
            Self::Object => {
                if !value.is_object() {
                    out.push(wrong_type());
                }
            }
        }
    }
}

/// A declared field on an entity schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn violations(kind: &FieldKind, value: Value) -> Vec<Violation> {
        let mut out = Vec::new();
        kind.check("f", &value, &mut out);
        out
    }

    #[test]
    fn test_string_rejects_empty_and_non_string() {
        assert!(violations(&FieldKind::String, json!("x")).is_empty());
        assert_eq!(
            violations(&FieldKind::String, json!("  "))[0].kind,
            ViolationKind::EmptyString
        );
        assert!(matches!(
            violations(&FieldKind::String, json!(3))[0].kind,
            ViolationKind::WrongType { .. }
        ));
        assert!(violations(&FieldKind::Text, json!("")).is_empty());
    }

    #[test]
    fn test_numeric_kinds() {
        assert!(violations(&FieldKind::Integer, json!(3)).is_empty());
        assert!(!violations(&FieldKind::Integer, json!(3.5)).is_empty());
        assert!(violations(&FieldKind::Number, json!(3.5)).is_empty());
        assert!(!violations(&FieldKind::Number, json!("3")).is_empty());
        assert!(violations(&FieldKind::Boolean, json!(false)).is_empty());
    }

    #[test]
    fn test_timestamp() {
        assert!(violations(&FieldKind::Timestamp, json!("2024-05-01T10:00:00Z")).is_empty());
        assert_eq!(
            violations(&FieldKind::Timestamp, json!("yesterday"))[0].kind,
            ViolationKind::InvalidTimestamp
        );
    }

    #[test]
    fn test_enum() {
        let kind = FieldKind::one_of(["low", "high"]);
        assert!(violations(&kind, json!("low")).is_empty());
        assert!(matches!(
            violations(&kind, json!("medium"))[0].kind,
            ViolationKind::NotInEnum { .. }
        ));
    }

    #[test]
    fn test_lists_report_each_bad_element() {
        let kind = FieldKind::ReferenceList("task".into());
        let out = violations(&kind, json!(["T1", 2, null]));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].field, "f[1]");
        assert_eq!(out[1].field, "f[2]");
        assert_eq!(kind.reference_target(), Some("task"));
    }
}
