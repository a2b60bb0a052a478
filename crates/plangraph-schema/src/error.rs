//! Error types for schema validation and registry construction.

use std::fmt;

use thiserror::Error;

/// What went wrong with a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// A required field is absent (or null).
    MissingRequired,
    /// The value has the wrong JSON type.
    WrongType {
        /// Human-readable description of the expected type.
        expected: &'static str,
    },
    /// The value is not one of the declared enum values.
    NotInEnum {
        /// The allowed values.
        allowed: Vec<String>,
    },
    /// The field is not declared and the schema is strict.
    UnknownField,
    /// The value is not an RFC 3339 timestamp.
    InvalidTimestamp,
    /// A non-empty string was required.
    EmptyString,
    /// The input as a whole is not a JSON object.
    NotAnObject,
    /// The `id` field is missing, empty or not a string.
    InvalidId,
    /// The field may not change once written.
    Immutable,
    /// No schema is registered under the requested type name.
    UnknownType,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequired => f.write_str("required field is missing"),
            Self::WrongType { expected } => write!(f, "expected {expected}"),
            Self::NotInEnum { allowed } => write!(f, "must be one of [{}]", allowed.join(", ")),
            Self::UnknownField => f.write_str("field is not declared"),
            Self::InvalidTimestamp => f.write_str("expected an RFC 3339 timestamp"),
            Self::EmptyString => f.write_str("must not be empty"),
            Self::NotAnObject => f.write_str("expected a JSON object"),
            Self::InvalidId => f.write_str("id must be a non-empty string"),
            Self::Immutable => f.write_str("field cannot be changed"),
            Self::UnknownType => f.write_str("unknown record type"),
        }
    }
}

/// A single violated constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field path the violation refers to (`""` for the record as a whole).
    pub field: String,
    /// The violated constraint.
    pub kind: ViolationKind,
}

impl Violation {
    pub fn new(field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.field, self.kind)
        }
    }
}

/// Validation failure carrying every violated constraint, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {entity_type}: {}", join_violations(.violations))]
pub struct ValidationError {
    /// Record type that was being validated.
    pub entity_type: String,
    /// Every violation found.
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(entity_type: impl Into<String>, violations: Vec<Violation>) -> Self {
        Self {
            entity_type: entity_type.into(),
            violations,
        }
    }

    /// Violations that refer to `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Violation> + 'a {
        self.violations.iter().filter(move |v| v.field == field)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure to produce a typed view of a record.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The input does not match the declared shape.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The record is valid but does not fit the requested Rust type.
    #[error("record does not fit the requested type: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Errors raised while assembling a [`SchemaRegistry`](crate::SchemaRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Two schemas share a type name.
    #[error("duplicate entity type '{0}'")]
    DuplicateType(String),

    /// Two schemas share a collection name.
    #[error("duplicate collection '{0}'")]
    DuplicateCollection(String),

    /// A relationship references an undeclared type.
    #[error("relationship {from_type}.{from_field} references unknown type '{missing}'")]
    UnknownRelationshipType {
        from_type: String,
        from_field: String,
        missing: String,
    },

    /// A relationship references an undeclared field.
    #[error("relationship references undeclared field {entity_type}.{field}")]
    UnknownRelationshipField { entity_type: String, field: String },

    /// A transition table was declared without a `status` enum field.
    #[error("entity '{0}' declares transitions but has no status enum field")]
    MissingStatusField(String),

    /// A transition references a status outside the declared enum.
    #[error("entity '{entity_type}' transition references unknown status '{status}'")]
    UnknownStatus { entity_type: String, status: String },

    /// A field was declared twice on the same schema.
    #[error("entity '{entity_type}' declares field '{field}' more than once")]
    DuplicateField { entity_type: String, field: String },
}

/// Result type alias for registry construction.
pub type Result<T> = std::result::Result<T, SchemaError>;
