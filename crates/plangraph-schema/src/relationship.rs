//! Foreign-key relationships between record types.

use std::fmt;

/// How many records sit on each side of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    /// Whether the from-field holds an array of keys.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneToOne => "one_to_one",
            Self::ManyToOne => "many_to_one",
            Self::OneToMany => "one_to_many",
            Self::ManyToMany => "many_to_many",
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge `from_type.from_field -> to_type.to_field`.
///
/// Relationships are descriptive: writes do not check them, the integrity
/// pass does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub from_type: String,
    pub from_field: String,
    pub to_type: String,
    pub to_field: String,
    pub cardinality: Cardinality,
    pub nullable: bool,
}

impl Relationship {
    /// A nullable many-to-one reference onto `to_type.id`.
    pub fn new(
        from_type: impl Into<String>,
        from_field: impl Into<String>,
        to_type: impl Into<String>,
    ) -> Self {
        Self {
            from_type: from_type.into(),
            from_field: from_field.into(),
            to_type: to_type.into(),
            to_field: crate::record::ID_FIELD.to_string(),
            cardinality: Cardinality::ManyToOne,
            nullable: true,
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Target a field other than `id`.
    pub fn to_field(mut self, field: impl Into<String>) -> Self {
        self.to_field = field.into();
        self
    }

    /// The from-field must always resolve.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{} ({})",
            self.from_type, self.from_field, self.to_type, self.to_field, self.cardinality
        )
    }
}
