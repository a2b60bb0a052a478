//! The schema registry: every record type, relationship and transition table.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::entity::{EntitySchema, Validator};
use crate::error::{Result, SchemaError, ValidationError, Violation, ViolationKind};
use crate::record::Record;
use crate::relationship::Relationship;
use crate::transition::TransitionTable;

/// Immutable lookup of record shapes, relationships and transition tables.
///
/// Constructed explicitly with [`SchemaRegistry::builder`] and handed to the
/// repositories that need it; there is no global instance.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, Arc<EntitySchema>>,
    relationships: Vec<Relationship>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Option<Arc<EntitySchema>> {
        self.entities.get(name).cloned()
    }

    pub fn entity_by_collection(&self, collection: &str) -> Option<Arc<EntitySchema>> {
        self.entities
            .values()
            .find(|e| e.collection == collection)
            .cloned()
    }

    /// Registered type names, sorted.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Validator for `name`, as a trait object.
    pub fn validator(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.entity(name).map(|e| e as Arc<dyn Validator>)
    }

    /// Validate `input` as a record of type `name`.
    pub fn validate(
        &self,
        name: &str,
        input: &Value,
    ) -> std::result::Result<Record, ValidationError> {
        match self.entities.get(name) {
            Some(schema) => schema.validate(input),
            None => Err(ValidationError::new(
                name,
                vec![Violation::new("", ViolationKind::UnknownType)],
            )),
        }
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Relationships whose from-side is `name`.
    pub fn relationships_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Relationship> {
        self.relationships.iter().filter(move |r| r.from_type == name)
    }

    /// Relationships pointing at `name`.
    pub fn relationships_to<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Relationship> {
        self.relationships.iter().filter(move |r| r.to_type == name)
    }

    pub fn transitions(&self, name: &str) -> Option<&TransitionTable> {
        self.entities.get(name).and_then(|e| e.transitions.as_ref())
    }
}

/// Builder that checks cross-schema consistency on [`build`](Self::build).
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    entities: Vec<EntitySchema>,
    relationships: Vec<Relationship>,
}

impl SchemaRegistryBuilder {
    pub fn entity(mut self, schema: EntitySchema) -> Self {
        self.entities.push(schema);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Derive a relationship for every reference field that has none declared.
    pub fn infer_relationships(mut self) -> Self {
        let mut inferred = Vec::new();
        for schema in &self.entities {
            for (field, target) in schema.reference_fields() {
                let declared = self
                    .relationships
                    .iter()
                    .any(|r| r.from_type == schema.name && r.from_field == field.name);
                if declared {
                    continue;
                }
                let mut rel = Relationship::new(&schema.name, &field.name, target);
                if matches!(field.kind, crate::field::FieldKind::ReferenceList(_)) {
                    rel = rel.with_cardinality(crate::relationship::Cardinality::ManyToMany);
                }
                if field.required {
                    rel = rel.required();
                }
                inferred.push(rel);
            }
        }
        self.relationships.extend(inferred);
        self
    }

    pub fn build(self) -> Result<SchemaRegistry> {
        let mut entities = BTreeMap::new();
        let mut collections = HashSet::new();

        for schema in self.entities {
            check_fields(&schema)?;
            check_transitions(&schema)?;
            if !collections.insert(schema.collection.clone()) {
                return Err(SchemaError::DuplicateCollection(schema.collection));
            }
            let name = schema.name.clone();
            if entities.insert(name.clone(), Arc::new(schema)).is_some() {
                return Err(SchemaError::DuplicateType(name));
            }
        }

        for rel in &self.relationships {
            for (ty, field) in [(&rel.from_type, &rel.from_field), (&rel.to_type, &rel.to_field)] {
                let Some(schema) = entities.get(ty) else {
                    return Err(SchemaError::UnknownRelationshipType {
                        from_type: rel.from_type.clone(),
                        from_field: rel.from_field.clone(),
                        missing: ty.clone(),
                    });
                };
                if !schema.declares(field) {
                    return Err(SchemaError::UnknownRelationshipField {
                        entity_type: ty.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        debug!(
            entities = entities.len(),
            relationships = self.relationships.len(),
            "schema registry built"
        );

        Ok(SchemaRegistry {
            entities,
            relationships: self.relationships,
        })
    }
}

fn check_fields(schema: &EntitySchema) -> Result<()> {
    let mut seen = HashSet::new();
    for field in &schema.fields {
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                entity_type: schema.name.clone(),
                field: field.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_transitions(schema: &EntitySchema) -> Result<()> {
    let Some(table) = &schema.transitions else {
        return Ok(());
    };
    let Some(values) = schema.status_values() else {
        return Err(SchemaError::MissingStatusField(schema.name.clone()));
    };
    for t in table.iter() {
        for status in [&t.from, &t.to] {
            if !values.contains(status) {
                return Err(SchemaError::UnknownStatus {
                    entity_type: schema.name.clone(),
                    status: status.clone(),
                });
            }
        }
    }
    Ok(())
}
