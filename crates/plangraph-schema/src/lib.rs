//! Schema registry for plangraph.
//!
//! Declares the shape of every record type, the foreign-key relationships
//! between types and the legal state-machine transitions of `status` fields.
//! Everything here is pure data and predicate evaluation: no I/O.
//!
//! # Usage
//!
//! ```
//! use plangraph_schema::{EntitySchema, FieldKind, SchemaRegistry, TransitionTable, Validator};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::builder()
//!     .entity(
//!         EntitySchema::builder("task", "tasks")
//!             .required("title", FieldKind::String)
//!             .status(["pending", "active", "done"])
//!             .transitions(TransitionTable::from_pairs([
//!                 ("pending", "active"),
//!                 ("active", "done"),
//!             ]))
//!             .build(),
//!     )
//!     .build()?;
//!
//! let task = registry.entity("task").unwrap();
//! let record = task.validate(&json!({"id": "T1", "title": "x", "status": "pending"}))?;
//! assert_eq!(record.id(), "T1");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod entity;
pub mod error;
pub mod field;
pub mod project;
pub mod record;
pub mod registry;
pub mod relationship;
pub mod transition;

pub use entity::{EntitySchema, EntitySchemaBuilder, Validator};
pub use error::{DecodeError, Result, SchemaError, ValidationError, Violation, ViolationKind};
pub use field::{FieldKind, FieldSpec};
pub use project::project_registry;
pub use record::{
    EMBED_HASH_FIELD, EMBED_VERSION_FIELD, ID_FIELD, JsonObject, Record, STATUS_FIELD,
};
pub use registry::{SchemaRegistry, SchemaRegistryBuilder};
pub use relationship::{Cardinality, Relationship};
pub use transition::{Transition, TransitionTable};
