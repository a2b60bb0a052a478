//! Collection storage for plangraph.
//!
//! # Architecture
//!
//! ```text
//! StorageAdapter (trait)   - whole-collection load/save
//!     └── JsonlStorage     - one `.jsonl` file per collection, atomic rename
//!     └── MemoryStorage    - in-memory map for tests
//! ```

pub mod adapter;
pub mod error;
pub mod jsonl;
pub mod memory;

pub use adapter::{StorageAdapter, validate_collection_name};
pub use error::{Result, StorageError};
pub use jsonl::JsonlStorage;
pub use memory::MemoryStorage;

/// A stored record: one JSON object.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;
