//! Embedded project-management entity graph.
//!
//! Records of each registered type live in one collection (a JSONL file on
//! disk), are validated against their schema on every write, and are queried
//! in memory. Embeddable types are additionally indexed for semantic search.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Database                                                            │
//! │  ├── Repository (one per type) ── StorageAdapter (records)           │
//! │  │        │ validate -> persist -> commit -> emit                     │
//! │  │        ▼                                                          │
//! │  ├── EventBus ──────────────────▶ SearchSync (background queue)      │
//! │  │                                     │                             │
//! │  └── SemanticSearch ◀──────────────────┘                             │
//! │        ├── VectorIndex (one per embeddable type) ── StorageAdapter   │
//! │        └── Embedder                                                  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use plangraph::{Database, PlangraphConfig};
//! use serde_json::json;
//!
//! # async fn example() -> plangraph::Result<()> {
//! let db = Database::open_with_config(&PlangraphConfig::default(), ".".as_ref()).await?;
//!
//! let tasks = db.repo("task")?;
//! tasks
//!     .insert(json!({"id": "T1", "title": "Draft roadmap", "status": "todo"}))
//!     .await?;
//! tasks.transition("T1", "in_progress").await?;
//!
//! let open = tasks.query().where_ne("status", "done").count();
//! assert_eq!(open, 1);
//!
//! db.flush_search().await;
//! if let Some(search) = db.search() {
//!     let hits = search.search("task", "roadmap", 5).await?;
//!     assert_eq!(hits[0].id, "T1");
//! }
//!
//! let report = db.validate_integrity();
//! println!("{} references checked", report.checked);
//! db.close().await;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod query;
pub mod repository;
pub mod search;

pub use database::{
    Database, DatabaseOptions, DatabaseStats, IntegrityReport, IntegrityViolation,
    IntegrityViolationKind, VECTORS_DIR, embedder_spec,
};
pub use error::{Result, StoreError};
pub use events::{EventBus, MutationEvent, MutationKind, SubscriptionId};
pub use logging::init_logging;
pub use query::{Query, compare_values};
pub use repository::Repository;
pub use search::{
    ProgressFn, SearchHit, SearchStats, SearchSync, SearchSyncStats, SemanticSearch, SyncPlan,
    SyncProgress, SyncReport, TypeSyncPlan, TypeSyncReport, UpsertOutcome, VectorEntry,
    VectorIndex,
};

pub use plangraph_config::PlangraphConfig;
pub use plangraph_schema::{Record, SchemaRegistry, project_registry};
