//! Error types for the store.

use plangraph_schema::ValidationError;
use plangraph_storage::StorageError;
use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("schema error: {0}")]
    Schema(#[from] plangraph_schema::SchemaError),

    #[error("{collection}: record '{id}' not found")]
    NotFound { collection: String, id: String },

    #[error("{collection}: record '{id}' already exists")]
    DuplicateId { collection: String, id: String },

    #[error("{entity_type} '{id}': illegal transition {from} -> {to}")]
    IllegalTransition {
        entity_type: String,
        id: String,
        from: String,
        to: String,
    },

    #[error("{entity_type} '{id}': precondition '{tag}' not met")]
    PreconditionFailed {
        entity_type: String,
        id: String,
        tag: String,
    },

    #[error("entity type '{0}' has no transition table")]
    NoTransitions(String),

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("storage error in collection '{collection}': {source}")]
    Storage {
        collection: String,
        #[source]
        source: StorageError,
    },

    #[error("malformed data in collection '{collection}': {reason}")]
    MalformedData { collection: String, reason: String },

    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] plangraph_embed::EmbedError),

    #[error("configuration error: {0}")]
    Config(#[from] plangraph_config::ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl StoreError {
    pub(crate) fn storage(collection: &str, source: StorageError) -> Self {
        match source {
            StorageError::Malformed { line, reason, .. } => Self::MalformedData {
                collection: collection.to_string(),
                reason: format!("line {line}: {reason}"),
            },
            source => Self::Storage {
                collection: collection.to_string(),
                source,
            },
        }
    }

    pub(crate) fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    /// Whether the failed operation left every piece of state untouched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound { .. }
                | Self::DuplicateId { .. }
                | Self::IllegalTransition { .. }
                | Self::PreconditionFailed { .. }
                | Self::NoTransitions(_)
                | Self::InvalidPatch(_)
                | Self::UnknownEntityType(_)
        )
    }
}
