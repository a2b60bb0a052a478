//! Embedding support for plangraph's semantic search.
//!
//! Provides the [`Embedder`] trait and its providers, the per-type
//! [`EmbedTextConfig`] deciding what text represents a record, and
//! [`content_hash`] used to detect stale vectors.

pub mod embedder;
pub mod error;
pub mod openai;
pub mod text;

pub use embedder::{
    DEFAULT_DIMENSIONS, Embedder, EmbedderSpec, HashEmbedder, NullEmbedder, SharedEmbedder,
    build_embedder, cosine_similarity,
};
pub use error::{EmbedError, Result};
pub use openai::{OpenAiEmbedder, OpenAiEmbedderConfig};
pub use text::{EmbedTextConfig, TEXT_SEPARATOR, content_hash};
