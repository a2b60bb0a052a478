//! The [`Embedder`] trait and the offline providers.
//!
//! # Implementations
//!
//! - [`NullEmbedder`]: zero vectors, for databases with search switched off
//! - [`HashEmbedder`]: deterministic unit vectors derived from the text
//! - [`OpenAiEmbedder`](crate::OpenAiEmbedder): OpenAI-compatible `/embeddings` API

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EmbedError, Result};
use crate::openai::{OpenAiEmbedder, OpenAiEmbedderConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Embedder Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Converts text into dense vectors for similarity search.
///
/// `model_version` identifies the vector space: vectors produced under
/// different versions are not comparable, and a version change marks every
/// stored vector stale.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Acquire resources ahead of first use. Idempotent.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, preserving order.
    ///
    /// Default implementation calls `embed` for each text sequentially.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Length of every vector this embedder produces.
    fn dimensions(&self) -> usize;

    /// Version of the vector space. Real providers use `>= 1`.
    fn model_version(&self) -> u32;

    fn name(&self) -> &str;

    /// Release resources. The embedder may be initialized again afterwards.
    async fn dispose(&self) {}
}

/// A shared embedder that can be used across threads.
pub type SharedEmbedder = Arc<dyn Embedder>;

// ─────────────────────────────────────────────────────────────────────────────
// Null Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Produces zero vectors.
///
/// Its version is `0`, which no real provider uses, so switching to a real
/// provider re-embeds everything.
#[derive(Debug, Clone)]
pub struct NullEmbedder {
    dimensions: usize,
}

impl NullEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for NullEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; self.dimensions])
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_version(&self) -> u32 {
        0
    }

    fn name(&self) -> &str {
        "null"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hash Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Default dimensionality for offline providers.
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Deterministic embedder for tests and offline runs.
///
/// Same text, same vector. Unrelated texts land far apart, so an exact-text
/// query always ranks its own record first.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
    version: u32,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            version: 1,
        }
    }

    /// Override the reported model version (must be `>= 1`).
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version.max(1);
        self
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut state = simple_hash(text);
        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            embedding.push(((state >> 16) as u16 as f32 / 32768.0) - 1.0);
        }

        // Normalize to unit length
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_version(&self) -> u32 {
        self.version
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// djb2
fn simple_hash(s: &str) -> u64 {
    let mut hash: u64 = 5381;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
    }
    hash
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedder Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Provider-agnostic description of an embedder.
///
/// Populated from the `[embedding]` config section; keeps this crate free of
/// a dependency on the config crate.
#[derive(Debug, Clone, Default)]
pub struct EmbedderSpec {
    /// Provider name: "null", "hash" or "openai".
    pub provider: String,
    /// Requested dimensions.
    pub dimensions: Option<usize>,
    /// Model version override.
    pub model_version: Option<u32>,
    /// OpenAI API key (required for "openai").
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: Option<String>,
}

/// Build a [`SharedEmbedder`] from a spec.
pub fn build_embedder(spec: &EmbedderSpec) -> Result<SharedEmbedder> {
    let dims = spec.dimensions.unwrap_or(DEFAULT_DIMENSIONS);
    match spec.provider.as_str() {
        "null" | "none" => Ok(Arc::new(NullEmbedder::new(dims))),
        "hash" | "mock" => {
            let mut embedder = HashEmbedder::new(dims);
            if let Some(version) = spec.model_version {
                embedder = embedder.with_version(version);
            }
            Ok(Arc::new(embedder))
        }
        "openai" => {
            let api_key = spec.openai_api_key.as_deref().ok_or_else(|| {
                EmbedError::Config(
                    "OpenAI embedding provider requires an API key. \
                     Set OPENAI_API_KEY or configure [embedding.openai] api_key."
                        .to_string(),
                )
            })?;
            let mut config = OpenAiEmbedderConfig::new(api_key);
            if let Some(ref model) = spec.openai_model {
                config = config.with_model(model);
            }
            if let Some(ref base_url) = spec.openai_base_url {
                config = config.with_base_url(base_url);
            }
            if let Some(dims) = spec.dimensions {
                config = config.with_dimensions(dims);
            }
            if let Some(version) = spec.model_version {
                config = config.with_model_version(version);
            }
            Ok(Arc::new(OpenAiEmbedder::new(config)))
        }
        other => Err(EmbedError::Config(format!(
            "Unknown embedding provider '{}'. Valid: null, hash, openai",
            other
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Utility Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Cosine similarity between two embeddings.
///
/// Returns 0 when the lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
