//! Semantic search over embeddable record types.
//!
//! # Architecture
//!
//! ```text
//! SemanticSearch
//!     ├── VectorIndex (one per embeddable type, own storage collection)
//!     ├── SharedEmbedder
//!     └── EmbedTextConfig (which fields make up a record's text)
//!
//! SearchSync - background worker fed by the event bus
//! ```
//!
//! Startup sync reconciles every record with its vector, using the
//! `embed_hash` / `embed_version` stamps written back onto the records.
//! Mutation sync keeps vectors current between startups without touching the
//! records; the next startup sync only restamps those, without embedding.

mod index;
mod sync;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use plangraph_embed::{EmbedError, EmbedTextConfig, SharedEmbedder, content_hash};
use plangraph_schema::{EMBED_HASH_FIELD, EMBED_VERSION_FIELD, Record};
use plangraph_storage::StorageAdapter;
use serde_json::{Value, json};
use tracing::{debug, info};

pub use index::{VectorEntry, VectorIndex};
pub use sync::{SearchSync, SearchSyncStats};

use crate::error::{Result, StoreError};
use crate::repository::Repository;

/// Default number of records embedded per batch.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entity_type: String,
    pub id: String,
    pub score: f32,
    /// The text that was embedded for this record.
    pub text: String,
}

/// Progress of a startup sync or reindex, reported after every batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub entity_type: String,
    pub processed: usize,
    pub total: usize,
}

/// Callback receiving [`SyncProgress`] updates.
pub type ProgressFn = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

/// Per-type outcome of a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSyncReport {
    pub entity_type: String,
    /// Records of this type.
    pub total: usize,
    /// Records (re-)embedded.
    pub embedded: usize,
    /// Records whose vector was current but whose stamps were rewritten.
    pub restamped: usize,
    /// Records already fresh, or without text.
    pub skipped: usize,
    /// Vectors removed (orphaned, or record text now empty).
    pub removed: usize,
}

/// Outcome of [`SemanticSearch::sync_all`] or [`SemanticSearch::reindex`].
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub types: Vec<TypeSyncReport>,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn embedded(&self) -> usize {
        self.types.iter().map(|t| t.embedded).sum()
    }

    pub fn restamped(&self) -> usize {
        self.types.iter().map(|t| t.restamped).sum()
    }

    pub fn skipped(&self) -> usize {
        self.types.iter().map(|t| t.skipped).sum()
    }

    pub fn removed(&self) -> usize {
        self.types.iter().map(|t| t.removed).sum()
    }

    pub fn for_type(&self, entity_type: &str) -> Option<&TypeSyncReport> {
        self.types.iter().find(|t| t.entity_type == entity_type)
    }
}

/// Per-type dry-run counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSyncPlan {
    pub entity_type: String,
    pub total: usize,
    /// Records that would be embedded.
    pub stale: usize,
    /// Records that would only be restamped.
    pub restamp: usize,
    /// Vectors that would be removed.
    pub orphaned: usize,
    /// Embedded text length / 4.
    pub estimated_tokens: usize,
}

/// Result of [`SemanticSearch::plan_sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub types: Vec<TypeSyncPlan>,
}

impl SyncPlan {
    pub fn stale(&self) -> usize {
        self.types.iter().map(|t| t.stale).sum()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.types.iter().map(|t| t.estimated_tokens).sum()
    }
}

/// Vector counts and provider details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStats {
    pub provider: String,
    pub dimensions: usize,
    pub model_version: u32,
    /// Vectors per embeddable type.
    pub vectors: BTreeMap<String, usize>,
}

/// What a single-record upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Embedded,
    /// The stored vector already matches the record's text and model.
    Unchanged,
    /// The record has no text; any stored vector was dropped.
    NoText,
}

/// Work item of a sync pass for one type.
struct Pending {
    id: String,
    text: String,
    hash: String,
    /// Whether the record's stamps must be rewritten.
    restamp: bool,
}

/// What a sync pass has to do for one type.
#[derive(Default)]
struct TypeWork {
    /// Records to embed.
    embed: Vec<Pending>,
    /// (id, hash) of records whose vector is current but stamps are not.
    restamp: Vec<(String, String)>,
    /// Vectors whose record is gone.
    orphans: Vec<String>,
    /// Vectors whose record has no text any more.
    no_text: Vec<String>,
}

/// Embedding-backed search across the embeddable types.
pub struct SemanticSearch {
    embedder: SharedEmbedder,
    text_config: EmbedTextConfig,
    indexes: BTreeMap<String, Arc<VectorIndex>>,
    batch_size: usize,
}

impl SemanticSearch {
    /// Create indexes for `entity_types` (restricted to the ones the text
    /// config knows about), persisted through `vector_storage`.
    pub fn new<I, S>(
        embedder: SharedEmbedder,
        text_config: EmbedTextConfig,
        vector_storage: Arc<dyn StorageAdapter>,
        entity_types: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let indexes = entity_types
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| text_config.is_embeddable(t))
            .map(|t| {
                let index = Arc::new(VectorIndex::new(t.clone(), vector_storage.clone()));
                (t, index)
            })
            .collect();

        Self {
            embedder,
            text_config,
            indexes,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn embedder(&self) -> &SharedEmbedder {
        &self.embedder
    }

    pub fn text_config(&self) -> &EmbedTextConfig {
        &self.text_config
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embeddable types, sorted.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }

    pub fn is_indexed(&self, entity_type: &str) -> bool {
        self.indexes.contains_key(entity_type)
    }

    pub fn index(&self, entity_type: &str) -> Option<&Arc<VectorIndex>> {
        self.indexes.get(entity_type)
    }

    fn index_or_err(&self, entity_type: &str) -> Result<&Arc<VectorIndex>> {
        self.indexes
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownEntityType(entity_type.to_string()))
    }

    /// Load every persisted index.
    pub async fn load(&self) -> Result<usize> {
        let mut total = 0;
        for index in self.indexes.values() {
            total += index.load().await?;
        }
        Ok(total)
    }

    // ── Single-record operations ────────────────────────────────────────

    /// Embed `record` and replace its vector.
    ///
    /// A record without text loses any stored vector instead.
    pub async fn upsert_entity(&self, entity_type: &str, record: &Record) -> Result<UpsertOutcome> {
        let index = self.index_or_err(entity_type)?;
        let Some(text) = self.text_config.text_for(entity_type, record.fields()) else {
            index.remove(record.id()).await?;
            return Ok(UpsertOutcome::NoText);
        };
        let hash = content_hash(&text);
        let vector = self.embedder.embed(&text).await?;
        index
            .upsert(VectorEntry {
                id: record.id().to_string(),
                text,
                hash,
                model_version: self.embedder.model_version(),
                vector,
            })
            .await?;
        Ok(UpsertOutcome::Embedded)
    }

    /// Like [`upsert_entity`](Self::upsert_entity), but skips the embedding
    /// call when the stored vector already matches.
    pub async fn refresh_entity(&self, entity_type: &str, record: &Record) -> Result<UpsertOutcome> {
        let index = self.index_or_err(entity_type)?;
        if let Some(text) = self.text_config.text_for(entity_type, record.fields())
            && let Some(existing) = index.get(record.id())
            && existing.matches(&content_hash(&text), self.embedder.model_version())
        {
            return Ok(UpsertOutcome::Unchanged);
        }
        self.upsert_entity(entity_type, record).await
    }

    /// Drop the vector of `id`. Absence is not an error.
    pub async fn remove_entity(&self, entity_type: &str, id: &str) -> Result<bool> {
        match self.indexes.get(entity_type) {
            Some(index) => index.remove(id).await,
            None => Ok(false),
        }
    }

    // ── Search ──────────────────────────────────────────────────────────

    /// Top-`k` records of `entity_type` most similar to `query`.
    pub async fn search(&self, entity_type: &str, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let index = self.index_or_err(entity_type)?;
        if k == 0 || index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        Ok(hits(entity_type, index.search(&vector, k)))
    }

    /// Top-`k` records across every embeddable type.
    pub async fn search_all(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.indexes.values().all(|i| i.is_empty()) {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        let mut all: Vec<SearchHit> = self
            .indexes
            .iter()
            .flat_map(|(ty, index)| hits(ty, index.search(&vector, k)))
            .collect();
        all.sort_by(|a, b| b.score.total_cmp(&a.score));
        all.truncate(k);
        Ok(all)
    }

    // ── Startup sync ────────────────────────────────────────────────────

    /// Reconcile every embeddable type with its repository.
    ///
    /// Records without a current vector are embedded in batches and stamped
    /// with `embed_hash` / `embed_version`. Records whose vector is current
    /// but whose stamps are not are restamped without embedding. Orphaned
    /// vectors are removed.
    pub async fn sync_all(
        &self,
        repositories: &BTreeMap<String, Arc<Repository>>,
        progress: Option<&ProgressFn>,
    ) -> Result<SyncReport> {
        self.run_sync(repositories, None, false, progress).await
    }

    /// Re-embed every record, of one type or of all types.
    pub async fn reindex(
        &self,
        repositories: &BTreeMap<String, Arc<Repository>>,
        entity_type: Option<&str>,
        progress: Option<&ProgressFn>,
    ) -> Result<SyncReport> {
        if let Some(ty) = entity_type {
            self.index_or_err(ty)?;
        }
        self.run_sync(repositories, entity_type, true, progress)
            .await
    }

    /// Count what [`sync_all`](Self::sync_all) would do, without embedding.
    pub fn plan_sync(&self, repositories: &BTreeMap<String, Arc<Repository>>) -> SyncPlan {
        let version = self.embedder.model_version();
        let types = self
            .indexes
            .iter()
            .filter_map(|(ty, index)| {
                let repo = repositories.get(ty)?;
                let work = self.classify(ty, repo, index, version, false);
                Some(TypeSyncPlan {
                    entity_type: ty.clone(),
                    total: repo.len(),
                    stale: work.embed.len(),
                    restamp: work.restamp.len(),
                    orphaned: work.orphans.len(),
                    estimated_tokens: work.embed.iter().map(|p| p.text.len()).sum::<usize>() / 4,
                })
            })
            .collect();
        SyncPlan { types }
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            provider: self.embedder.name().to_string(),
            dimensions: self.embedder.dimensions(),
            model_version: self.embedder.model_version(),
            vectors: self
                .indexes
                .iter()
                .map(|(ty, index)| (ty.clone(), index.len()))
                .collect(),
        }
    }

    async fn run_sync(
        &self,
        repositories: &BTreeMap<String, Arc<Repository>>,
        only: Option<&str>,
        force: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<SyncReport> {
        let start = Instant::now();
        let mut report = SyncReport::default();

        for (ty, index) in &self.indexes {
            if only.is_some_and(|o| o != ty.as_str()) {
                continue;
            }
            let Some(repo) = repositories.get(ty) else {
                continue;
            };
            report
                .types
                .push(self.sync_type(ty, repo, index, force, progress).await?);
        }

        report.elapsed = start.elapsed();
        info!(
            embedded = report.embedded(),
            restamped = report.restamped(),
            skipped = report.skipped(),
            removed = report.removed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Search sync complete"
        );
        Ok(report)
    }

    async fn sync_type(
        &self,
        entity_type: &str,
        repo: &Repository,
        index: &VectorIndex,
        force: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<TypeSyncReport> {
        let version = self.embedder.model_version();
        let TypeWork {
            embed,
            restamp,
            orphans,
            no_text,
        } = self.classify(entity_type, repo, index, version, force);

        let mut report = TypeSyncReport {
            entity_type: entity_type.to_string(),
            total: repo.len(),
            skipped: repo.len() - embed.len() - restamp.len(),
            ..Default::default()
        };

        let mut to_remove = orphans;
        to_remove.extend(no_text);
        report.removed = index.remove_many(&to_remove).await?;

        if !restamp.is_empty() {
            let stamps = restamp
                .iter()
                .map(|(id, hash)| (id.clone(), stamp_patch(hash, version)))
                .collect();
            report.restamped = repo.update_many(stamps).await?.len();
            debug!(entity_type, restamped = report.restamped, "Restamped records");
        }

        let total = embed.len();
        for batch in embed.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|p| p.text.as_str()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                }
                .into());
            }

            let entries = batch
                .iter()
                .zip(vectors)
                .map(|(p, vector)| VectorEntry {
                    id: p.id.clone(),
                    text: p.text.clone(),
                    hash: p.hash.clone(),
                    model_version: version,
                    vector,
                })
                .collect();
            index.upsert_many(entries).await?;

            let stamps: Vec<_> = batch
                .iter()
                .filter(|p| p.restamp)
                .map(|p| (p.id.clone(), stamp_patch(&p.hash, version)))
                .collect();
            repo.update_many(stamps).await?;

            report.embedded += batch.len();
            if let Some(progress) = progress {
                progress(&SyncProgress {
                    entity_type: entity_type.to_string(),
                    processed: report.embedded,
                    total,
                });
            }
            debug!(entity_type, processed = report.embedded, total, "Embedded batch");
        }

        Ok(report)
    }

    /// Split a type's records into work to do.
    fn classify(
        &self,
        entity_type: &str,
        repo: &Repository,
        index: &VectorIndex,
        version: u32,
        force: bool,
    ) -> TypeWork {
        let records = repo.all();
        let mut live: HashSet<&str> = HashSet::with_capacity(records.len());
        let mut work = TypeWork::default();

        for record in &records {
            live.insert(record.id());
            let Some(text) = self.text_config.text_for(entity_type, record.fields()) else {
                if index.contains(record.id()) {
                    work.no_text.push(record.id().to_string());
                }
                continue;
            };
            let hash = content_hash(&text);
            let stamped = record.get_str(EMBED_HASH_FIELD) == Some(hash.as_str())
                && record.get_u64(EMBED_VERSION_FIELD) == Some(u64::from(version));
            let vector_fresh = index
                .get(record.id())
                .is_some_and(|e| e.matches(&hash, version));

            if force || !vector_fresh {
                work.embed.push(Pending {
                    id: record.id().to_string(),
                    text,
                    hash,
                    restamp: !stamped,
                });
            } else if !stamped {
                work.restamp.push((record.id().to_string(), hash));
            }
        }

        work.orphans = index
            .ids()
            .into_iter()
            .filter(|id| !live.contains(id.as_str()))
            .collect();

        work
    }
}

/// Patch recording which text and model a record's vector came from.
fn stamp_patch(hash: &str, version: u32) -> Value {
    json!({ EMBED_HASH_FIELD: hash, EMBED_VERSION_FIELD: version })
}

fn hits(entity_type: &str, scored: Vec<(VectorEntry, f32)>) -> Vec<SearchHit> {
    scored
        .into_iter()
        .map(|(entry, score)| SearchHit {
            entity_type: entity_type.to_string(),
            id: entry.id,
            score,
            text: entry.text,
        })
        .collect()
}

impl std::fmt::Debug for SemanticSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticSearch")
            .field("provider", &self.embedder.name())
            .field("types", &self.indexes.keys().collect::<Vec<_>>())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
