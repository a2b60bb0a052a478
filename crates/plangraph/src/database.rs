//! The database facade: one repository per registered type, the shared event
//! bus, and (optionally) semantic search kept in sync with the records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use plangraph_config::{
    EmbeddingConfig, PlangraphConfig, load_config_file, load_config_with_options, resolve_data_dir,
};
use plangraph_embed::{
    EmbedTextConfig, EmbedderSpec, HashEmbedder, SharedEmbedder, build_embedder,
};
use plangraph_schema::{Relationship, SchemaRegistry, project_registry};
use plangraph_storage::{JsonlStorage, MemoryStorage, StorageAdapter};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::events::{EventBus, SubscriptionId};
use crate::repository::Repository;
use crate::search::{
    DEFAULT_BATCH_SIZE, ProgressFn, SearchStats, SearchSync, SemanticSearch, SyncReport,
};

/// Directory, under the data dir, holding the vector collections.
pub const VECTORS_DIR: &str = ".vectors";

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Everything [`Database::open`] needs.
pub struct DatabaseOptions {
    registry: Arc<SchemaRegistry>,
    storage: Arc<dyn StorageAdapter>,
    vector_storage: Option<Arc<dyn StorageAdapter>>,
    embedder: Option<SharedEmbedder>,
    embed_text: Option<EmbedTextConfig>,
    search_enabled: bool,
    batch_size: usize,
    progress: Option<ProgressFn>,
}

impl DatabaseOptions {
    /// Records of every type in `registry`, persisted through `storage`.
    ///
    /// Search is enabled, with vectors kept in memory, the hashing embedder
    /// and the default project field lists, until overridden.
    pub fn new(registry: impl Into<Arc<SchemaRegistry>>, storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            registry: registry.into(),
            storage,
            vector_storage: None,
            embedder: None,
            embed_text: None,
            search_enabled: true,
            batch_size: DEFAULT_BATCH_SIZE,
            progress: None,
        }
    }

    pub fn with_vector_storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.vector_storage = Some(storage);
        self
    }

    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_embed_text(mut self, config: EmbedTextConfig) -> Self {
        self.embed_text = Some(config);
        self
    }

    pub fn with_search(mut self, enabled: bool) -> Self {
        self.search_enabled = enabled;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Called after every embedded batch of the startup sync.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("types", &self.registry.len())
            .field("search_enabled", &self.search_enabled)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

/// `[embedding]` section as an embedder description.
pub fn embedder_spec(config: &EmbeddingConfig) -> EmbedderSpec {
    let openai = config.openai.clone().unwrap_or_default();
    EmbedderSpec {
        provider: config.provider.as_str().to_string(),
        dimensions: config.dimensions,
        model_version: config.model_version,
        openai_api_key: config.openai_api_key(),
        openai_model: Some(openai.model),
        openai_base_url: openai.base_url,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Integrity
// ─────────────────────────────────────────────────────────────────────────────

/// What is wrong with a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityViolationKind {
    /// The referenced record does not exist.
    Dangling,
    /// A required reference is absent or null.
    NullNotAllowed,
    /// The reference has the wrong shape (e.g. a scalar where a list belongs).
    MalformedReference,
}

/// One broken reference.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityViolation {
    pub kind: IntegrityViolationKind,
    pub from_type: String,
    pub from_id: String,
    pub field: String,
    pub to_type: String,
    /// The offending value (the list element for list references).
    pub value: Value,
}

/// Result of [`Database::validate_integrity`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityReport {
    /// References examined, one per (relationship, from-record).
    pub checked: usize,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Record counts and search statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Records per collection.
    pub collections: BTreeMap<String, usize>,
    pub search: Option<SearchStats>,
    /// Mutation-sync jobs that failed since open.
    pub sync_failures: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Database
// ─────────────────────────────────────────────────────────────────────────────

/// An open plangraph database.
pub struct Database {
    registry: Arc<SchemaRegistry>,
    bus: Arc<EventBus>,
    /// Keyed by entity type.
    repos: BTreeMap<String, Arc<Repository>>,
    /// Collection name -> entity type.
    collections: HashMap<String, String>,
    search: Option<Arc<SemanticSearch>>,
    sync: Option<SearchSync>,
    subscription: Mutex<Option<SubscriptionId>>,
    sync_report: Option<SyncReport>,
}

impl Database {
    /// Load every collection and bring search up to date.
    ///
    /// Fails on the first malformed collection.
    pub async fn open(options: DatabaseOptions) -> Result<Self> {
        let DatabaseOptions {
            registry,
            storage,
            vector_storage,
            embedder,
            embed_text,
            search_enabled,
            batch_size,
            progress,
        } = options;

        let bus = Arc::new(EventBus::new());
        let mut repos = BTreeMap::new();
        let mut collections = HashMap::new();
        for schema in registry.entities() {
            let repo = Arc::new(Repository::new(schema.clone(), storage.clone(), bus.clone()));
            let count = repo.load().await?;
            debug!(collection = %schema.collection, count, "Loaded collection");
            collections.insert(schema.collection.clone(), schema.name.clone());
            repos.insert(schema.name.clone(), repo);
        }

        let mut db = Self {
            registry,
            bus,
            repos,
            collections,
            search: None,
            sync: None,
            subscription: Mutex::new(None),
            sync_report: None,
        };

        if search_enabled {
            let embedder: SharedEmbedder =
                embedder.unwrap_or_else(|| Arc::new(HashEmbedder::default()));
            embedder.initialize().await?;

            let embeddable: Vec<String> = db
                .registry
                .entities()
                .filter(|s| s.embeddable)
                .map(|s| s.name.clone())
                .collect();
            let search = Arc::new(
                SemanticSearch::new(
                    embedder,
                    embed_text.unwrap_or_else(EmbedTextConfig::project_defaults),
                    vector_storage.unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                    embeddable,
                )
                .with_batch_size(batch_size),
            );
            search.load().await?;
            let report = search.sync_all(&db.repos, progress.as_ref()).await?;

            let sync = SearchSync::start(search.clone(), db.collections.clone());
            *db.subscription.get_mut() = Some(db.bus.subscribe(sync.handler()));

            db.search = Some(search);
            db.sync = Some(sync);
            db.sync_report = Some(report);
        }

        info!(
            types = db.repos.len(),
            records = db.repos.values().map(|r| r.len()).sum::<usize>(),
            search = search_enabled,
            "Database opened"
        );
        Ok(db)
    }

    /// Open the project database described by `config`.
    ///
    /// Records live as JSONL files in the resolved data dir, vectors in its
    /// `.vectors` subdirectory.
    pub async fn open_with_config(config: &PlangraphConfig, project_dir: &Path) -> Result<Self> {
        let data_dir = resolve_data_dir(config, project_dir);
        let search = config.search();
        let embedder = build_embedder(&embedder_spec(&config.embedding()))?;
        info!(
            data_dir = %data_dir.display(),
            provider = embedder.name(),
            "Opening project database"
        );

        let options = DatabaseOptions::new(project_registry()?, Arc::new(JsonlStorage::new(&data_dir)))
            .with_vector_storage(Arc::new(JsonlStorage::new(data_dir.join(VECTORS_DIR))))
            .with_embedder(embedder)
            .with_search(search.enabled)
            .with_batch_size(search.batch_size);
        Self::open(options).await
    }

    /// Discover the user and project config files, then open the project
    /// database in `project_dir`.
    pub async fn open_discovered(project_dir: &Path) -> Result<Self> {
        Self::open_discovered_with(project_dir, None).await
    }

    /// [`open_discovered`](Self::open_discovered) with an explicit user config
    /// directory in place of `PLANGRAPH_CONFIG_DIR` / the platform default.
    ///
    /// Config layers that exist but cannot be read are skipped with a warning.
    pub async fn open_discovered_with(
        project_dir: &Path,
        config_dir: Option<&Path>,
    ) -> Result<Self> {
        let loaded = load_config_with_options(Some(project_dir), config_dir)?;
        for warning in &loaded.warnings {
            warn!(%warning, "Config layer skipped");
        }
        debug!(sources = ?loaded.loaded_from(), "Configuration loaded");
        Self::open_with_config(&loaded.config, project_dir).await
    }

    /// Open the project database configured by exactly the file at `path`.
    ///
    /// Unlike discovery, a missing or malformed file is an error.
    pub async fn open_config_file(path: &Path, project_dir: &Path) -> Result<Self> {
        let config = load_config_file(path)?;
        Self::open_with_config(&config, project_dir).await
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn repo(&self, entity_type: &str) -> Result<&Arc<Repository>> {
        self.repos
            .get(entity_type)
            .ok_or_else(|| StoreError::UnknownEntityType(entity_type.to_string()))
    }

    pub fn repo_by_collection(&self, collection: &str) -> Option<&Arc<Repository>> {
        self.collections
            .get(collection)
            .and_then(|ty| self.repos.get(ty))
    }

    /// Repositories keyed by entity type.
    pub fn repos(&self) -> &BTreeMap<String, Arc<Repository>> {
        &self.repos
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// `None` when search is disabled.
    pub fn search(&self) -> Option<&Arc<SemanticSearch>> {
        self.search.as_ref()
    }

    /// Outcome of the startup sync.
    pub fn sync_report(&self) -> Option<&SyncReport> {
        self.sync_report.as_ref()
    }

    /// Wait for the mutation sync to catch up with every write so far.
    pub async fn flush_search(&self) {
        if let Some(sync) = &self.sync {
            sync.flush().await;
        }
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            collections: self
                .repos
                .values()
                .map(|r| (r.collection().to_string(), r.len()))
                .collect(),
            search: self.search.as_ref().map(|s| s.stats()),
            sync_failures: self.sync.as_ref().map_or(0, |s| s.stats().failures()),
        }
    }

    // ── Integrity ───────────────────────────────────────────────────────

    /// Check every relationship of the registry across the whole graph.
    pub fn validate_integrity(&self) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        for relationship in self.registry.relationships() {
            let (Some(from), Some(to)) = (
                self.repos.get(&relationship.from_type),
                self.repos.get(&relationship.to_type),
            ) else {
                continue;
            };
            let targets = to.key_set(&relationship.to_field);
            for record in from.all() {
                report.checked += 1;
                check_reference(
                    relationship,
                    record.id(),
                    record.get(&relationship.from_field),
                    &targets,
                    &mut report.violations,
                );
            }
        }

        if report.is_clean() {
            debug!(checked = report.checked, "Integrity check clean");
        } else {
            info!(
                checked = report.checked,
                violations = report.violations.len(),
                "Integrity check found violations"
            );
        }
        report
    }

    /// Detach mutation sync, drain its queue and release the embedder.
    pub async fn close(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(id) = subscription {
            self.bus.unsubscribe(id);
        }
        if let Some(sync) = &self.sync {
            sync.shutdown().await;
        }
        if let Some(search) = &self.search {
            search.embedder().dispose().await;
        }
        debug!("Database closed");
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("types", &self.repos.keys().collect::<Vec<_>>())
            .field("search", &self.search.is_some())
            .finish()
    }
}

fn check_reference(
    relationship: &Relationship,
    from_id: &str,
    value: Option<&Value>,
    targets: &HashSet<String>,
    violations: &mut Vec<IntegrityViolation>,
) {
    let mut report = |kind, value: &Value| {
        violations.push(IntegrityViolation {
            kind,
            from_type: relationship.from_type.clone(),
            from_id: from_id.to_string(),
            field: relationship.from_field.clone(),
            to_type: relationship.to_type.clone(),
            value: value.clone(),
        })
    };
    let resolves = |key: &Value| match key {
        Value::String(s) => Some(targets.contains(s)),
        Value::Number(n) => Some(targets.contains(&n.to_string())),
        _ => None,
    };

    let value = match value {
        None | Some(Value::Null) => {
            if !relationship.nullable {
                report(IntegrityViolationKind::NullNotAllowed, &Value::Null);
            }
            return;
        }
        Some(value) => value,
    };

    if relationship.cardinality.is_list() {
        let Value::Array(keys) = value else {
            report(IntegrityViolationKind::MalformedReference, value);
            return;
        };
        for key in keys {
            match resolves(key) {
                Some(true) => {}
                Some(false) => report(IntegrityViolationKind::Dangling, key),
                None => report(IntegrityViolationKind::MalformedReference, key),
            }
        }
    } else {
        match resolves(value) {
            Some(true) => {}
            Some(false) => report(IntegrityViolationKind::Dangling, value),
            None => report(IntegrityViolationKind::MalformedReference, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plangraph_schema::{Cardinality, EntitySchema, FieldKind};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .entity(
                EntitySchema::builder("epic", "epics")
                    .required("title", FieldKind::String)
                    .embeddable()
                    .build(),
            )
            .entity(
                EntitySchema::builder("task", "tasks")
                    .required("title", FieldKind::String)
                    .required("epic_id", FieldKind::String)
                    .optional("depends_on", FieldKind::Any)
                    .build(),
            )
            .relationship(Relationship::new("task", "epic_id", "epic").required())
            .relationship(
                Relationship::new("task", "depends_on", "task")
                    .with_cardinality(Cardinality::ManyToMany),
            )
            .build()
            .unwrap()
    }

    async fn open(storage: Arc<dyn StorageAdapter>) -> Database {
        let options = DatabaseOptions::new(registry(), storage)
            .with_embed_text(EmbedTextConfig::new().with_type("epic", ["title"]));
        Database::open(options).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_repositories() {
        let db = open(Arc::new(MemoryStorage::new())).await;
        assert_eq!(db.repos().len(), 2);
        assert_eq!(db.repo("task").unwrap().collection(), "tasks");
        assert_eq!(db.repo_by_collection("epics").unwrap().entity_type(), "epic");
        assert!(db.repo_by_collection("nope").is_none());
        assert!(matches!(
            db.repo("nope"),
            Err(StoreError::UnknownEntityType(_))
        ));
        assert!(db.search().unwrap().is_indexed("epic"));
        assert!(!db.search().unwrap().is_indexed("task"));
        assert_eq!(db.bus().subscriber_count(), 1);
        db.close().await;
        assert_eq!(db.bus().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_integrity_reports_every_violation() {
        let db = open(Arc::new(MemoryStorage::new())).await;
        db.repo("epic")
            .unwrap()
            .insert(json!({"id": "E1", "title": "Platform"}))
            .await
            .unwrap();
        let tasks = db.repo("task").unwrap();
        tasks
            .insert(json!({"id": "T1", "title": "ok", "epic_id": "E1", "depends_on": []}))
            .await
            .unwrap();
        tasks
            .insert(json!({"id": "T2", "title": "dangling", "epic_id": "E9", "depends_on": ["T1", "T7"]}))
            .await
            .unwrap();
        tasks
            .insert(json!({"id": "T3", "title": "bad shape", "epic_id": "E1", "depends_on": [42, true]}))
            .await
            .unwrap();

        let report = db.validate_integrity();
        assert_eq!(report.checked, 6);
        assert!(!report.is_clean());

        let kinds: Vec<_> = report
            .violations
            .iter()
            .map(|v| (v.kind, v.from_id.as_str(), v.value.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (IntegrityViolationKind::Dangling, "T2", json!("E9")),
                (IntegrityViolationKind::Dangling, "T2", json!("T7")),
                (IntegrityViolationKind::Dangling, "T3", json!(42)),
                (IntegrityViolationKind::MalformedReference, "T3", json!(true)),
            ]
        );
    }

    #[test]
    fn test_check_reference_null_and_shape() {
        let targets = HashSet::from(["E1".to_string()]);
        let required = Relationship::new("task", "epic_id", "epic").required();
        let list = Relationship::new("task", "depends_on", "task")
            .with_cardinality(Cardinality::ManyToMany);
        let mut violations = Vec::new();

        check_reference(&required, "T1", None, &targets, &mut violations);
        check_reference(&required, "T2", Some(&Value::Null), &targets, &mut violations);
        check_reference(&list, "T3", None, &targets, &mut violations);
        check_reference(&list, "T4", Some(&json!("E1")), &targets, &mut violations);
        check_reference(&required, "T5", Some(&json!("E1")), &targets, &mut violations);

        let kinds: Vec<_> = violations.iter().map(|v| (v.kind, v.from_id.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (IntegrityViolationKind::NullNotAllowed, "T1"),
                (IntegrityViolationKind::NullNotAllowed, "T2"),
                (IntegrityViolationKind::MalformedReference, "T4"),
            ]
        );
    }

    #[tokio::test]
    async fn test_search_disabled() {
        let options = DatabaseOptions::new(registry(), Arc::new(MemoryStorage::new()))
            .with_search(false);
        let db = Database::open(options).await.unwrap();
        assert!(db.search().is_none());
        assert!(db.sync_report().is_none());
        assert_eq!(db.bus().subscriber_count(), 0);
        db.flush_search().await;
        db.close().await;
    }

    #[tokio::test]
    async fn test_stats() {
        let db = open(Arc::new(MemoryStorage::new())).await;
        db.repo("epic")
            .unwrap()
            .insert(json!({"id": "E1", "title": "Platform"}))
            .await
            .unwrap();
        db.flush_search().await;

        let stats = db.stats();
        assert_eq!(stats.collections.get("epics"), Some(&1));
        assert_eq!(stats.collections.get("tasks"), Some(&0));
        let search = stats.search.unwrap();
        assert_eq!(search.provider, "hash");
        assert_eq!(search.vectors.get("epic"), Some(&1));
        assert_eq!(stats.sync_failures, 0);
    }

    #[test]
    fn test_embedder_spec_from_config() {
        let config = PlangraphConfig::from_toml(
            r#"
            [embedding]
            provider = "openai"
            dimensions = 256

            [embedding.openai]
            model = "text-embedding-3-large"
            api_key = "sk-test"
            "#,
        )
        .unwrap();
        let spec = embedder_spec(&config.embedding());
        assert_eq!(spec.provider, "openai");
        assert_eq!(spec.dimensions, Some(256));
        assert_eq!(spec.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(spec.openai_model.as_deref(), Some("text-embedding-3-large"));
    }
}
