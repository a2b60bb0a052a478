//! Background worker keeping vectors in step with record mutations.
//!
//! The event bus calls handlers synchronously, so the handler only enqueues a
//! job; a single spawned task drains the queue in order. Failures are logged
//! and counted, never propagated back to the writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use plangraph_schema::Record;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::SemanticSearch;
use crate::events::MutationEvent;

enum SyncJob {
    Upsert {
        entity_type: String,
        record: Arc<Record>,
    },
    Remove {
        entity_type: String,
        id: String,
    },
    Flush(oneshot::Sender<()>),
}

/// Counters of the mutation-sync worker.
#[derive(Debug, Default)]
pub struct SearchSyncStats {
    processed: AtomicU64,
    failures: AtomicU64,
}

impl SearchSyncStats {
    /// Jobs handled, successful or not.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Mutation-driven vector updates.
pub struct SearchSync {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<SyncJob>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Collection name -> entity type, for embeddable types only.
    collections: Arc<HashMap<String, String>>,
    stats: Arc<SearchSyncStats>,
}

impl SearchSync {
    /// Spawn the worker. Must be called inside a tokio runtime.
    ///
    /// `collections` maps collection names to entity types; collections of
    /// types without a vector index are ignored.
    pub fn start(search: Arc<SemanticSearch>, collections: HashMap<String, String>) -> Self {
        let collections: HashMap<String, String> = collections
            .into_iter()
            .filter(|(_, ty)| search.is_indexed(ty))
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(SearchSyncStats::default());
        let worker = tokio::spawn(run_worker(search, rx, stats.clone()));

        Self {
            sender: Arc::new(Mutex::new(Some(tx))),
            worker: Mutex::new(Some(worker)),
            collections: Arc::new(collections),
            stats,
        }
    }

    /// Event-bus handler enqueueing one job per relevant event.
    pub fn handler(&self) -> impl Fn(&MutationEvent) + Send + Sync + 'static {
        let sender = self.sender.clone();
        let collections = self.collections.clone();
        move |event: &MutationEvent| {
            let Some(entity_type) = collections.get(event.collection()) else {
                return;
            };
            let job = match event.current() {
                Some(record) => SyncJob::Upsert {
                    entity_type: entity_type.clone(),
                    record: record.clone(),
                },
                None => SyncJob::Remove {
                    entity_type: entity_type.clone(),
                    id: event.id().to_string(),
                },
            };
            let sent = sender.lock().as_ref().map(|tx| tx.send(job).is_ok());
            if sent != Some(true) {
                debug!(id = event.id(), "Search sync stopped, dropping event");
            }
        }
    }

    /// Wait until every job enqueued so far has been handled.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .sender
            .lock()
            .as_ref()
            .is_some_and(|sender| sender.send(SyncJob::Flush(tx)).is_ok());
        if sent {
            let _ = rx.await;
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Search sync worker panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    pub fn stats(&self) -> &SearchSyncStats {
        &self.stats
    }
}

impl std::fmt::Debug for SearchSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSync")
            .field("running", &self.is_running())
            .field("processed", &self.stats.processed())
            .field("failures", &self.stats.failures())
            .finish()
    }
}

async fn run_worker(
    search: Arc<SemanticSearch>,
    mut rx: mpsc::UnboundedReceiver<SyncJob>,
    stats: Arc<SearchSyncStats>,
) {
    while let Some(job) = rx.recv().await {
        let (entity_type, id, result) = match job {
            SyncJob::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            SyncJob::Upsert {
                entity_type,
                record,
            } => {
                let result = search
                    .refresh_entity(&entity_type, &record)
                    .await
                    .map(|_| ());
                (entity_type, record.id().to_string(), result)
            }
            SyncJob::Remove { entity_type, id } => {
                let result = search.remove_entity(&entity_type, &id).await.map(|_| ());
                (entity_type, id, result)
            }
        };

        stats.processed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = result {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            warn!(entity_type = %entity_type, id = %id, error = %e, "Search sync failed");
        }
    }
    debug!("Search sync worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::repository::Repository;
    use plangraph_embed::{EmbedTextConfig, HashEmbedder};
    use plangraph_schema::{EntitySchema, FieldKind};
    use plangraph_storage::MemoryStorage;
    use serde_json::json;

    fn setup() -> (Arc<Repository>, Arc<SemanticSearch>, SearchSync) {
        let schema = Arc::new(
            EntitySchema::builder("note", "notes")
                .optional("title", FieldKind::String)
                .embeddable()
                .build(),
        );
        let bus = Arc::new(EventBus::new());
        let repo = Arc::new(Repository::new(
            schema,
            Arc::new(MemoryStorage::new()),
            bus.clone(),
        ));
        let search = Arc::new(SemanticSearch::new(
            Arc::new(HashEmbedder::new(16)),
            EmbedTextConfig::new().with_type("note", ["title"]),
            Arc::new(MemoryStorage::new()),
            ["note"],
        ));
        let sync = SearchSync::start(
            search.clone(),
            HashMap::from([("notes".to_string(), "note".to_string())]),
        );
        bus.subscribe(sync.handler());
        (repo, search, sync)
    }

    #[tokio::test]
    async fn test_mutations_reach_the_index() {
        let (repo, search, sync) = setup();

        repo.insert(json!({"id": "N1", "title": "roadmap"})).await.unwrap();
        sync.flush().await;
        let hits = search.search("note", "roadmap", 1).await.unwrap();
        assert_eq!(hits[0].id, "N1");

        repo.update("N1", json!({"title": "retro"})).await.unwrap();
        sync.flush().await;
        assert_eq!(search.index("note").unwrap().get("N1").unwrap().text, "retro");

        repo.delete("N1").await.unwrap();
        sync.flush().await;
        assert!(search.index("note").unwrap().is_empty());

        assert_eq!(sync.stats().processed(), 3);
        assert_eq!(sync.stats().failures(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drops_later_events() {
        let (repo, search, sync) = setup();
        repo.insert(json!({"id": "N1", "title": "kept"})).await.unwrap();
        sync.shutdown().await;
        assert!(!sync.is_running());
        assert!(search.index("note").unwrap().contains("N1"));

        repo.insert(json!({"id": "N2", "title": "dropped"})).await.unwrap();
        sync.flush().await;
        assert!(!search.index("note").unwrap().contains("N2"));
    }
}
