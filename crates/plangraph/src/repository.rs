//! Per-type repositories: validated CRUD over one collection.
//!
//! Every write runs validate -> persist -> commit -> emit under the
//! repository's write gate. The new index is built as a staged copy and only
//! swapped in once storage has accepted the whole collection, so a failed
//! save leaves the in-memory state exactly as it was.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use plangraph_schema::{
    EntitySchema, ID_FIELD, JsonObject, Record, STATUS_FIELD, Transition, ValidationError,
    Validator, Violation, ViolationKind,
};
use plangraph_storage::StorageAdapter;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::events::{EventBus, MutationEvent};
use crate::query::Query;

/// In-memory index of one collection. Preserves insertion/load order.
#[derive(Debug, Clone, Default)]
struct Index {
    order: Vec<String>,
    records: HashMap<String, Arc<Record>>,
}

impl Index {
    fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.records.get(id)
    }

    fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Insert or replace. Replacing keeps the original position.
    fn put(&mut self, record: Arc<Record>) {
        let id = record.id().to_string();
        if self.records.insert(id.clone(), record).is_none() {
            self.order.push(id);
        }
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Record>> {
        let removed = self.records.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn to_objects(&self) -> Vec<JsonObject> {
        self.iter().map(|r| r.fields().clone()).collect()
    }
}

/// Owner of one collection's records.
///
/// Reads are synchronous and served from memory. Writes are async because
/// they go through the [`StorageAdapter`].
pub struct Repository {
    schema: Arc<EntitySchema>,
    storage: Arc<dyn StorageAdapter>,
    bus: Arc<EventBus>,
    index: RwLock<Index>,
    write_gate: tokio::sync::Mutex<()>,
}

impl Repository {
    pub fn new(
        schema: Arc<EntitySchema>,
        storage: Arc<dyn StorageAdapter>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            schema,
            storage,
            bus,
            index: RwLock::new(Index::default()),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.schema.name
    }

    pub fn collection(&self) -> &str {
        &self.schema.collection
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    // ── Loading ─────────────────────────────────────────────────────────

    /// Read the whole collection from storage and replace the index.
    ///
    /// Fails on the first invalid record or duplicate id; the index is left
    /// untouched in that case. Returns the number of records loaded.
    pub async fn load(&self) -> Result<usize> {
        let _gate = self.write_gate.lock().await;
        let collection = self.collection();

        let objects = self
            .storage
            .load_collection(collection)
            .await
            .map_err(|e| StoreError::storage(collection, e))?;

        let mut index = Index::default();
        for (position, object) in objects.into_iter().enumerate() {
            let record = self
                .schema
                .validate(&Value::Object(object))
                .map_err(|e| StoreError::MalformedData {
                    collection: collection.to_string(),
                    reason: format!("record {}: {}", position + 1, e),
                })?;
            if index.contains(record.id()) {
                return Err(StoreError::MalformedData {
                    collection: collection.to_string(),
                    reason: format!("duplicate id '{}'", record.id()),
                });
            }
            index.put(Arc::new(record));
        }

        let count = index.len();
        *self.index.write() = index;
        info!(collection, count, "Loaded collection");
        Ok(count)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<Arc<Record>> {
        self.index.read().get(id).cloned()
    }

    /// Every record, in index order.
    pub fn all(&self) -> Vec<Arc<Record>> {
        self.index.read().iter().cloned().collect()
    }

    pub fn find<F>(&self, predicate: F) -> Vec<Arc<Record>>
    where
        F: Fn(&Record) -> bool,
    {
        self.index
            .read()
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.index.read().len()
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Record) -> bool,
    {
        self.index.read().iter().filter(|r| predicate(r)).count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// A query over a snapshot of the current records.
    pub fn query(&self) -> Query {
        Query::new(self.all())
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Validate and add a new record.
    pub async fn insert(&self, value: Value) -> Result<Arc<Record>> {
        let _gate = self.write_gate.lock().await;

        let record = Arc::new(self.schema.validate(&value)?);
        let id = record.id().to_string();

        let mut staged = self.index.read().clone();
        if staged.contains(&id) {
            return Err(StoreError::DuplicateId {
                collection: self.collection().to_string(),
                id,
            });
        }
        staged.put(record.clone());

        self.persist(&staged).await?;
        *self.index.write() = staged;
        debug!(collection = self.collection(), id = %id, "Inserted record");

        self.bus.emit(&MutationEvent::Inserted {
            collection: self.collection().to_string(),
            id,
            current: record.clone(),
        });
        Ok(record)
    }

    /// Merge-patch an existing record.
    ///
    /// A `null` patch value removes the key. `id` cannot change. A status
    /// change must appear in the transition table, and a rule with a
    /// precondition is only reachable through
    /// [`transition_with`](Self::transition_with).
    pub async fn update(&self, id: &str, patch: Value) -> Result<Arc<Record>> {
        let _gate = self.write_gate.lock().await;
        self.update_locked(id, &patch, false).await
    }

    /// Apply several patches and persist once.
    ///
    /// Either every patch is applied or none is. Emits one `Updated` event per
    /// patch, in order.
    pub async fn update_many(&self, patches: Vec<(String, Value)>) -> Result<Vec<Arc<Record>>> {
        let _gate = self.write_gate.lock().await;
        if patches.is_empty() {
            return Ok(Vec::new());
        }

        let mut staged = self.index.read().clone();
        let mut changes = Vec::with_capacity(patches.len());
        for (id, patch) in &patches {
            let (previous, current) = self.prepare_update(&staged, id, patch, false)?;
            staged.put(current.clone());
            changes.push((id.clone(), previous, current));
        }

        self.persist(&staged).await?;
        *self.index.write() = staged;
        debug!(
            collection = self.collection(),
            count = changes.len(),
            "Updated records"
        );

        let mut updated = Vec::with_capacity(changes.len());
        for (id, previous, current) in changes {
            self.bus.emit(&MutationEvent::Updated {
                collection: self.collection().to_string(),
                id,
                previous,
                current: current.clone(),
            });
            updated.push(current);
        }
        Ok(updated)
    }

    /// Remove a record.
    pub async fn delete(&self, id: &str) -> Result<Arc<Record>> {
        let _gate = self.write_gate.lock().await;

        let mut staged = self.index.read().clone();
        let previous = staged
            .remove(id)
            .ok_or_else(|| StoreError::not_found(self.collection(), id))?;

        self.persist(&staged).await?;
        *self.index.write() = staged;
        debug!(collection = self.collection(), id, "Deleted record");

        self.bus.emit(&MutationEvent::Deleted {
            collection: self.collection().to_string(),
            id: id.to_string(),
            previous: previous.clone(),
        });
        Ok(previous)
    }

    /// Move a record's status to `to`, accepting every precondition.
    pub async fn transition(&self, id: &str, to: &str) -> Result<Arc<Record>> {
        self.transition_with(id, to, |_, _| true).await
    }

    /// Move a record's status to `to`.
    ///
    /// `guard` is asked about the precondition tag of the matching rule, if
    /// any, together with the current record.
    pub async fn transition_with<G>(&self, id: &str, to: &str, guard: G) -> Result<Arc<Record>>
    where
        G: FnOnce(&str, &Record) -> bool,
    {
        let _gate = self.write_gate.lock().await;

        let Some(table) = self.schema.transitions.as_ref() else {
            return Err(StoreError::NoTransitions(self.entity_type().to_string()));
        };
        let current = self
            .get(id)
            .ok_or_else(|| StoreError::not_found(self.collection(), id))?;
        let from = current.status().unwrap_or_default();

        let rule: &Transition =
            table
                .find(from, to)
                .ok_or_else(|| StoreError::IllegalTransition {
                    entity_type: self.entity_type().to_string(),
                    id: id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                })?;

        if let Some(tag) = rule.precondition.as_deref()
            && !guard(tag, &current)
        {
            return Err(StoreError::PreconditionFailed {
                entity_type: self.entity_type().to_string(),
                id: id.to_string(),
                tag: tag.to_string(),
            });
        }

        let mut patch = JsonObject::new();
        patch.insert(STATUS_FIELD.to_string(), Value::String(to.to_string()));
        self.update_locked(id, &Value::Object(patch), true).await
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Update with the write gate already held.
    async fn update_locked(
        &self,
        id: &str,
        patch: &Value,
        precondition_checked: bool,
    ) -> Result<Arc<Record>> {
        let mut staged = self.index.read().clone();
        let (previous, current) = self.prepare_update(&staged, id, patch, precondition_checked)?;
        staged.put(current.clone());

        self.persist(&staged).await?;
        *self.index.write() = staged;
        debug!(collection = self.collection(), id, "Updated record");

        self.bus.emit(&MutationEvent::Updated {
            collection: self.collection().to_string(),
            id: id.to_string(),
            previous,
            current: current.clone(),
        });
        Ok(current)
    }

    /// Compute the post-patch record against `index` without side effects.
    ///
    /// Validation runs before the transition check. A status change whose
    /// rule carries a precondition is refused unless `precondition_checked`.
    fn prepare_update(
        &self,
        index: &Index,
        id: &str,
        patch: &Value,
        precondition_checked: bool,
    ) -> Result<(Arc<Record>, Arc<Record>)> {
        let Value::Object(patch) = patch else {
            return Err(StoreError::InvalidPatch(format!(
                "patch for '{id}' must be a JSON object"
            )));
        };
        let previous = index
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(self.collection(), id))?;

        if let Some(new_id) = patch.get(ID_FIELD)
            && new_id.as_str() != Some(id)
        {
            return Err(ValidationError::new(
                self.entity_type(),
                vec![Violation::new(ID_FIELD, ViolationKind::Immutable)],
            )
            .into());
        }

        let merged = previous.merged(patch);
        let current = self.schema.validate(&Value::Object(merged))?;

        if let Some(table) = self.schema.transitions.as_ref()
            && let (Some(from), Some(to)) = (previous.status(), current.status())
            && from != to
        {
            let rule = table
                .find(from, to)
                .ok_or_else(|| StoreError::IllegalTransition {
                    entity_type: self.entity_type().to_string(),
                    id: id.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                })?;
            if !precondition_checked && let Some(tag) = rule.precondition.as_deref() {
                return Err(StoreError::PreconditionFailed {
                    entity_type: self.entity_type().to_string(),
                    id: id.to_string(),
                    tag: tag.to_string(),
                });
            }
        }

        Ok((previous, Arc::new(current)))
    }

    async fn persist(&self, index: &Index) -> Result<()> {
        self.storage
            .save_collection(self.collection(), &index.to_objects())
            .await
            .map_err(|e| StoreError::storage(self.collection(), e))
    }

    /// Ids of every record, in index order.
    pub fn ids(&self) -> Vec<String> {
        self.index.read().order.clone()
    }

    /// Distinct values of `field` across the collection, as strings.
    pub(crate) fn key_set(&self, field: &str) -> HashSet<String> {
        self.index
            .read()
            .iter()
            .filter_map(|r| match r.get(field)? {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect()
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity_type", &self.schema.name)
            .field("collection", &self.schema.collection)
            .field("len", &self.len())
            .finish()
    }
}
