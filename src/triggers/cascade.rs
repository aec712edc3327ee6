//! Cascade transaction: the working set of one top-level write.
//!
//! Key invariants:
//! - Published tables are never mutated; the first write to a collection
//!   clones it into the working set (copy-on-write).
//! - Reads merge the working set over the published tables.
//! - Every write records exactly one change event and then evaluates the
//!   rules for its collection, depth-first, before returning.
//! - Nesting depth and total write count are bounded; exceeding either
//!   aborts the whole top-level write.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error};

use crate::bus::{ChangeBus, ChangeEvent, ChangeKind};
use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::document::{into_fields, Document, DocumentId, Fields};
use crate::error::{CascadeLimit, StoreError, StoreResult, Violation};
use crate::storage::CollectionTable;

use super::registry::RuleSet;
use super::rule::Change;

/// Published tables, keyed by collection.
pub(crate) type Tables = BTreeMap<Collection, Arc<CollectionTable>>;

enum WriteOp {
    Insert { id: DocumentId, fields: Fields },
    Patch { id: DocumentId, patch: Fields },
    Remove { id: DocumentId },
}

/// Handle through which trigger effects read and write during a cascade.
pub struct CascadeTxn<'s> {
    base: &'s Tables,
    working: BTreeMap<Collection, CollectionTable>,
    rules: &'s RuleSet,
    bus: &'s ChangeBus,
    config: &'s StoreConfig,
    events: Vec<ChangeEvent>,
    depth: usize,
    writes: usize,
    current_rule: Option<String>,
}

impl<'s> CascadeTxn<'s> {
    pub(crate) fn new(
        base: &'s Tables,
        rules: &'s RuleSet,
        bus: &'s ChangeBus,
        config: &'s StoreConfig,
    ) -> Self {
        Self {
            base,
            working: BTreeMap::new(),
            rules,
            bus,
            config,
            events: Vec::new(),
            depth: 0,
            writes: 0,
            current_rule: None,
        }
    }

    /// Store configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        self.config
    }

    /// Current nesting depth; 0 for the top-level write.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Writes performed so far in this top-level call.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }

    fn table(&self, collection: &Collection) -> Option<&CollectionTable> {
        self.working
            .get(collection)
            .or_else(|| self.base.get(collection).map(|t| &**t))
    }

    fn table_mut(&mut self, collection: &Collection) -> &mut CollectionTable {
        let base = self.base;
        self.working.entry(collection.clone()).or_insert_with(|| {
            base.get(collection)
                .map(|t| CollectionTable::clone(t))
                .unwrap_or_default()
        })
    }

    /// Look up a document, if present.
    #[must_use]
    pub fn find(&self, collection: &Collection, id: DocumentId) -> Option<Document> {
        self.table(collection).and_then(|t| t.get(&id)).cloned()
    }

    /// Look up a document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent.
    pub fn get(&self, collection: &Collection, id: DocumentId) -> StoreResult<Document> {
        self.find(collection, id)
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    /// Every document in the collection, in insertion order.
    #[must_use]
    pub fn list(&self, collection: &Collection) -> Vec<Document> {
        self.table(collection)
            .map(CollectionTable::snapshot)
            .unwrap_or_default()
    }

    /// Documents matching `filter`, in insertion order.
    pub fn filter(&self, collection: &Collection, filter: impl Fn(&Document) -> bool) -> Vec<Document> {
        self.table(collection)
            .map(|t| t.iter().filter(|d| filter(d)).cloned().collect())
            .unwrap_or_default()
    }

    /// Create a document with a store-assigned id.
    ///
    /// # Errors
    ///
    /// Fails for derived collections, malformed data, or when a rule fired by
    /// the write fails.
    pub fn create(&mut self, collection: &Collection, data: Value) -> StoreResult<Document> {
        guard_derived(collection)?;
        let fields = into_fields(data)?;
        self.create_raw(collection, DocumentId::new(), fields)
    }

    /// Create a document under a caller-chosen id unless one already exists.
    ///
    /// Returns `None` when the id is taken, which makes spawning from a rule
    /// idempotent when the id is derived from a business key.
    ///
    /// # Errors
    ///
    /// Same as `create`.
    pub fn spawn(
        &mut self,
        collection: &Collection,
        id: DocumentId,
        data: Value,
    ) -> StoreResult<Option<Document>> {
        guard_derived(collection)?;
        if self.table(collection).is_some_and(|t| t.contains(&id)) {
            debug!(%collection, %id, "spawn skipped; document exists");
            return Ok(None);
        }
        let fields = into_fields(data)?;
        self.create_raw(collection, id, fields).map(Some)
    }

    /// Merge a patch over an existing document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent; otherwise as `create`.
    pub fn update(&mut self, collection: &Collection, id: DocumentId, patch: Value) -> StoreResult<Document> {
        guard_derived(collection)?;
        let patch = into_fields(patch)?;
        self.update_raw(collection, id, patch)
    }

    /// Delete a document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent; otherwise as `create`.
    pub fn delete(&mut self, collection: &Collection, id: DocumentId) -> StoreResult<()> {
        guard_derived(collection)?;
        self.delete_raw(collection, id)
    }

    pub(crate) fn create_raw(
        &mut self,
        collection: &Collection,
        id: DocumentId,
        fields: Fields,
    ) -> StoreResult<Document> {
        let written = self.write(collection, WriteOp::Insert { id, fields })?;
        written.ok_or_else(|| StoreError::internal("insert produced no document"))
    }

    pub(crate) fn update_raw(
        &mut self,
        collection: &Collection,
        id: DocumentId,
        patch: Fields,
    ) -> StoreResult<Document> {
        let written = self.write(collection, WriteOp::Patch { id, patch })?;
        written.ok_or_else(|| StoreError::internal("patch produced no document"))
    }

    pub(crate) fn delete_raw(&mut self, collection: &Collection, id: DocumentId) -> StoreResult<()> {
        self.write(collection, WriteOp::Remove { id }).map(|_| ())
    }

    fn write(&mut self, collection: &Collection, op: WriteOp) -> StoreResult<Option<Document>> {
        self.check_limits(collection)?;

        let capture = self.bus.has_collection_subscribers(collection);
        let now = Utc::now();
        let table = self.table_mut(collection);

        let (kind, id, before, after) = match op {
            WriteOp::Insert { id, fields } => {
                if table.contains(&id) {
                    return Err(StoreError::internal(format!(
                        "duplicate id {id} in {collection}"
                    )));
                }
                let doc = Document::new(id, fields, now);
                table.put(doc.clone());
                (ChangeKind::Created, id, None, Some(doc))
            }
            WriteOp::Patch { id, patch } => {
                let prev = table
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| StoreError::not_found(collection, id))?;
                let next = prev.merged(patch, now);
                table.put(next.clone());
                (ChangeKind::Updated, id, Some(prev), Some(next))
            }
            WriteOp::Remove { id } => {
                let prev = table
                    .remove(&id)
                    .ok_or_else(|| StoreError::not_found(collection, id))?;
                (ChangeKind::Deleted, id, Some(prev), None)
            }
        };

        let snapshot: Option<Arc<[Document]>> = capture.then(|| Arc::from(table.snapshot()));

        debug!(%collection, %id, ?kind, depth = self.depth, "write committed to working set");

        self.events.push(ChangeEvent {
            sequence: 0,
            collection: collection.clone(),
            kind,
            document_id: id,
            document: after.clone(),
            snapshot,
        });

        let change = Change {
            collection: collection.clone(),
            kind,
            id,
            before,
            after: after.clone(),
        };
        self.fire(&change)?;

        Ok(after)
    }

    fn check_limits(&mut self, collection: &Collection) -> StoreResult<()> {
        let limit = if self.depth > self.config.max_cascade_depth {
            Some(CascadeLimit::Depth(self.config.max_cascade_depth))
        } else if self.writes >= self.config.max_cascade_writes {
            Some(CascadeLimit::Writes(self.config.max_cascade_writes))
        } else {
            None
        };

        if let Some(limit) = limit {
            let rule = self
                .current_rule
                .clone()
                .unwrap_or_else(|| "<caller>".to_string());
            error!(%collection, %rule, %limit, "cascade limit exceeded; aborting top-level write");
            return Err(StoreError::CascadeLimitExceeded {
                rule,
                collection: collection.clone(),
                limit,
            });
        }

        self.writes += 1;
        Ok(())
    }

    fn fire(&mut self, change: &Change) -> StoreResult<()> {
        let rules = self.rules;
        for rule in rules.for_collection(&change.collection) {
            if !rule.matches(change) {
                continue;
            }
            debug!(
                rule = rule.name(),
                collection = %change.collection,
                id = %change.id,
                depth = self.depth + 1,
                "trigger rule fired"
            );

            let parent = self.current_rule.replace(rule.name().to_string());
            self.depth += 1;
            let result = rule.apply(self, change);
            self.depth -= 1;
            self.current_rule = parent;
            result?;
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<Collection, CollectionTable>, Vec<ChangeEvent>) {
        (self.working, self.events)
    }
}

fn guard_derived(collection: &Collection) -> StoreResult<()> {
    if collection.is_derived() {
        return Err(Violation::DerivedCollection {
            collection: collection.clone(),
        }
        .into());
    }
    Ok(())
}
