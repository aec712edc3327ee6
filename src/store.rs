//! The `Store` facade.
//!
//! A `Store` owns the published collection tables, the rule registry and the
//! change bus. Every top-level write runs under one writer gate:
//!
//! 1. the published tables are captured as the cascade base,
//! 2. the write and every rule it fires run against a copy-on-write working
//!    set inside a [`CascadeTxn`],
//! 3. on success the touched tables are published and the change events are
//!    queued with consecutive sequence numbers; on error the working set is
//!    dropped and nothing is queued,
//! 4. the gate is released and queued notifications are drained.
//!
//! Reads never take the gate; they see the last published state.
//!
//! Trigger effects must write through the transaction they are given. An
//! effect that captured a `Store` and wrote through it would wait on the gate
//! its own write holds.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::bus::stream::ChangeStream;
use crate::bus::{
    ChangeBus, CollectionHandler, CollectionSnapshot, DocumentHandler, HandlerResult, Subscription, Target,
};
use crate::collection::Collection;
use crate::config::{StoreConfig, WorkflowConfig};
use crate::document::{Document, DocumentId};
use crate::error::{lock_err, StoreError, StoreResult, Violation};
use crate::reconciler::{
    balance_id, belongs_to, recompute_order_status, status_of, InventoryBalance, PurchaseOrderStatus,
    FIELD_RECEIVED,
};
use crate::storage::CollectionTable;
use crate::triggers::cascade::Tables;
use crate::triggers::{CascadeTxn, RuleSet, TriggerRule};
use crate::workflows::standard_rules;

struct WriterState {
    /// Sequence number of the last committed write.
    sequence: u64,
}

struct StoreInner {
    config: StoreConfig,
    workflows: WorkflowConfig,
    rules: RuleSet,
    bus: Arc<ChangeBus>,
    tables: RwLock<Tables>,
    gate: Mutex<WriterState>,
}

/// In-memory reactive document store.
///
/// Cloning is cheap; clones share the same data, rules and subscribers.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("rules", &self.inner.rules.names())
            .field("bus", &self.inner.bus)
            .finish_non_exhaustive()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Store`].
#[derive(Debug)]
pub struct StoreBuilder {
    config: StoreConfig,
    workflows: WorkflowConfig,
    standard_rules: bool,
    rules: Vec<TriggerRule>,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self {
            config: StoreConfig::default(),
            workflows: WorkflowConfig::default(),
            standard_rules: true,
            rules: Vec::new(),
        }
    }
}

impl StoreBuilder {
    /// Set the store configuration.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the parameters of the built-in rules.
    #[must_use]
    pub fn workflows(mut self, workflows: WorkflowConfig) -> Self {
        self.workflows = workflows;
        self
    }

    /// Build a store without the built-in business rules.
    #[must_use]
    pub fn without_standard_rules(mut self) -> Self {
        self.standard_rules = false;
        self
    }

    /// Register an additional rule. Custom rules are evaluated after the
    /// built-in ones for the same source collection.
    #[must_use]
    pub fn rule(mut self, rule: TriggerRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Build the store.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRule` if two rules share a name.
    pub fn build(self) -> StoreResult<Store> {
        let mut rules = if self.standard_rules {
            standard_rule_set(&self.workflows)
        } else {
            RuleSet::new()
        };
        for rule in self.rules {
            rules.register(rule)?;
        }
        Ok(Store::from_parts(self.config, self.workflows, rules))
    }
}

fn standard_rule_set(workflows: &WorkflowConfig) -> RuleSet {
    let mut rules = RuleSet::new();
    for rule in standard_rules(workflows) {
        rules.push(rule);
    }
    rules
}

impl Store {
    /// Store with default configuration and the built-in rules.
    #[must_use]
    pub fn new() -> Self {
        let workflows = WorkflowConfig::default();
        let rules = standard_rule_set(&workflows);
        Self::from_parts(StoreConfig::default(), workflows, rules)
    }

    /// Store with default configuration and no rules at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_parts(StoreConfig::default(), WorkflowConfig::default(), RuleSet::new())
    }

    /// Start building a store.
    #[must_use]
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    fn from_parts(config: StoreConfig, workflows: WorkflowConfig, rules: RuleSet) -> Self {
        info!(
            rules = rules.len(),
            max_cascade_depth = config.max_cascade_depth,
            max_cascade_writes = config.max_cascade_writes,
            "store built"
        );
        Self {
            inner: Arc::new(StoreInner {
                config,
                workflows,
                rules,
                bus: Arc::new(ChangeBus::new()),
                tables: RwLock::new(Tables::new()),
                gate: Mutex::new(WriterState { sequence: 0 }),
            }),
        }
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Parameters of the built-in rules.
    #[must_use]
    pub fn workflows(&self) -> &WorkflowConfig {
        &self.inner.workflows
    }

    /// Registered rule names, in evaluation order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&str> {
        self.inner.rules.names()
    }

    /// The change bus, for delivery statistics.
    #[must_use]
    pub fn bus(&self) -> &ChangeBus {
        &self.inner.bus
    }

    /// Sequence number of the last committed write; 0 for a fresh store.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the writer gate is poisoned.
    pub fn sequence(&self) -> StoreResult<u64> {
        Ok(self.inner.gate.lock().map_err(|_| lock_err("store.gate"))?.sequence)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Run `op` as one top-level write, cascades included.
    ///
    /// Either every write `op` and its rules performed is published, or none
    /// is. Notifications are delivered before this returns unless another
    /// thread is already draining them, in which case that thread delivers.
    ///
    /// # Errors
    ///
    /// Whatever `op` or a fired rule returns; the store is unchanged.
    pub fn transact<T>(&self, op: impl FnOnce(&mut CascadeTxn<'_>) -> StoreResult<T>) -> StoreResult<T> {
        let value = {
            let mut gate = self.inner.gate.lock().map_err(|_| lock_err("store.gate"))?;
            let base = self.published()?;

            let mut txn = CascadeTxn::new(&base, &self.inner.rules, &self.inner.bus, &self.inner.config);
            let value = match op(&mut txn) {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, writes = txn.writes(), "top-level write rolled back");
                    return Err(err);
                }
            };
            let (working, mut events) = txn.into_parts();

            {
                let mut tables = self.inner.tables.write().map_err(|_| lock_err("store.tables"))?;
                for (collection, table) in working {
                    tables.insert(collection, Arc::new(table));
                }
            }

            let first = gate.sequence + 1;
            for event in &mut events {
                gate.sequence += 1;
                event.sequence = gate.sequence;
            }
            debug!(writes = events.len(), first, last = gate.sequence, "top-level write committed");
            self.inner.bus.enqueue(events)?;
            value
        };

        self.inner.bus.drain();
        Ok(value)
    }

    /// Create a document with a store-assigned id and timestamps.
    ///
    /// # Errors
    ///
    /// `MalformedDocument` if `data` is not a JSON object, `InvariantViolation`
    /// for derived collections or a breach raised by a rule, and
    /// `CascadeLimitExceeded` for runaway rules.
    pub fn create(&self, collection: &Collection, data: Value) -> StoreResult<Document> {
        self.transact(|txn| txn.create(collection, data))
    }

    /// Merge `patch` over an existing document.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; otherwise as [`Store::create`].
    pub fn update(&self, collection: &Collection, id: DocumentId, patch: Value) -> StoreResult<Document> {
        self.transact(|txn| txn.update(collection, id, patch))
    }

    /// Delete a document. Deleting an absent document is `NotFound`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; otherwise as [`Store::create`].
    pub fn delete(&self, collection: &Collection, id: DocumentId) -> StoreResult<()> {
        self.transact(|txn| txn.delete(collection, id))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn published(&self) -> StoreResult<Tables> {
        Ok(self.inner.tables.read().map_err(|_| lock_err("store.tables"))?.clone())
    }

    fn table(&self, collection: &Collection) -> StoreResult<Option<Arc<CollectionTable>>> {
        Ok(self
            .inner
            .tables
            .read()
            .map_err(|_| lock_err("store.tables"))?
            .get(collection)
            .cloned())
    }

    /// Look up a document, if present.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a poisoned lock.
    pub fn find(&self, collection: &Collection, id: DocumentId) -> StoreResult<Option<Document>> {
        Ok(self.table(collection)?.and_then(|t| t.get(&id).cloned()))
    }

    /// Look up a document.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent.
    pub fn get(&self, collection: &Collection, id: DocumentId) -> StoreResult<Document> {
        self.find(collection, id)?
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    /// Snapshot of a collection in insertion order. Unknown collections are
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a poisoned lock.
    pub fn list(&self, collection: &Collection) -> StoreResult<Vec<Document>> {
        Ok(self
            .table(collection)?
            .map(|t| t.snapshot())
            .unwrap_or_default())
    }

    /// Collections that have been written at least once.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a poisoned lock.
    pub fn collections(&self) -> StoreResult<Vec<Collection>> {
        Ok(self
            .inner
            .tables
            .read()
            .map_err(|_| lock_err("store.tables"))?
            .keys()
            .cloned()
            .collect())
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe to every committed write on `collection`.
    ///
    /// The handler first receives the collection's current contents, then one
    /// snapshot per committed write, in commit order. When called from inside
    /// another handler the initial snapshot is delivered once that handler
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a poisoned lock.
    pub fn subscribe_collection<F>(&self, collection: &Collection, handler: F) -> StoreResult<Subscription>
    where
        F: Fn(&CollectionSnapshot) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_collection(collection, Arc::new(handler))
    }

    /// Subscribe to one document. The handler receives the current value (or
    /// `None` if absent), then the value after each write, and `None` after a
    /// delete.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a poisoned lock.
    pub fn subscribe_document<F>(
        &self,
        collection: &Collection,
        id: DocumentId,
        handler: F,
    ) -> StoreResult<Subscription>
    where
        F: Fn(Option<&Document>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_document(collection, id, Arc::new(handler))
    }

    /// Stop delivery to `subscription`. Safe to call repeatedly and from
    /// inside a handler.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    /// Subscribe through a bounded channel instead of a callback.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a poisoned lock.
    pub fn watch_collection(&self, collection: &Collection) -> StoreResult<ChangeStream> {
        let (mut stream, sink) = ChangeStream::channel(self.inner.config.stream_capacity);
        let subscription = self.register_collection(collection, sink.into_handler())?;
        stream.attach(subscription);
        Ok(stream)
    }

    pub(crate) fn register_collection(
        &self,
        collection: &Collection,
        handler: CollectionHandler,
    ) -> StoreResult<Subscription> {
        let subscription = {
            let gate = self.inner.gate.lock().map_err(|_| lock_err("store.gate"))?;
            let documents = self.list(collection)?;
            let (subscription, entry) =
                self.inner
                    .bus
                    .register(collection.clone(), Target::Collection(handler), gate.sequence)?;
            self.inner.bus.enqueue_initial_collection(
                entry,
                CollectionSnapshot {
                    collection: collection.clone(),
                    sequence: gate.sequence,
                    documents: Arc::from(documents),
                    change: None,
                },
            )?;
            subscription
        };
        self.inner.bus.drain();
        Ok(subscription)
    }

    pub(crate) fn register_document(
        &self,
        collection: &Collection,
        id: DocumentId,
        handler: DocumentHandler,
    ) -> StoreResult<Subscription> {
        let subscription = {
            let gate = self.inner.gate.lock().map_err(|_| lock_err("store.gate"))?;
            let current = self.find(collection, id)?;
            let (subscription, entry) = self.inner.bus.register(
                collection.clone(),
                Target::Document { id, handler },
                gate.sequence,
            )?;
            self.inner.bus.enqueue_initial_document(entry, current)?;
            subscription
        };
        self.inner.bus.drain();
        Ok(subscription)
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    /// Balance for a (material, warehouse) key; `None` before its first
    /// movement.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a poisoned lock.
    pub fn balance(&self, material_id: &str, warehouse_id: &str) -> StoreResult<Option<InventoryBalance>> {
        Ok(self
            .find(&Collection::InventoryBalances, balance_id(material_id, warehouse_id))?
            .as_ref()
            .and_then(InventoryBalance::from_document))
    }

    /// Every inventory balance, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `Internal` on a poisoned lock.
    pub fn balances(&self) -> StoreResult<Vec<InventoryBalance>> {
        Ok(self
            .list(&Collection::InventoryBalances)?
            .iter()
            .filter_map(InventoryBalance::from_document)
            .collect())
    }

    /// Status of a purchase order computed from its current items.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order is absent.
    pub fn purchase_order_status(&self, order_id: DocumentId) -> StoreResult<PurchaseOrderStatus> {
        let order = self.get(&Collection::PurchaseOrders, order_id)?;
        let items: Vec<Document> = self
            .list(&Collection::PurchaseOrderItems)?
            .into_iter()
            .filter(|item| belongs_to(item, order_id))
            .collect();
        Ok(status_of(&order, &items))
    }

    /// Recompute and store a purchase order's status from its items.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the order is absent.
    pub fn reconcile_purchase_order(&self, order_id: DocumentId) -> StoreResult<PurchaseOrderStatus> {
        self.transact(|txn| recompute_order_status(txn, order_id))
    }

    /// Receive `quantity` more units on a purchase order item.
    ///
    /// The increment, the paired inbound movement, the balance update and the
    /// order status recomputation commit together.
    ///
    /// # Errors
    ///
    /// `NonPositiveReceipt` unless `quantity` is a positive number, `NotFound`
    /// for an unknown item or order, `ReceiptOnDraft` for draft orders.
    pub fn receive_purchase_order_item(&self, item_id: DocumentId, quantity: f64) -> StoreResult<Document> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(Violation::NonPositiveReceipt { quantity }.into());
        }
        self.transact(|txn| {
            let item = txn.get(&Collection::PurchaseOrderItems, item_id)?;
            let received = item.f64_field(FIELD_RECEIVED).unwrap_or(0.0);
            txn.update(
                &Collection::PurchaseOrderItems,
                item_id,
                json!({ FIELD_RECEIVED: received + quantity }),
            )
        })
    }
}
