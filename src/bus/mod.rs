//! Change bus: per-collection publish/subscribe.
//!
//! Every committed write produces exactly one `ChangeEvent`. Events are queued
//! in commit order while the writer still holds the store's write gate, then
//! drained by a single drainer after the gate is released. Handlers therefore
//! run synchronously on a writer's call stack, observe commits in order, and
//! may write back into the store without deadlocking: a write issued from a
//! handler is queued behind the delivery in progress.
//!
//! Handler failures (errors or panics) are logged and counted, never
//! propagated to the writer.

/// Pull-based change stream.
pub mod stream;
/// Subscription handles.
pub mod subscription;

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collection::Collection;
use crate::document::{Document, DocumentId};
use crate::error::{lock_err, StoreResult};

pub use stream::ChangeStream;
pub use subscription::{Subscription, SubscriptionId};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Collection-level handler.
pub type CollectionHandler = Arc<dyn Fn(&CollectionSnapshot) -> HandlerResult + Send + Sync>;

/// Document-level handler; receives `None` after the document is deleted.
pub type DocumentHandler = Arc<dyn Fn(Option<&Document>) -> HandlerResult + Send + Sync>;

/// Kind of committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A document was created.
    Created,
    /// A document was updated.
    Updated,
    /// A document was deleted.
    Deleted,
}

/// Which write produced a snapshot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSummary {
    pub kind: ChangeKind,
    pub document_id: DocumentId,
}

/// Full contents of a collection as of one commit.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot {
    /// Collection the snapshot belongs to.
    pub collection: Collection,
    /// Commit sequence the snapshot reflects.
    pub sequence: u64,
    /// Documents in insertion order.
    pub documents: Arc<[Document]>,
    /// The write that produced this snapshot; `None` for the initial delivery.
    pub change: Option<ChangeSummary>,
}

impl CollectionSnapshot {
    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if the collection was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Find a document by id.
    #[must_use]
    pub fn get(&self, id: DocumentId) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }
}

/// One committed write, as queued for delivery.
#[derive(Debug, Clone)]
pub(crate) struct ChangeEvent {
    pub sequence: u64,
    pub collection: Collection,
    pub kind: ChangeKind,
    pub document_id: DocumentId,
    pub document: Option<Document>,
    /// Collection contents after this write; only captured when a
    /// collection-level subscriber existed at commit time.
    pub snapshot: Option<Arc<[Document]>>,
}

pub(crate) enum Target {
    Collection(CollectionHandler),
    Document {
        id: DocumentId,
        handler: DocumentHandler,
    },
}

pub(crate) struct SubscriberEntry {
    id: SubscriptionId,
    collection: Collection,
    target: Target,
    /// Events at or below this sequence predate the initial snapshot.
    after_sequence: u64,
    active: AtomicBool,
}

enum Delivery {
    Change(ChangeEvent),
    InitialCollection {
        entry: Arc<SubscriberEntry>,
        snapshot: CollectionSnapshot,
    },
    InitialDocument {
        entry: Arc<SubscriberEntry>,
        document: Option<Document>,
    },
}

/// Per-collection publish/subscribe hub.
#[derive(Default)]
pub struct ChangeBus {
    subscribers: RwLock<BTreeMap<Collection, Vec<Arc<SubscriberEntry>>>>,
    pending: Mutex<VecDeque<Delivery>>,
    draining: AtomicBool,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("delivered", &self.delivered())
            .field("failed", &self.failed_deliveries())
            .finish_non_exhaustive()
    }
}

impl ChangeBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active subscribers on a collection.
    #[must_use]
    pub fn subscriber_count(&self, collection: &Collection) -> usize {
        self.subscribers
            .read()
            .map(|subs| subs.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Handler invocations that returned normally.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Handler invocations that returned an error or panicked.
    #[must_use]
    pub fn failed_deliveries(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn has_collection_subscribers(&self, collection: &Collection) -> bool {
        self.subscribers.read().map_or(true, |subs| {
            subs.get(collection).is_some_and(|entries| {
                entries
                    .iter()
                    .any(|e| matches!(e.target, Target::Collection(_)))
            })
        })
    }

    /// Register a subscriber. Must be called under the store's write gate so
    /// that `after_sequence` is consistent with the queued events.
    pub(crate) fn register(
        self: &Arc<Self>,
        collection: Collection,
        target: Target,
        after_sequence: u64,
    ) -> StoreResult<(Subscription, Arc<SubscriberEntry>)> {
        let id = SubscriptionId::new();
        let entry = Arc::new(SubscriberEntry {
            id,
            collection: collection.clone(),
            target,
            after_sequence,
            active: AtomicBool::new(true),
        });

        self.subscribers
            .write()
            .map_err(|_| lock_err("bus.register"))?
            .entry(collection.clone())
            .or_default()
            .push(Arc::clone(&entry));

        debug!(%collection, subscription = %id, "subscriber registered");
        Ok((Subscription::new(id, collection, Arc::downgrade(self)), entry))
    }

    pub(crate) fn remove(&self, id: SubscriptionId, collection: &Collection) {
        let Ok(mut subs) = self.subscribers.write() else {
            warn!(%collection, subscription = %id, "poisoned subscriber lock on unsubscribe");
            return;
        };
        if let Some(entries) = subs.get_mut(collection) {
            entries.retain(|e| {
                if e.id == id {
                    e.active.store(false, Ordering::Release);
                    false
                } else {
                    true
                }
            });
            if entries.is_empty() {
                subs.remove(collection);
            }
        }
        debug!(%collection, subscription = %id, "subscriber removed");
    }

    pub(crate) fn enqueue_initial_collection(
        &self,
        entry: Arc<SubscriberEntry>,
        snapshot: CollectionSnapshot,
    ) -> StoreResult<()> {
        self.push(Delivery::InitialCollection { entry, snapshot })
    }

    pub(crate) fn enqueue_initial_document(
        &self,
        entry: Arc<SubscriberEntry>,
        document: Option<Document>,
    ) -> StoreResult<()> {
        self.push(Delivery::InitialDocument { entry, document })
    }

    pub(crate) fn enqueue(&self, events: Vec<ChangeEvent>) -> StoreResult<()> {
        let mut queue = self.pending.lock().map_err(|_| lock_err("bus.enqueue"))?;
        queue.extend(events.into_iter().map(Delivery::Change));
        Ok(())
    }

    fn push(&self, delivery: Delivery) -> StoreResult<()> {
        self.pending
            .lock()
            .map_err(|_| lock_err("bus.enqueue"))?
            .push_back(delivery);
        Ok(())
    }

    /// Deliver everything queued. Returns immediately if another call
    /// (on this or another thread) is already draining; that drainer picks up
    /// whatever was queued.
    pub(crate) fn drain(&self) {
        loop {
            if self.draining.swap(true, Ordering::AcqRel) {
                return;
            }

            loop {
                let next = match self.pending.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => {
                        warn!("poisoned delivery queue; dropping pending notifications");
                        None
                    }
                };
                let Some(delivery) = next else { break };
                self.deliver(delivery);
            }

            self.draining.store(false, Ordering::Release);

            // A writer may have queued between our last pop and the flag reset.
            let empty = self.pending.lock().map_or(true, |q| q.is_empty());
            if empty {
                return;
            }
        }
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Change(event) => self.deliver_change(&event),
            Delivery::InitialCollection { entry, snapshot } => {
                if let Target::Collection(handler) = &entry.target {
                    self.invoke(&entry, || handler(&snapshot));
                }
            }
            Delivery::InitialDocument { entry, document } => {
                if let Target::Document { handler, .. } = &entry.target {
                    self.invoke(&entry, || handler(document.as_ref()));
                }
            }
        }
    }

    fn deliver_change(&self, event: &ChangeEvent) {
        // Clone the entry list so no bus lock is held while handlers run.
        let entries: Vec<Arc<SubscriberEntry>> = match self.subscribers.read() {
            Ok(subs) => subs.get(&event.collection).cloned().unwrap_or_default(),
            Err(_) => {
                warn!(collection = %event.collection, "poisoned subscriber lock; skipping delivery");
                return;
            }
        };

        for entry in entries {
            if entry.after_sequence >= event.sequence {
                continue;
            }
            match &entry.target {
                Target::Collection(handler) => {
                    let Some(documents) = event.snapshot.as_ref() else {
                        debug!(collection = %event.collection, sequence = event.sequence, "no snapshot captured for event");
                        continue;
                    };
                    let snapshot = CollectionSnapshot {
                        collection: event.collection.clone(),
                        sequence: event.sequence,
                        documents: Arc::clone(documents),
                        change: Some(ChangeSummary {
                            kind: event.kind,
                            document_id: event.document_id,
                        }),
                    };
                    self.invoke(&entry, || handler(&snapshot));
                }
                Target::Document { id, handler } => {
                    if *id == event.document_id {
                        self.invoke(&entry, || handler(event.document.as_ref()));
                    }
                }
            }
        }
    }

    fn invoke(&self, entry: &SubscriberEntry, call: impl FnOnce() -> HandlerResult) {
        // Checked per call: a handler may have unsubscribed this entry.
        if !entry.active.load(Ordering::Acquire) {
            return;
        }

        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(collection = %entry.collection, subscription = %entry.id, error = %err, "change handler failed");
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(collection = %entry.collection, subscription = %entry.id, "change handler panicked");
            }
        }
    }
}
