//! Backend contract.
//!
//! `DocumentBackend` is the surface UI-facing code depends on: the four write
//! and read primitives plus the two subscription kinds. `Store` is the
//! in-process implementation; a networked backend can implement the same
//! trait and be swapped in behind `Arc<dyn DocumentBackend>`.

use serde_json::Value;

use crate::bus::{CollectionHandler, DocumentHandler, Subscription};
use crate::collection::Collection;
use crate::document::{Document, DocumentId};
use crate::error::StoreResult;
use crate::store::Store;

/// Document storage with change subscriptions.
///
/// # Contract
/// - Every successful write notifies subscribers of its collection exactly
///   once, in commit order.
/// - Deleting an absent document is `NotFound`.
/// - Subscribing delivers the current state before any later write.
pub trait DocumentBackend: Send + Sync {
    /// Create a document with a backend-assigned id.
    fn create(&self, collection: &Collection, data: Value) -> StoreResult<Document>;

    /// Merge a patch over an existing document.
    fn update(&self, collection: &Collection, id: DocumentId, patch: Value) -> StoreResult<Document>;

    /// Delete a document.
    fn delete(&self, collection: &Collection, id: DocumentId) -> StoreResult<()>;

    /// Look up a document.
    fn get(&self, collection: &Collection, id: DocumentId) -> StoreResult<Document>;

    /// Snapshot of a collection in insertion order.
    fn list(&self, collection: &Collection) -> StoreResult<Vec<Document>>;

    /// Subscribe to every write on a collection.
    fn subscribe_collection(&self, collection: &Collection, handler: CollectionHandler) -> StoreResult<Subscription>;

    /// Subscribe to one document.
    fn subscribe_document(
        &self,
        collection: &Collection,
        id: DocumentId,
        handler: DocumentHandler,
    ) -> StoreResult<Subscription>;
}

impl DocumentBackend for Store {
    fn create(&self, collection: &Collection, data: Value) -> StoreResult<Document> {
        Self::create(self, collection, data)
    }

    fn update(&self, collection: &Collection, id: DocumentId, patch: Value) -> StoreResult<Document> {
        Self::update(self, collection, id, patch)
    }

    fn delete(&self, collection: &Collection, id: DocumentId) -> StoreResult<()> {
        Self::delete(self, collection, id)
    }

    fn get(&self, collection: &Collection, id: DocumentId) -> StoreResult<Document> {
        Self::get(self, collection, id)
    }

    fn list(&self, collection: &Collection) -> StoreResult<Vec<Document>> {
        Self::list(self, collection)
    }

    fn subscribe_collection(&self, collection: &Collection, handler: CollectionHandler) -> StoreResult<Subscription> {
        self.register_collection(collection, handler)
    }

    fn subscribe_document(
        &self,
        collection: &Collection,
        id: DocumentId,
        handler: DocumentHandler,
    ) -> StoreResult<Subscription> {
        self.register_document(collection, id, handler)
    }
}
