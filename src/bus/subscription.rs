//! Subscription handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collection::Collection;

use super::ChangeBus;

/// Unique identifier for a subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a registered change handler.
///
/// Dropping the handle unsubscribes. `unsubscribe` is idempotent and may be
/// called from inside the handler it removes.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: SubscriptionId,
    collection: Collection,
    bus: Weak<ChangeBus>,
    unsubscribed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, collection: Collection, bus: Weak<ChangeBus>) -> Self {
        Self {
            id,
            collection,
            bus,
            unsubscribed: AtomicBool::new(false),
        }
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The collection this subscription listens to.
    #[must_use]
    pub const fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Returns false once `unsubscribe` has been called or the store is gone.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.unsubscribed.load(Ordering::Acquire) && self.bus.strong_count() > 0
    }

    /// Stop further delivery.
    pub fn unsubscribe(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id, &self.collection);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
