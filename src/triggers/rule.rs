//! Trigger rule and change types.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bus::ChangeKind;
use crate::collection::Collection;
use crate::document::{Document, DocumentId};
use crate::error::StoreResult;

use super::cascade::CascadeTxn;

/// A committed write as seen by trigger rules.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Collection written.
    pub collection: Collection,
    /// Kind of write.
    pub kind: ChangeKind,
    /// Document written.
    pub id: DocumentId,
    /// Value before the write; `None` on create.
    pub before: Option<Document>,
    /// Value after the write; `None` on delete.
    pub after: Option<Document>,
}

impl Change {
    /// The latest known value: `after`, or `before` for deletes.
    #[must_use]
    pub fn current(&self) -> Option<&Document> {
        self.after.as_ref().or(self.before.as_ref())
    }

    /// Field value before the write.
    #[must_use]
    pub fn before_field(&self, field: &str) -> Option<&Value> {
        self.before.as_ref().and_then(|d| d.get(field))
    }

    /// Field value after the write.
    #[must_use]
    pub fn after_field(&self, field: &str) -> Option<&Value> {
        self.after.as_ref().and_then(|d| d.get(field))
    }

    /// Returns true if the field differs between before and after.
    /// An absent document and an absent field compare equal.
    #[must_use]
    pub fn field_changed(&self, field: &str) -> bool {
        self.before_field(field) != self.after_field(field)
    }

    /// Returns true if a string field moved from outside `accept` into it.
    #[must_use]
    pub fn transitioned(&self, field: &str, accept: impl Fn(Option<&str>) -> bool) -> bool {
        let before = self.before_field(field).and_then(Value::as_str);
        let after = self.after_field(field).and_then(Value::as_str);
        self.after.is_some() && !accept(before) && accept(after)
    }
}

/// Pure condition evaluated against a change.
pub type Predicate = Arc<dyn Fn(&Change) -> bool + Send + Sync>;

/// Effect performing nested writes through the cascade transaction.
pub type Effect = Arc<dyn Fn(&mut CascadeTxn<'_>, &Change) -> StoreResult<()> + Send + Sync>;

/// A condition/effect pair bound to one source collection.
///
/// # Examples
///
/// ```
/// use opstore::{ChangeKind, Collection, TriggerRule};
/// use serde_json::json;
///
/// let rule = TriggerRule::new("audit_orders", Collection::Orders, |txn, change| {
///     txn.create(&Collection::custom("order_audit"), json!({"order_id": change.id.to_string()}))?;
///     Ok(())
/// })
/// .on_kinds(&[ChangeKind::Created])
/// .when(|change| change.after_field("status").is_some());
///
/// assert_eq!(rule.name(), "audit_orders");
/// ```
#[derive(Clone)]
pub struct TriggerRule {
    name: String,
    source: Collection,
    kinds: Vec<ChangeKind>,
    predicate: Predicate,
    effect: Effect,
}

impl fmt::Debug for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRule")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

impl TriggerRule {
    /// Create a rule firing on every write to `source`.
    pub fn new<F>(name: impl Into<String>, source: Collection, effect: F) -> Self
    where
        F: Fn(&mut CascadeTxn<'_>, &Change) -> StoreResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source,
            kinds: vec![ChangeKind::Created, ChangeKind::Updated, ChangeKind::Deleted],
            predicate: Arc::new(|_| true),
            effect: Arc::new(effect),
        }
    }

    /// Restrict the rule to some kinds of writes.
    #[must_use]
    pub fn on_kinds(mut self, kinds: &[ChangeKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// Set the firing condition. It must not have side effects.
    #[must_use]
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Change) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Rule name, unique within a store.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection whose writes the rule inspects.
    #[must_use]
    pub const fn source(&self) -> &Collection {
        &self.source
    }

    /// Returns true if the rule should fire for `change`.
    #[must_use]
    pub fn matches(&self, change: &Change) -> bool {
        change.collection == self.source
            && self.kinds.contains(&change.kind)
            && (self.predicate)(change)
    }

    pub(crate) fn apply(&self, txn: &mut CascadeTxn<'_>, change: &Change) -> StoreResult<()> {
        (self.effect)(txn, change)
    }
}
