//! Ordered rule registry.

use std::collections::HashSet;

use crate::collection::Collection;
use crate::error::{StoreError, StoreResult};

use super::rule::TriggerRule;

/// Rules in registration order. Fixed once the store is built.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<TriggerRule>,
    names: HashSet<String>,
}

impl RuleSet {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRule` if a rule with the same name exists.
    pub fn register(&mut self, rule: TriggerRule) -> StoreResult<()> {
        if !self.names.insert(rule.name().to_string()) {
            return Err(StoreError::DuplicateRule {
                name: rule.name().to_string(),
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Append a rule whose name is known to be unique.
    pub(crate) fn push(&mut self, rule: TriggerRule) {
        self.names.insert(rule.name().to_string());
        self.rules.push(rule);
    }

    /// Rules whose source is `collection`, in registration order.
    pub fn for_collection<'a>(
        &'a self,
        collection: &'a Collection,
    ) -> impl Iterator<Item = &'a TriggerRule> + 'a {
        self.rules.iter().filter(move |r| r.source() == collection)
    }

    /// Rule names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.rules.iter().map(TriggerRule::name).collect()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
