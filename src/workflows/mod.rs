//! Built-in business rules of the operations dashboard.
//!
//! Each submodule contributes rules for one area; `standard_rules` returns
//! them in the order they are registered. Within a source collection that
//! order decides evaluation order, so movements are always emitted before a
//! purchase order's status is recomputed.

pub mod inventory;
pub mod orders;
pub mod production;
pub mod purchasing;
pub mod settings;

use crate::config::WorkflowConfig;
use crate::triggers::TriggerRule;

/// All built-in rules, in registration order.
#[must_use]
pub fn standard_rules(workflows: &WorkflowConfig) -> Vec<TriggerRule> {
    let mut rules = Vec::new();
    rules.extend(orders::rules(workflows));
    rules.extend(production::rules(workflows));
    rules.extend(inventory::rules());
    rules.extend(purchasing::rules());
    rules.extend(settings::rules());
    rules
}
