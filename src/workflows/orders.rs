//! Paid orders spawn production.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::bus::ChangeKind;
use crate::collection::Collection;
use crate::config::WorkflowConfig;
use crate::document::DocumentId;
use crate::triggers::TriggerRule;

use super::production::seed_task;

/// Rule spawning production orders when an order becomes paid.
pub const RULE_ORDER_PAID: &str = "order_paid_spawns_production";

/// Order field holding the line items array.
pub const FIELD_ITEMS: &str = "items";

/// Initial status of a spawned production order.
pub const PRODUCTION_QUEUED: &str = "queued";

/// Deterministic id of the production order for one order line.
#[must_use]
pub fn production_order_id(order_id: DocumentId, line_index: usize) -> DocumentId {
    DocumentId::derived(&["production_order", &order_id.to_string(), &line_index.to_string()])
}

/// Order rules.
///
/// Fires only on the transition into a paid status, so re-writing an already
/// paid order is not a new payment. Production orders are spawned under ids
/// derived from (order, line), which also keeps a paid -> unpaid -> paid
/// round trip from producing a second set.
#[must_use]
pub fn rules(workflows: &WorkflowConfig) -> Vec<TriggerRule> {
    let wf = Arc::new(workflows.clone());
    let paid = Arc::clone(&wf);

    vec![TriggerRule::new(RULE_ORDER_PAID, Collection::Orders, move |txn, change| {
        let Some(order) = change.after.as_ref() else {
            return Ok(());
        };
        let Some(first_stage) = wf.first_stage() else {
            debug!("no production stages configured; nothing to spawn");
            return Ok(());
        };
        let lines = order
            .get(FIELD_ITEMS)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for (index, line) in lines.iter().enumerate() {
            let id = production_order_id(order.id, index);
            let quantity = line.get("quantity").and_then(Value::as_f64).unwrap_or(1.0);
            let spawned = txn.spawn(
                &Collection::ProductionOrders,
                id,
                json!({
                    "order_id": order.id.to_string(),
                    "line_index": index,
                    "product_id": line.get("product_id").cloned().unwrap_or(Value::Null),
                    "product_name": line.get("name").cloned().unwrap_or(Value::Null),
                    "quantity": quantity,
                    "line_item": line,
                    "status": PRODUCTION_QUEUED,
                    "current_stage": first_stage,
                }),
            )?;
            if spawned.is_some() {
                seed_task(txn, id, first_stage, &wf)?;
            }
        }
        Ok(())
    })
    .on_kinds(&[ChangeKind::Created, ChangeKind::Updated])
    .when(move |change| change.transitioned("status", |s| paid.is_paid(s)))]
}
