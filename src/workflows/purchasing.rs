//! Purchase order receipts and derived order status.

use serde_json::json;
use tracing::{debug, warn};

use crate::bus::ChangeKind;
use crate::collection::Collection;
use crate::document::{Document, DocumentId};
use crate::error::{StoreResult, Violation};
use crate::reconciler::{
    recompute_order_status, PurchaseOrderStatus, FIELD_MATERIAL, FIELD_PURCHASE_ORDER, FIELD_RECEIVED,
    FIELD_STATUS, FIELD_WAREHOUSE,
};
use crate::triggers::{Change, CascadeTxn, TriggerRule};

/// Rule turning a received-quantity increase into an inbound movement.
pub const RULE_ITEM_RECEIPT: &str = "purchase_order_item_receipt_moves_stock";
/// Rule recomputing the parent order's status after any item change.
pub const RULE_ITEM_STATUS: &str = "purchase_order_item_recomputes_status";
/// Rule keeping a caller-edited purchase order's status derived.
pub const RULE_ORDER_STATUS: &str = "purchase_order_status_is_derived";
/// Rule notifying once a purchase order is fully received.
pub const RULE_ORDER_RECEIVED: &str = "purchase_order_received_notifies";

fn received(doc: Option<&Document>) -> f64 {
    doc.and_then(|d| d.f64_field(FIELD_RECEIVED)).unwrap_or(0.0)
}

fn missing(collection: Collection, field: &str) -> Violation {
    Violation::MissingField {
        collection,
        field: field.to_string(),
    }
}

fn emit_receipt(txn: &mut CascadeTxn<'_>, change: &Change) -> StoreResult<()> {
    let Some(item) = change.after.as_ref() else {
        return Ok(());
    };
    let previous = received(change.before.as_ref());
    let current = received(Some(item));

    if current < previous {
        return Err(Violation::ReceivedQuantityDecreased {
            item: item.id,
            previous,
            attempted: current,
        }
        .into());
    }
    if current < 0.0 {
        return Err(Violation::InvalidField {
            collection: Collection::PurchaseOrderItems,
            field: FIELD_RECEIVED.to_string(),
            reason: format!("must not be negative, got {current}"),
        }
        .into());
    }

    let order_id = item
        .id_field(FIELD_PURCHASE_ORDER)
        .ok_or_else(|| missing(Collection::PurchaseOrderItems, FIELD_PURCHASE_ORDER))?;
    let order = txn.get(&Collection::PurchaseOrders, order_id)?;
    if order.field_is(FIELD_STATUS, PurchaseOrderStatus::Draft.as_str()) {
        return Err(Violation::ReceiptOnDraft {
            purchase_order: order_id,
        }
        .into());
    }

    let material = item
        .str_field(FIELD_MATERIAL)
        .ok_or_else(|| missing(Collection::PurchaseOrderItems, FIELD_MATERIAL))?;
    let warehouse = item
        .str_field(FIELD_WAREHOUSE)
        .or_else(|| order.str_field(FIELD_WAREHOUSE))
        .ok_or_else(|| missing(Collection::PurchaseOrderItems, FIELD_WAREHOUSE))?;

    txn.create(
        &Collection::InventoryMovements,
        json!({
            FIELD_MATERIAL: material,
            FIELD_WAREHOUSE: warehouse,
            "quantity": current - previous,
            "type": "in",
            "source": "purchase_order_receipt",
            FIELD_PURCHASE_ORDER: order_id.to_string(),
            "purchase_order_item_id": item.id.to_string(),
        }),
    )?;
    Ok(())
}

fn recompute_parents(txn: &mut CascadeTxn<'_>, change: &Change) -> StoreResult<()> {
    let parent = |doc: Option<&Document>| doc.and_then(|d| d.id_field(FIELD_PURCHASE_ORDER));
    let mut parents: Vec<DocumentId> = Vec::with_capacity(2);
    for id in [parent(change.before.as_ref()), parent(change.after.as_ref())].into_iter().flatten() {
        if !parents.contains(&id) {
            parents.push(id);
        }
    }

    for order_id in parents {
        if txn.find(&Collection::PurchaseOrders, order_id).is_none() {
            warn!(%order_id, item = %change.id, "purchase order item references a missing order");
            continue;
        }
        recompute_order_status(txn, order_id)?;
    }
    Ok(())
}

/// Purchasing rules, in evaluation order.
#[must_use]
pub fn rules() -> Vec<TriggerRule> {
    vec![
        TriggerRule::new(RULE_ITEM_RECEIPT, Collection::PurchaseOrderItems, emit_receipt)
            .on_kinds(&[ChangeKind::Created, ChangeKind::Updated])
            .when(|change| received(change.before.as_ref()) != received(change.after.as_ref())),
        TriggerRule::new(RULE_ITEM_STATUS, Collection::PurchaseOrderItems, recompute_parents),
        TriggerRule::new(RULE_ORDER_STATUS, Collection::PurchaseOrders, |txn, change| {
            recompute_order_status(txn, change.id).map(|_| ())
        })
        .on_kinds(&[ChangeKind::Created, ChangeKind::Updated])
        .when(|change| change.kind == ChangeKind::Created || change.field_changed(FIELD_STATUS)),
        TriggerRule::new(RULE_ORDER_RECEIVED, Collection::PurchaseOrders, |txn, change| {
            // The change may be stale if an earlier rule re-derived the status.
            let order = txn.get(&Collection::PurchaseOrders, change.id)?;
            if !order.field_is(FIELD_STATUS, PurchaseOrderStatus::Received.as_str()) {
                return Ok(());
            }
            let label = order
                .str_field("number")
                .map_or_else(|| change.id.to_string(), str::to_string);
            let spawned = txn.spawn(
                &Collection::Notifications,
                DocumentId::derived(&["notification", RULE_ORDER_RECEIVED, &change.id.to_string()]),
                json!({
                    "kind": "purchase_order_received",
                    FIELD_PURCHASE_ORDER: change.id.to_string(),
                    "title": "Purchase order received",
                    "message": format!("Purchase order {label} was received in full"),
                    "read": false,
                }),
            )?;
            if spawned.is_none() {
                debug!(order = %change.id, "received notification already exists");
            }
            Ok(())
        })
        .on_kinds(&[ChangeKind::Created, ChangeKind::Updated])
        .when(|change| {
            change.transitioned(FIELD_STATUS, |s| s == Some(PurchaseOrderStatus::Received.as_str()))
        }),
    ]
}
