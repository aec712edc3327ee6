//! Aggregate reconciler.
//!
//! Inventory balances are only ever changed by replaying a movement's signed
//! delta against the balance with the same (material, warehouse) key, or by
//! creating that balance on first movement. Purchase-order status is a pure
//! function of the order's items and is recomputed from scratch whenever an
//! item changes.
//!
//! Neither operation deduplicates: replaying the same delta twice applies it
//! twice. Callers (the built-in rules) guarantee one movement per business
//! event.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::collection::Collection;
use crate::document::{into_fields, Document, DocumentId};
use crate::error::{StoreResult, Violation};
use crate::triggers::CascadeTxn;

/// Balance field holding the on-hand quantity.
pub const FIELD_CURRENT_STOCK: &str = "current_stock";
/// Material key field on movements, balances and purchase order items.
pub const FIELD_MATERIAL: &str = "material_id";
/// Warehouse key field on movements, balances and purchase orders.
pub const FIELD_WAREHOUSE: &str = "warehouse_id";
/// Purchase order item back-reference.
pub const FIELD_PURCHASE_ORDER: &str = "purchase_order_id";
/// Ordered quantity on a purchase order item.
pub const FIELD_QUANTITY: &str = "quantity";
/// Received quantity on a purchase order item.
pub const FIELD_RECEIVED: &str = "received_quantity";
/// Status field on purchase orders.
pub const FIELD_STATUS: &str = "status";

/// Derived status of a purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    /// Not yet issued to the supplier.
    Draft,
    /// Issued, nothing received.
    Issued,
    /// Some goods received, at least one item outstanding.
    Partial,
    /// Every item received in full.
    Received,
}

impl PurchaseOrderStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Issued => "issued",
            Self::Partial => "partial",
            Self::Received => "received",
        }
    }
}

impl fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseOrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "issued" => Ok(Self::Issued),
            "partial" => Ok(Self::Partial),
            "received" => Ok(Self::Received),
            other => Err(format!("unknown purchase order status '{other}'")),
        }
    }
}

/// Ordered vs received quantity of one purchase order item.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineProgress {
    pub quantity: f64,
    pub received_quantity: f64,
}

impl LineProgress {
    /// Read progress from an item document; missing numbers count as zero.
    #[must_use]
    pub fn from_document(item: &Document) -> Self {
        Self {
            quantity: item.f64_field(FIELD_QUANTITY).unwrap_or(0.0),
            received_quantity: item.f64_field(FIELD_RECEIVED).unwrap_or(0.0),
        }
    }
}

/// Pure purchase order status function.
///
/// # Examples
///
/// ```
/// use opstore::reconciler::{compute_status, LineProgress, PurchaseOrderStatus};
///
/// let lines = [
///     LineProgress { quantity: 50.0, received_quantity: 50.0 },
///     LineProgress { quantity: 10.0, received_quantity: 0.0 },
/// ];
/// assert_eq!(compute_status(true, &lines), PurchaseOrderStatus::Partial);
/// ```
#[must_use]
pub fn compute_status(issued: bool, lines: &[LineProgress]) -> PurchaseOrderStatus {
    let any_received = lines.iter().any(|l| l.received_quantity > 0.0);
    if !issued && !any_received {
        return PurchaseOrderStatus::Draft;
    }
    if !lines.is_empty() && lines.iter().all(|l| l.received_quantity >= l.quantity) {
        return PurchaseOrderStatus::Received;
    }
    if any_received {
        PurchaseOrderStatus::Partial
    } else {
        PurchaseOrderStatus::Issued
    }
}

/// Status of `order` given its items.
///
/// An order counts as issued unless its stored status is `draft`; an order
/// without a status is issued.
#[must_use]
pub fn status_of(order: &Document, items: &[Document]) -> PurchaseOrderStatus {
    let issued = !order.field_is(FIELD_STATUS, PurchaseOrderStatus::Draft.as_str());
    let lines: Vec<LineProgress> = items.iter().map(LineProgress::from_document).collect();
    compute_status(issued, &lines)
}

/// Returns true if `item` belongs to `order`.
#[must_use]
pub fn belongs_to(item: &Document, order: DocumentId) -> bool {
    item.id_field(FIELD_PURCHASE_ORDER) == Some(order)
}

/// Recompute and store a purchase order's status from its items.
///
/// Writes only when the stored status differs, so repeated calls settle.
///
/// # Errors
///
/// Returns `NotFound` if the purchase order is absent.
pub fn recompute_order_status(txn: &mut CascadeTxn<'_>, order_id: DocumentId) -> StoreResult<PurchaseOrderStatus> {
    let order = txn.get(&Collection::PurchaseOrders, order_id)?;
    let items = txn.filter(&Collection::PurchaseOrderItems, |item| belongs_to(item, order_id));
    let status = status_of(&order, &items);

    if order.str_field(FIELD_STATUS) != Some(status.as_str()) {
        debug!(%order_id, %status, "purchase order status recomputed");
        txn.update(
            &Collection::PurchaseOrders,
            order_id,
            json!({ FIELD_STATUS: status.as_str() }),
        )?;
    }
    Ok(status)
}

/// Deterministic id of the balance for a (material, warehouse) key.
#[must_use]
pub fn balance_id(material_id: &str, warehouse_id: &str) -> DocumentId {
    DocumentId::derived(&["inventory_balance", material_id, warehouse_id])
}

/// Typed view of an inventory balance document.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryBalance {
    pub id: DocumentId,
    pub material_id: String,
    pub warehouse_id: String,
    pub current_stock: f64,
    pub updated_at: DateTime<Utc>,
}

impl InventoryBalance {
    /// Read a balance document; `None` if key fields are missing.
    #[must_use]
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            id: doc.id,
            material_id: doc.str_field(FIELD_MATERIAL)?.to_string(),
            warehouse_id: doc.str_field(FIELD_WAREHOUSE)?.to_string(),
            current_stock: doc.f64_field(FIELD_CURRENT_STOCK).unwrap_or(0.0),
            updated_at: doc.updated_at,
        })
    }
}

/// Replay a signed stock delta against the (material, warehouse) balance,
/// creating the balance on first movement.
///
/// # Errors
///
/// Returns `InvariantViolation` if the balance would go negative and the
/// store does not allow negative stock.
pub fn apply_movement(
    txn: &mut CascadeTxn<'_>,
    material_id: &str,
    warehouse_id: &str,
    delta: f64,
    movement: Option<DocumentId>,
) -> StoreResult<InventoryBalance> {
    let id = balance_id(material_id, warehouse_id);
    let collection = Collection::InventoryBalances;
    let existing = txn.find(&collection, id);
    let current = existing
        .as_ref()
        .and_then(|d| d.f64_field(FIELD_CURRENT_STOCK))
        .unwrap_or(0.0);
    let resulting = current + delta;

    if resulting < 0.0 && !txn.config().allow_negative_stock {
        return Err(Violation::NegativeStock {
            material_id: material_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            current,
            delta,
            resulting,
        }
        .into());
    }

    let last_movement = movement.map(|m| m.to_string());
    let doc = if existing.is_some() {
        txn.update_raw(
            &collection,
            id,
            into_fields(json!({
                FIELD_CURRENT_STOCK: resulting,
                "last_movement_id": last_movement,
            }))?,
        )?
    } else {
        debug!(material_id, warehouse_id, "inventory balance created on first movement");
        txn.create_raw(
            &collection,
            id,
            into_fields(json!({
                FIELD_MATERIAL: material_id,
                FIELD_WAREHOUSE: warehouse_id,
                FIELD_CURRENT_STOCK: resulting,
                "last_movement_id": last_movement,
            }))?,
        )?
    };

    InventoryBalance::from_document(&doc).ok_or_else(|| {
        crate::error::StoreError::internal("balance document lost its key fields")
    })
}
