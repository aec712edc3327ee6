//! Inventory movements drive balances.

use serde_json::Value;

use crate::collection::Collection;
use crate::document::Document;
use crate::error::{StoreResult, Violation};
use crate::reconciler::{apply_movement, FIELD_MATERIAL, FIELD_QUANTITY, FIELD_WAREHOUSE};
use crate::triggers::TriggerRule;

/// Rule replaying movement writes onto balances.
pub const RULE_MOVEMENT_BALANCE: &str = "inventory_movement_updates_balance";

#[derive(Debug, PartialEq)]
struct MovementKey {
    material_id: String,
    warehouse_id: String,
    quantity: f64,
}

impl MovementKey {
    fn same_key(&self, other: &Self) -> bool {
        self.material_id == other.material_id && self.warehouse_id == other.warehouse_id
    }
}

fn movement_key(doc: &Document) -> StoreResult<MovementKey> {
    let required = |field: &str| -> StoreResult<String> {
        doc.str_field(field)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Violation::MissingField {
                    collection: Collection::InventoryMovements,
                    field: field.to_string(),
                }
                .into()
            })
    };

    let quantity = match doc.get(FIELD_QUANTITY) {
        None | Some(Value::Null) => {
            return Err(Violation::MissingField {
                collection: Collection::InventoryMovements,
                field: FIELD_QUANTITY.to_string(),
            }
            .into())
        }
        Some(v) => v.as_f64().filter(|q| q.is_finite()).ok_or_else(|| Violation::InvalidField {
            collection: Collection::InventoryMovements,
            field: FIELD_QUANTITY.to_string(),
            reason: format!("expected a finite number, got {v}"),
        })?,
    };

    Ok(MovementKey {
        material_id: required(FIELD_MATERIAL)?,
        warehouse_id: required(FIELD_WAREHOUSE)?,
        quantity,
    })
}

/// Movement rules.
///
/// Creating a movement adds its signed quantity to the matching balance.
/// Editing or deleting a movement replays the difference, so the balance
/// always equals the sum of the movements currently recorded for its key.
#[must_use]
pub fn rules() -> Vec<TriggerRule> {
    vec![TriggerRule::new(
        RULE_MOVEMENT_BALANCE,
        Collection::InventoryMovements,
        |txn, change| {
            let before = change.before.as_ref().map(movement_key).transpose()?;
            let after = change.after.as_ref().map(movement_key).transpose()?;

            match (before, after) {
                (Some(old), Some(new)) if old.same_key(&new) => {
                    let delta = new.quantity - old.quantity;
                    if delta != 0.0 {
                        apply_movement(txn, &new.material_id, &new.warehouse_id, delta, Some(change.id))?;
                    }
                }
                (old, new) => {
                    if let Some(old) = old {
                        apply_movement(txn, &old.material_id, &old.warehouse_id, -old.quantity, Some(change.id))?;
                    }
                    if let Some(new) = new {
                        apply_movement(txn, &new.material_id, &new.warehouse_id, new.quantity, Some(change.id))?;
                    }
                }
            }
            Ok(())
        },
    )]
}
