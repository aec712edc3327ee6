use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

use opstore::reconciler::{compute_status, LineProgress};
use opstore::{Collection, Document, DocumentId, PurchaseOrderStatus, Store, Violation};

struct Fixture {
    store: Store,
    order: DocumentId,
    cotton: DocumentId,
    linen: DocumentId,
}

fn issued_order() -> Fixture {
    let store = Store::new();
    let order = store
        .create(
            &Collection::PurchaseOrders,
            json!({"number": "PO-0042", "supplier": "Tecelagem Sul", "status": "issued", "warehouse_id": "W1"}),
        )
        .unwrap();
    let item = |material: &str, quantity: f64| {
        store
            .create(
                &Collection::PurchaseOrderItems,
                json!({"purchase_order_id": order.id.to_string(), "material_id": material, "quantity": quantity}),
            )
            .unwrap()
            .id
    };
    let cotton = item("algodao", 50.0);
    let linen = item("linho", 10.0);
    Fixture {
        store,
        order: order.id,
        cotton,
        linen,
    }
}

fn stored_status(store: &Store, order: DocumentId) -> String {
    store
        .get(&Collection::PurchaseOrders, order)
        .unwrap()
        .str_field("status")
        .unwrap()
        .to_string()
}

fn receipts(store: &Store) -> Vec<Document> {
    store
        .list(&Collection::InventoryMovements)
        .unwrap()
        .into_iter()
        .filter(|m| m.field_is("source", "purchase_order_receipt"))
        .collect()
}

#[test]
fn partial_then_full_receipt() {
    let Fixture {
        store,
        order,
        cotton,
        linen,
    } = issued_order();
    assert_eq!(stored_status(&store, order), "issued");

    store.receive_purchase_order_item(cotton, 50.0).unwrap();
    assert_eq!(stored_status(&store, order), "partial");
    assert_eq!(store.purchase_order_status(order).unwrap(), PurchaseOrderStatus::Partial);

    store.receive_purchase_order_item(linen, 10.0).unwrap();
    assert_eq!(stored_status(&store, order), "received");

    let moves = receipts(&store);
    assert_eq!(moves.len(), 2);
    assert_eq!(moves[0].str_field("type"), Some("in"));
    assert_eq!(moves[0].f64_field("quantity"), Some(50.0));
    assert_eq!(moves[0].str_field("warehouse_id"), Some("W1"));
    assert_eq!(moves[0].str_field("purchase_order_item_id"), Some(cotton.to_string().as_str()));

    assert_eq!(store.balance("algodao", "W1").unwrap().unwrap().current_stock, 50.0);
    assert_eq!(store.balance("linho", "W1").unwrap().unwrap().current_stock, 10.0);
}

#[test]
fn receipts_accumulate_per_item() {
    let Fixture { store, order, cotton, .. } = issued_order();

    store.receive_purchase_order_item(cotton, 20.0).unwrap();
    let item = store.receive_purchase_order_item(cotton, 30.0).unwrap();

    assert_eq!(item.f64_field("received_quantity"), Some(50.0));
    let quantities: Vec<Option<f64>> = receipts(&store).iter().map(|m| m.f64_field("quantity")).collect();
    assert_eq!(quantities, vec![Some(20.0), Some(30.0)]);
    assert_eq!(store.balance("algodao", "W1").unwrap().unwrap().current_stock, 50.0);
    assert_eq!(stored_status(&store, order), "partial");
}

#[test]
fn direct_received_quantity_edits_move_stock_too() {
    let Fixture { store, cotton, .. } = issued_order();

    store
        .update(&Collection::PurchaseOrderItems, cotton, json!({"received_quantity": 12}))
        .unwrap();
    store
        .update(&Collection::PurchaseOrderItems, cotton, json!({"note": "pallet 2 pending"}))
        .unwrap();

    assert_eq!(receipts(&store).len(), 1);
    assert_eq!(store.balance("algodao", "W1").unwrap().unwrap().current_stock, 12.0);
}

#[test]
fn received_quantity_never_decreases() {
    let Fixture { store, order, cotton, .. } = issued_order();
    store.receive_purchase_order_item(cotton, 20.0).unwrap();

    let err = store
        .update(&Collection::PurchaseOrderItems, cotton, json!({"received_quantity": 5}))
        .unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&Violation::ReceivedQuantityDecreased {
            item: cotton,
            previous: 20.0,
            attempted: 5.0,
        })
    );

    let item = store.get(&Collection::PurchaseOrderItems, cotton).unwrap();
    assert_eq!(item.f64_field("received_quantity"), Some(20.0));
    assert_eq!(receipts(&store).len(), 1);
    assert_eq!(stored_status(&store, order), "partial");
}

#[test]
fn non_positive_receipts_are_rejected() {
    let Fixture { store, cotton, .. } = issued_order();
    for quantity in [0.0, -3.0, f64::NAN] {
        let err = store.receive_purchase_order_item(cotton, quantity).unwrap_err();
        assert!(matches!(err.violation(), Some(Violation::NonPositiveReceipt { .. })));
    }
    assert!(receipts(&store).is_empty());
}

#[test]
fn draft_orders_cannot_receive() {
    let store = Store::new();
    let order = store
        .create(&Collection::PurchaseOrders, json!({"status": "draft", "warehouse_id": "W1"}))
        .unwrap();
    let item = store
        .create(
            &Collection::PurchaseOrderItems,
            json!({"purchase_order_id": order.id.to_string(), "material_id": "linho", "quantity": 5}),
        )
        .unwrap();
    assert_eq!(stored_status(&store, order.id), "draft");

    let err = store.receive_purchase_order_item(item.id, 5.0).unwrap_err();
    assert_eq!(
        err.violation(),
        Some(&Violation::ReceiptOnDraft {
            purchase_order: order.id
        })
    );

    store
        .update(&Collection::PurchaseOrders, order.id, json!({"status": "issued"}))
        .unwrap();
    store.receive_purchase_order_item(item.id, 5.0).unwrap();
    assert_eq!(stored_status(&store, order.id), "received");
}

#[test]
fn receipts_against_unknown_items_or_orders_are_not_found() {
    let store = Store::new();
    assert!(store
        .receive_purchase_order_item(DocumentId::new(), 1.0)
        .unwrap_err()
        .is_not_found());

    let orphan = store
        .create(
            &Collection::PurchaseOrderItems,
            json!({"purchase_order_id": DocumentId::new().to_string(), "material_id": "linho", "quantity": 1}),
        )
        .unwrap();
    assert!(store
        .receive_purchase_order_item(orphan.id, 1.0)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn stale_status_writes_are_normalised() {
    let Fixture { store, order, .. } = issued_order();

    store
        .update(&Collection::PurchaseOrders, order, json!({"status": "received"}))
        .unwrap();

    assert_eq!(stored_status(&store, order), "issued");
    assert!(store.list(&Collection::Notifications).unwrap().is_empty());
}

#[test]
fn full_receipt_notifies_once() {
    let Fixture {
        store,
        order,
        cotton,
        linen,
    } = issued_order();
    store.receive_purchase_order_item(cotton, 50.0).unwrap();
    store.receive_purchase_order_item(linen, 10.0).unwrap();
    // Over-receipt keeps the order received and must not notify again.
    store.receive_purchase_order_item(linen, 2.0).unwrap();

    let notes = store.list(&Collection::Notifications).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].str_field("kind"), Some("purchase_order_received"));
    assert_eq!(notes[0].str_field("purchase_order_id"), Some(order.to_string().as_str()));
    assert!(notes[0].str_field("message").unwrap().contains("PO-0042"));
}

#[test]
fn item_changes_only_touch_their_own_order() {
    let Fixture { store, order, cotton, .. } = issued_order();
    let other = store
        .create(&Collection::PurchaseOrders, json!({"status": "issued", "warehouse_id": "W2"}))
        .unwrap();
    let other_item = store
        .create(
            &Collection::PurchaseOrderItems,
            json!({"purchase_order_id": other.id.to_string(), "material_id": "linho", "quantity": 4}),
        )
        .unwrap();

    store.receive_purchase_order_item(other_item.id, 4.0).unwrap();
    assert_eq!(stored_status(&store, other.id), "received");
    assert_eq!(stored_status(&store, order), "issued");
    assert_eq!(store.balance("linho", "W2").unwrap().unwrap().current_stock, 4.0);

    store.receive_purchase_order_item(cotton, 1.0).unwrap();
    assert_eq!(stored_status(&store, other.id), "received");
}

#[test]
fn moving_and_deleting_items_recomputes_both_orders() {
    let Fixture {
        store,
        order,
        cotton,
        linen,
    } = issued_order();
    store.receive_purchase_order_item(linen, 10.0).unwrap();
    assert_eq!(stored_status(&store, order), "partial");

    store.delete(&Collection::PurchaseOrderItems, cotton).unwrap();
    assert_eq!(stored_status(&store, order), "received");

    let other = store
        .create(&Collection::PurchaseOrders, json!({"status": "issued", "warehouse_id": "W1"}))
        .unwrap();
    store
        .update(
            &Collection::PurchaseOrderItems,
            linen,
            json!({"purchase_order_id": other.id.to_string()}),
        )
        .unwrap();
    assert_eq!(stored_status(&store, order), "issued");
    assert_eq!(stored_status(&store, other.id), "received");
}

#[test]
fn reconcile_repairs_and_reports_status() {
    let Fixture { store, order, cotton, .. } = issued_order();
    store.receive_purchase_order_item(cotton, 50.0).unwrap();

    assert_eq!(store.reconcile_purchase_order(order).unwrap(), PurchaseOrderStatus::Partial);
    assert_eq!(store.reconcile_purchase_order(order).unwrap(), PurchaseOrderStatus::Partial);
    assert!(store.reconcile_purchase_order(DocumentId::new()).unwrap_err().is_not_found());
}

#[test]
fn status_stream_tracks_receipts() {
    let Fixture {
        store,
        order,
        cotton,
        linen,
    } = issued_order();
    let stream = store.watch_collection(&Collection::PurchaseOrders).unwrap();

    store.receive_purchase_order_item(cotton, 50.0).unwrap();
    store.receive_purchase_order_item(linen, 10.0).unwrap();

    let statuses: Vec<String> = stream
        .drain()
        .iter()
        .map(|s| s.get(order).and_then(|d| d.str_field("status")).unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["issued", "partial", "received"]);
}

fn lines() -> impl Strategy<Value = Vec<(u8, u8)>> {
    prop::collection::vec((1u8..20, 0u8..25), 0..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn status_is_a_pure_function_of_items(issued in any::<bool>(), raw in lines()) {
        let progress: Vec<LineProgress> = raw
            .iter()
            .map(|&(q, r)| LineProgress { quantity: f64::from(q), received_quantity: f64::from(r) })
            .collect();
        let first = compute_status(issued, &progress);
        prop_assert_eq!(first, compute_status(issued, &progress));

        let mut reversed = progress.clone();
        reversed.reverse();
        prop_assert_eq!(first, compute_status(issued, &reversed));
    }

    #[test]
    fn stored_status_matches_recomputation(raw in lines(), noise in lines()) {
        let store = Store::new();
        let order = store
            .create(&Collection::PurchaseOrders, json!({"status": "issued", "warehouse_id": "W1"}))
            .unwrap();
        let other = store
            .create(&Collection::PurchaseOrders, json!({"status": "issued", "warehouse_id": "W1"}))
            .unwrap();

        let mut items = Vec::new();
        for &(quantity, _) in &raw {
            items.push(
                store
                    .create(
                        &Collection::PurchaseOrderItems,
                        json!({"purchase_order_id": order.id.to_string(), "material_id": "linho", "quantity": quantity}),
                    )
                    .unwrap()
                    .id,
            );
        }
        let before = store.purchase_order_status(order.id).unwrap();

        for &(quantity, received) in &noise {
            let item = store
                .create(
                    &Collection::PurchaseOrderItems,
                    json!({"purchase_order_id": other.id.to_string(), "material_id": "algodao", "quantity": quantity}),
                )
                .unwrap();
            if received > 0 {
                store.receive_purchase_order_item(item.id, f64::from(received)).unwrap();
            }
        }
        prop_assert_eq!(store.purchase_order_status(order.id).unwrap(), before);

        for (id, &(_, received)) in items.iter().zip(&raw) {
            if received > 0 {
                store.receive_purchase_order_item(*id, f64::from(received)).unwrap();
            }
        }

        let expected = store.purchase_order_status(order.id).unwrap();
        let stored: PurchaseOrderStatus = stored_status(&store, order.id).parse().unwrap();
        prop_assert_eq!(stored, expected);
        prop_assert_eq!(store.reconcile_purchase_order(order.id).unwrap(), expected);
    }
}
