use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use opstore::workflows::orders::production_order_id;
use opstore::workflows::production::task_id;
use opstore::{
    CascadeLimit, ChangeKind, Collection, CollectionSnapshot, Document, HandlerResult, Store, StoreConfig,
    StoreError, TriggerRule, WorkflowConfig,
};

fn paid_order(store: &Store, status: &str) -> Document {
    store
        .create(
            &Collection::Orders,
            json!({
                "customer": "Loja Centro",
                "status": status,
                "items": [
                    {"product_id": "p-1", "name": "Camisa", "quantity": 3},
                    {"product_id": "p-2", "name": "Calça"},
                ],
            }),
        )
        .unwrap()
}

fn field(doc: &Document, name: &str) -> Value {
    doc.get(name).cloned().unwrap_or(Value::Null)
}

#[test]
fn paying_an_order_spawns_production_and_first_tasks() {
    let store = Store::new();
    let order = paid_order(&store, "pending");
    assert!(store.list(&Collection::ProductionOrders).unwrap().is_empty());

    store.update(&Collection::Orders, order.id, json!({"status": "paid"})).unwrap();

    let production = store.list(&Collection::ProductionOrders).unwrap();
    assert_eq!(production.len(), 2);
    assert_eq!(production[0].id, production_order_id(order.id, 0));
    assert_eq!(field(&production[0], "quantity"), json!(3.0));
    assert_eq!(field(&production[1], "quantity"), json!(1.0));
    assert_eq!(field(&production[1], "product_name"), json!("Calça"));
    for po in &production {
        assert_eq!(po.str_field("status"), Some("queued"));
        assert_eq!(po.str_field("current_stage"), Some("cutting"));
        assert_eq!(po.str_field("order_id"), Some(order.id.to_string().as_str()));
    }

    let tasks = store.list(&Collection::Tasks).unwrap();
    assert_eq!(tasks.len(), 2);
    let positions: Vec<Value> = tasks.iter().map(|t| field(t, "position")).collect();
    assert_eq!(positions, vec![json!(0), json!(1)]);
    assert!(tasks.iter().all(|t| t.field_is("stage", "cutting") && t.field_is("status", "todo")));
}

#[test]
fn order_created_paid_spawns_immediately() {
    let store = Store::new();
    paid_order(&store, "paid");
    assert_eq!(store.list(&Collection::ProductionOrders).unwrap().len(), 2);
}

#[test]
fn repeated_paid_update_does_not_duplicate() {
    let store = Store::new();
    let order = paid_order(&store, "paid");

    store
        .update(&Collection::Orders, order.id, json!({"status": "paid", "note": "resent"}))
        .unwrap();
    store.update(&Collection::Orders, order.id, json!({"status": "paid"})).unwrap();

    assert_eq!(store.list(&Collection::ProductionOrders).unwrap().len(), 2);
    assert_eq!(store.list(&Collection::Tasks).unwrap().len(), 2);
}

#[test]
fn paid_round_trip_does_not_duplicate() {
    let store = Store::new();
    let order = paid_order(&store, "paid");

    store.update(&Collection::Orders, order.id, json!({"status": "pending"})).unwrap();
    store.update(&Collection::Orders, order.id, json!({"status": "paid"})).unwrap();

    assert_eq!(store.list(&Collection::ProductionOrders).unwrap().len(), 2);
    assert_eq!(store.list(&Collection::Tasks).unwrap().len(), 2);
}

#[test]
fn custom_paid_statuses_are_honoured() {
    let store = Store::builder()
        .workflows(WorkflowConfig {
            paid_statuses: vec!["settled".to_string()],
            ..WorkflowConfig::default()
        })
        .build()
        .unwrap();
    paid_order(&store, "paid");
    assert!(store.list(&Collection::ProductionOrders).unwrap().is_empty());
    paid_order(&store, "settled");
    assert_eq!(store.list(&Collection::ProductionOrders).unwrap().len(), 2);
}

#[test]
fn finishing_tasks_walks_the_stages() {
    let store = Store::new();
    let order = paid_order(&store, "paid");
    let po = production_order_id(order.id, 0);

    for (stage, next) in [("cutting", "sewing"), ("sewing", "finishing"), ("finishing", "packaging")] {
        store
            .update(&Collection::Tasks, task_id(po, stage), json!({"status": "done"}))
            .unwrap();
        let production = store.get(&Collection::ProductionOrders, po).unwrap();
        assert_eq!(production.str_field("status"), Some("in_progress"));
        assert_eq!(production.str_field("current_stage"), Some(next));
        assert!(store.find(&Collection::Tasks, task_id(po, next)).unwrap().is_some());
    }

    store
        .update(&Collection::Tasks, task_id(po, "packaging"), json!({"status": "done"}))
        .unwrap();
    let production = store.get(&Collection::ProductionOrders, po).unwrap();
    assert_eq!(production.str_field("status"), Some("completed"));

    // The other line is untouched.
    let sibling = store
        .get(&Collection::ProductionOrders, production_order_id(order.id, 1))
        .unwrap();
    assert_eq!(sibling.str_field("status"), Some("queued"));
}

#[test]
fn seeded_tasks_queue_behind_open_ones() {
    let store = Store::new();
    let first = paid_order(&store, "paid");
    let second = paid_order(&store, "paid");

    let task = store
        .get(&Collection::Tasks, task_id(production_order_id(second.id, 1), "cutting"))
        .unwrap();
    assert_eq!(field(&task, "position"), json!(3));

    store
        .update(
            &Collection::Tasks,
            task_id(production_order_id(first.id, 0), "cutting"),
            json!({"status": "done"}),
        )
        .unwrap();
    let sewing = store
        .get(&Collection::Tasks, task_id(production_order_id(first.id, 0), "sewing"))
        .unwrap();
    assert_eq!(field(&sewing, "position"), json!(0));
}

#[test]
fn cascade_notifications_follow_commit_order() {
    let store = Store::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = store
        .subscribe_collection(&Collection::ProductionOrders, move |s: &CollectionSnapshot| -> HandlerResult {
            sink.lock().unwrap().push(s.len());
            Ok(())
        })
        .unwrap();

    paid_order(&store, "paid");
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

fn ping_pong_store(config: StoreConfig) -> Store {
    let ping = Collection::custom("ping");
    let pong = Collection::custom("pong");
    let pong_target = pong.clone();
    let ping_target = ping.clone();
    Store::builder()
        .config(config)
        .without_standard_rules()
        .rule(
            TriggerRule::new("ping_writes_pong", ping, move |txn, change| {
                let n = change.after.as_ref().and_then(|d| d.f64_field("n")).unwrap_or(0.0);
                txn.create(&pong_target, json!({ "n": n + 1.0 }))?;
                Ok(())
            })
            .on_kinds(&[ChangeKind::Created]),
        )
        .rule(
            TriggerRule::new("pong_writes_ping", pong, move |txn, change| {
                let n = change.after.as_ref().and_then(|d| d.f64_field("n")).unwrap_or(0.0);
                txn.create(&ping_target, json!({ "n": n + 1.0 }))?;
                Ok(())
            })
            .on_kinds(&[ChangeKind::Created]),
        )
        .build()
        .unwrap()
}

#[test]
fn runaway_rules_hit_the_depth_ceiling_and_roll_back() {
    let store = ping_pong_store(StoreConfig::default());
    let ping = Collection::custom("ping");
    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    let _sub = store
        .subscribe_collection(&ping, move |_: &CollectionSnapshot| -> HandlerResult {
            *sink.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

    let err = store.create(&ping, json!({"n": 0})).unwrap_err();
    match &err {
        StoreError::CascadeLimitExceeded { rule, limit, .. } => {
            assert_eq!(*limit, CascadeLimit::Depth(16));
            assert!(rule == "ping_writes_pong" || rule == "pong_writes_ping");
        }
        other => panic!("expected cascade limit, got {other}"),
    }
    assert!(!err.is_recoverable());

    assert!(store.list(&ping).unwrap().is_empty());
    assert!(store.list(&Collection::custom("pong")).unwrap().is_empty());
    assert_eq!(store.sequence().unwrap(), 0);
    // Only the initial snapshot; the aborted write notified nobody.
    assert_eq!(*seen.lock().unwrap(), 1);
}

#[test]
fn fan_out_hits_the_write_ceiling() {
    let fan = Collection::custom("fan");
    let target = fan.clone();
    let store = Store::builder()
        .config(StoreConfig {
            max_cascade_depth: 64,
            max_cascade_writes: 10,
            ..StoreConfig::default()
        })
        .without_standard_rules()
        .rule(TriggerRule::new("fan_out", fan.clone(), move |txn, _| {
            txn.create(&target, json!({}))?;
            txn.create(&target, json!({}))?;
            Ok(())
        }))
        .build()
        .unwrap();

    let err = store.create(&fan, json!({})).unwrap_err();
    assert!(matches!(
        err,
        StoreError::CascadeLimitExceeded {
            limit: CascadeLimit::Writes(10),
            ..
        }
    ));
    assert!(store.list(&fan).unwrap().is_empty());
}

#[test]
fn failing_rule_rolls_back_the_whole_cascade() {
    let store = Store::builder()
        .rule(TriggerRule::new("reject_big_orders", Collection::ProductionOrders, |_, change| {
            let quantity = change.after.as_ref().and_then(|d| d.f64_field("quantity")).unwrap_or(0.0);
            if quantity > 2.0 {
                return Err(StoreError::internal("capacity exceeded"));
            }
            Ok(())
        }))
        .build()
        .unwrap();
    let order = paid_order(&store, "pending");

    let err = store
        .update(&Collection::Orders, order.id, json!({"status": "paid"}))
        .unwrap_err();
    assert!(matches!(err, StoreError::Internal { .. }));

    assert_eq!(store.get(&Collection::Orders, order.id).unwrap().str_field("status"), Some("pending"));
    assert!(store.list(&Collection::ProductionOrders).unwrap().is_empty());
    assert!(store.list(&Collection::Tasks).unwrap().is_empty());
}

type Observed = Arc<Mutex<Vec<usize>>>;

fn record_into(log: &Observed) -> impl Fn(&CollectionSnapshot) -> HandlerResult + Send + Sync + 'static {
    let sink = Arc::clone(log);
    move |s: &CollectionSnapshot| -> HandlerResult {
        sink.lock().unwrap().push(s.len());
        Ok(())
    }
}

fn deterministic_run(tasks_first: bool) -> (Vec<Vec<(String, Value)>>, Vec<usize>, Vec<usize>) {
    let store = Store::new();
    let production_seen: Observed = Arc::default();
    let tasks_seen: Observed = Arc::default();

    let _subs = if tasks_first {
        vec![
            store.subscribe_collection(&Collection::Tasks, record_into(&tasks_seen)).unwrap(),
            store
                .subscribe_collection(&Collection::ProductionOrders, record_into(&production_seen))
                .unwrap(),
        ]
    } else {
        vec![
            store
                .subscribe_collection(&Collection::ProductionOrders, record_into(&production_seen))
                .unwrap(),
            store.subscribe_collection(&Collection::Tasks, record_into(&tasks_seen)).unwrap(),
        ]
    };

    let order = store
        .create(
            &Collection::Orders,
            json!({"status": "pending", "items": [{"product_id": "p-1"}, {"product_id": "p-2"}]}),
        )
        .unwrap();
    store.update(&Collection::Orders, order.id, json!({"status": "paid"})).unwrap();

    let tasks = store
        .list(&Collection::Tasks)
        .unwrap()
        .into_iter()
        .map(|t| {
            let mut fields: Vec<(String, Value)> = t.fields.into_iter().collect();
            fields.retain(|(k, _)| k != "production_order_id");
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            fields
        })
        .collect();

    let production = production_seen.lock().unwrap().clone();
    let seen_tasks = tasks_seen.lock().unwrap().clone();
    (tasks, production, seen_tasks)
}

#[test]
fn cascades_do_not_depend_on_handler_registration_order() {
    let (tasks_a, production_a, seen_a) = deterministic_run(true);
    let (tasks_b, production_b, seen_b) = deterministic_run(false);

    assert_eq!(tasks_a, tasks_b);
    assert_eq!(production_a, production_b);
    assert_eq!(seen_a, seen_b);
    assert_eq!(production_a, vec![0, 1, 2]);
    assert_eq!(seen_a, vec![0, 1, 2]);
}

#[test]
fn refinishing_an_earlier_stage_leaves_the_order_alone() {
    let store = Store::new();
    let order = paid_order(&store, "paid");
    let po = production_order_id(order.id, 0);

    for stage in ["cutting", "sewing"] {
        store
            .update(&Collection::Tasks, task_id(po, stage), json!({"status": "done"}))
            .unwrap();
    }
    let before = store.get(&Collection::ProductionOrders, po).unwrap();
    assert_eq!(before.str_field("current_stage"), Some("finishing"));

    store
        .update(&Collection::Tasks, task_id(po, "cutting"), json!({"status": "todo"}))
        .unwrap();
    store
        .update(&Collection::Tasks, task_id(po, "cutting"), json!({"status": "done"}))
        .unwrap();

    let after = store.get(&Collection::ProductionOrders, po).unwrap();
    assert_eq!(after.str_field("status"), Some("in_progress"));
    assert_eq!(after.str_field("current_stage"), Some("finishing"));
    assert_eq!(after.updated_at, before.updated_at);
}

#[test]
fn completed_orders_stay_completed() {
    let store = Store::new();
    let order = paid_order(&store, "paid");
    let po = production_order_id(order.id, 0);

    for stage in ["cutting", "sewing", "finishing", "packaging"] {
        store
            .update(&Collection::Tasks, task_id(po, stage), json!({"status": "done"}))
            .unwrap();
    }
    assert_eq!(
        store.get(&Collection::ProductionOrders, po).unwrap().str_field("status"),
        Some("completed")
    );

    store
        .update(&Collection::Tasks, task_id(po, "cutting"), json!({"status": "todo"}))
        .unwrap();
    store
        .update(&Collection::Tasks, task_id(po, "cutting"), json!({"status": "done"}))
        .unwrap();

    let production = store.get(&Collection::ProductionOrders, po).unwrap();
    assert_eq!(production.str_field("status"), Some("completed"));
    assert_eq!(production.str_field("current_stage"), Some("packaging"));
}

#[test]
fn setting_changes_are_logged() {
    let store = Store::new();
    let setting = store
        .create(
            &Collection::SystemSettings,
            json!({"key": "currency", "value": "BRL", "updated_by": "ana"}),
        )
        .unwrap();
    store
        .update(
            &Collection::SystemSettings,
            setting.id,
            json!({"value": "USD", "updated_by": "assistant", "confidence": 0.9, "explanation": "export orders"}),
        )
        .unwrap();
    store
        .update(&Collection::SystemSettings, setting.id, json!({"description": "display currency"}))
        .unwrap();
    store.delete(&Collection::SystemSettings, setting.id).unwrap();

    let logs = store.list(&Collection::SettingsChangeLogs).unwrap();
    assert_eq!(logs.len(), 3);

    assert_eq!(field(&logs[0], "old_value"), Value::Null);
    assert_eq!(field(&logs[0], "new_value"), json!("BRL"));
    assert_eq!(field(&logs[0], "changed_by"), json!("ana"));

    assert_eq!(field(&logs[1], "key"), json!("currency"));
    assert_eq!(field(&logs[1], "old_value"), json!("BRL"));
    assert_eq!(field(&logs[1], "new_value"), json!("USD"));
    assert_eq!(field(&logs[1], "changed_by"), json!("assistant"));
    assert_eq!(field(&logs[1], "confidence"), json!(0.9));
    assert_eq!(field(&logs[1], "explanation"), json!("export orders"));

    assert_eq!(field(&logs[2], "action"), json!("deleted"));
    assert_eq!(field(&logs[2], "new_value"), Value::Null);
}

#[test]
fn setting_log_only_credits_the_actor_of_each_change() {
    let store = Store::new();
    let setting = store
        .create(
            &Collection::SystemSettings,
            json!({"key": "currency", "value": "BRL", "updated_by": "ana"}),
        )
        .unwrap();
    store
        .update(
            &Collection::SystemSettings,
            setting.id,
            json!({"value": "USD", "updated_by": "assistant", "confidence": 0.9, "explanation": "export orders"}),
        )
        .unwrap();
    store
        .update(&Collection::SystemSettings, setting.id, json!({"value": "EUR"}))
        .unwrap();

    let logs = store.list(&Collection::SettingsChangeLogs).unwrap();
    assert_eq!(logs.len(), 3);
    assert_eq!(field(&logs[2], "old_value"), json!("USD"));
    assert_eq!(field(&logs[2], "new_value"), json!("EUR"));
    assert_eq!(field(&logs[2], "changed_by"), Value::Null);
    assert_eq!(field(&logs[2], "confidence"), Value::Null);
    assert_eq!(field(&logs[2], "explanation"), Value::Null);
}
