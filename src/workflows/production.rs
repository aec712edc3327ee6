//! Production kanban: tasks move a production order through its stages.

use serde_json::json;
use tracing::debug;

use crate::bus::ChangeKind;
use crate::collection::Collection;
use crate::config::WorkflowConfig;
use crate::document::{Document, DocumentId};
use crate::error::StoreResult;
use crate::triggers::{CascadeTxn, TriggerRule};

/// Rule advancing a production order when a stage task is done.
pub const RULE_TASK_DONE: &str = "task_done_advances_stage";

/// Status of a production order whose last stage is done.
pub const PRODUCTION_COMPLETED: &str = "completed";

/// Status of a freshly seeded task.
pub const TASK_TODO: &str = "todo";

/// Deterministic id of the task for one stage of a production order.
#[must_use]
pub fn task_id(production_order_id: DocumentId, stage: &str) -> DocumentId {
    DocumentId::derived(&["task", &production_order_id.to_string(), stage])
}

/// Seed the task for `stage` at the end of that stage's open queue.
///
/// Returns `None` if the task already exists.
pub(crate) fn seed_task(
    txn: &mut CascadeTxn<'_>,
    production_order_id: DocumentId,
    stage: &str,
    workflows: &WorkflowConfig,
) -> StoreResult<Option<Document>> {
    let position = txn
        .filter(&Collection::Tasks, |t| {
            t.field_is("stage", stage) && !t.field_is("status", &workflows.task_done_status)
        })
        .len();

    txn.spawn(
        &Collection::Tasks,
        task_id(production_order_id, stage),
        json!({
            "production_order_id": production_order_id.to_string(),
            "stage": stage,
            "status": TASK_TODO,
            "position": position,
        }),
    )
}

/// Production rules.
///
/// Only the task for the order's current stage advances it. Re-finishing an
/// earlier stage, or any task of a completed order, leaves the order as is.
#[must_use]
pub fn rules(workflows: &WorkflowConfig) -> Vec<TriggerRule> {
    let wf = workflows.clone();
    let done = workflows.task_done_status.clone();

    vec![TriggerRule::new(RULE_TASK_DONE, Collection::Tasks, move |txn, change| {
        let Some(task) = change.after.as_ref() else {
            return Ok(());
        };
        let (Some(po_id), Some(stage)) = (task.id_field("production_order_id"), task.str_field("stage")) else {
            return Ok(());
        };
        let Some(order) = txn.find(&Collection::ProductionOrders, po_id) else {
            debug!(%po_id, "task references a missing production order");
            return Ok(());
        };
        if order.field_is("status", PRODUCTION_COMPLETED) || !order.field_is("current_stage", stage) {
            debug!(%po_id, stage, "task is not for the current stage; order left as is");
            return Ok(());
        }

        match wf.next_stage(stage) {
            Some(next) => {
                seed_task(txn, po_id, next, &wf)?;
                txn.update(
                    &Collection::ProductionOrders,
                    po_id,
                    json!({"status": "in_progress", "current_stage": next}),
                )?;
            }
            None => {
                txn.update(
                    &Collection::ProductionOrders,
                    po_id,
                    json!({"status": PRODUCTION_COMPLETED}),
                )?;
            }
        }
        Ok(())
    })
    .on_kinds(&[ChangeKind::Updated])
    .when(move |change| change.transitioned("status", |s| s == Some(done.as_str())))]
}
