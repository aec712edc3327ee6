//! System setting history.

use serde_json::{json, Value};

use crate::bus::ChangeKind;
use crate::collection::Collection;
use crate::triggers::TriggerRule;

/// Rule appending a change log entry for every setting value change.
pub const RULE_SETTING_LOG: &str = "setting_change_is_logged";

/// Field holding a setting's value.
pub const FIELD_VALUE: &str = "value";

/// Settings rules.
///
/// The log entry is written in the same top-level write as the new value, so
/// no reader can observe the value without its history entry. Deleting a
/// setting logs a final entry with a null `new_value`. Actor fields
/// (`updated_by`, `confidence`, `explanation`) are recorded only when the
/// write itself set them; otherwise the entry carries null.
#[must_use]
pub fn rules() -> Vec<TriggerRule> {
    vec![TriggerRule::new(RULE_SETTING_LOG, Collection::SystemSettings, |txn, change| {
        let Some(current) = change.current() else {
            return Ok(());
        };
        // Actor metadata merges shallowly, so a field left untouched by this
        // write belongs to an earlier change.
        let pick = |field: &str| {
            if change.field_changed(field) {
                change.after_field(field).cloned()
            } else {
                None
            }
        };

        txn.create(
            &Collection::SettingsChangeLogs,
            json!({
                "setting_id": change.id.to_string(),
                "key": current.get("key").cloned().unwrap_or(Value::Null),
                "action": change.kind,
                "old_value": change.before_field(FIELD_VALUE).cloned().unwrap_or(Value::Null),
                "new_value": change.after_field(FIELD_VALUE).cloned().unwrap_or(Value::Null),
                "changed_by": pick("updated_by").unwrap_or(Value::Null),
                "confidence": pick("confidence").unwrap_or(Value::Null),
                "explanation": pick("explanation").unwrap_or(Value::Null),
                "changed_at": current.updated_at,
            }),
        )?;
        Ok(())
    })
    .when(|change| change.kind != ChangeKind::Updated || change.field_changed(FIELD_VALUE))]
}
