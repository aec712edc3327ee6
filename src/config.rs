//! Store and workflow configuration.

use serde::{Deserialize, Serialize};

/// Store-level limits and policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum nesting of trigger-induced writes below one top-level write.
    pub max_cascade_depth: usize,
    /// Maximum number of writes (top-level included) one call may perform.
    pub max_cascade_writes: usize,
    /// Whether inventory balances may go below zero.
    pub allow_negative_stock: bool,
    /// Per-stream buffer capacity for `Store::watch_collection`.
    pub stream_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 16,
            max_cascade_writes: 4096,
            allow_negative_stock: false,
            stream_capacity: 1024,
        }
    }
}

/// Parameters of the built-in business rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Order statuses that count as paid.
    pub paid_statuses: Vec<String>,
    /// Production stages in order; the first one seeds new production orders.
    pub production_stages: Vec<String>,
    /// Task status that completes a stage.
    pub task_done_status: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            paid_statuses: vec!["paid".to_string()],
            production_stages: ["cutting", "sewing", "finishing", "packaging"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            task_done_status: "done".to_string(),
        }
    }
}

impl WorkflowConfig {
    /// Returns true if `status` counts as paid.
    #[must_use]
    pub fn is_paid(&self, status: Option<&str>) -> bool {
        status.is_some_and(|s| self.paid_statuses.iter().any(|p| p == s))
    }

    /// The first production stage.
    #[must_use]
    pub fn first_stage(&self) -> Option<&str> {
        self.production_stages.first().map(String::as_str)
    }

    /// The stage following `stage`, if any.
    #[must_use]
    pub fn next_stage(&self, stage: &str) -> Option<&str> {
        let pos = self.production_stages.iter().position(|s| s == stage)?;
        self.production_stages.get(pos + 1).map(String::as_str)
    }
}
