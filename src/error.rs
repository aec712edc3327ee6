//! Error types for opstore.
//!
//! All errors are strongly typed using thiserror so callers can pattern match
//! on the specific failure and decide whether a retry with corrected input
//! makes sense.

use thiserror::Error;

use crate::collection::Collection;
use crate::document::DocumentId;

/// Invariant breaches detected while applying a write or one of its cascades.
#[allow(missing_docs)]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Violation {
    #[error("stock for material '{material_id}' at warehouse '{warehouse_id}' would become {resulting} (current {current}, delta {delta})")]
    NegativeStock {
        material_id: String,
        warehouse_id: String,
        current: f64,
        delta: f64,
        resulting: f64,
    },

    #[error("received quantity of purchase order item {item} cannot decrease from {previous} to {attempted}")]
    ReceivedQuantityDecreased {
        item: DocumentId,
        previous: f64,
        attempted: f64,
    },

    #[error("receipt quantity must be positive, got {quantity}")]
    NonPositiveReceipt {
        quantity: f64,
    },

    #[error("purchase order {purchase_order} is still a draft and cannot receive goods")]
    ReceiptOnDraft {
        purchase_order: DocumentId,
    },

    #[error("{collection} document is missing required field '{field}'")]
    MissingField {
        collection: Collection,
        field: String,
    },

    #[error("{collection} field '{field}' is invalid: {reason}")]
    InvalidField {
        collection: Collection,
        field: String,
        reason: String,
    },

    #[error("{collection} is derived and cannot be written directly")]
    DerivedCollection {
        collection: Collection,
    },
}

/// Which cascade ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeLimit {
    /// Nested trigger depth exceeded the configured maximum.
    Depth(usize),
    /// Total writes for one top-level call exceeded the configured maximum.
    Writes(usize),
}

impl std::fmt::Display for CascadeLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Depth(max) => write!(f, "depth > {max}"),
            Self::Writes(max) => write!(f, "writes > {max}"),
        }
    }
}

/// Top-level error type for opstore.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} document not found: {id}")]
    NotFound {
        collection: Collection,
        id: DocumentId,
    },

    #[error("Cascade limit exceeded ({limit}) by rule '{rule}' writing to {collection}")]
    CascadeLimitExceeded {
        rule: String,
        collection: Collection,
        limit: CascadeLimit,
    },

    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] Violation),

    #[error("Malformed document: {reason}")]
    MalformedDocument {
        reason: String,
    },

    #[error("Trigger rule '{name}' is already registered")]
    DuplicateRule {
        name: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StoreError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(collection: &Collection, id: DocumentId) -> Self {
        Self::NotFound {
            collection: collection.clone(),
            id,
        }
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if a cascade ceiling aborted the write.
    #[must_use]
    pub const fn is_cascade_limit(&self) -> bool {
        matches!(self, Self::CascadeLimitExceeded { .. })
    }

    /// Returns true if this is an invariant violation.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    /// Returns the violation, if this is one.
    #[must_use]
    pub const fn violation(&self) -> Option<&Violation> {
        match self {
            Self::InvariantViolation(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true if the caller can retry with corrected input.
    ///
    /// Cascade limits point at a defect in rule registration and are never
    /// recoverable by the caller.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::InvariantViolation(_) | Self::MalformedDocument { .. } => {
                true
            }
            Self::Timeout { .. } => true,
            Self::CascadeLimitExceeded { .. }
            | Self::DuplicateRule { .. }
            | Self::Disconnected { .. }
            | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for opstore operations.
pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn lock_err(context: &'static str) -> StoreError {
    StoreError::internal(format!("poisoned lock: {context}"))
}
