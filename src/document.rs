//! Documents and document identity.
//!
//! A document is an opaque JSON object plus three store-managed fields: its
//! identifier and the created/updated timestamps. Identity never changes once
//! assigned, and patches cannot touch the managed fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Domain fields of a document.
pub type Fields = Map<String, Value>;

/// Field names managed by the store; patches never overwrite them.
pub const MANAGED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

// Namespace for ids derived from business keys (uuid v5).
const DERIVED_NAMESPACE: Uuid = Uuid::from_u128(0x6f70_7374_6f72_6500_8000_0000_0000_0001);

/// Globally unique, stable document identifier.
///
/// # Examples
///
/// ```
/// use opstore::DocumentId;
///
/// let a = DocumentId::derived(&["production_order", "order-1", "0"]);
/// let b = DocumentId::derived(&["production_order", "order-1", "0"]);
/// assert_eq!(a, b);
/// assert_ne!(a, DocumentId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Creates a new random document id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a deterministic id from a business key.
    ///
    /// Rules use this for documents they spawn, so a second evaluation for the
    /// same key lands on the same id and can be detected.
    #[must_use]
    pub fn derived(parts: &[&str]) -> Self {
        let key = parts.join("\u{1f}");
        Self(Uuid::new_v5(&DERIVED_NAMESPACE, key.as_bytes()))
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for DocumentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned identifier.
    pub id: DocumentId,
    /// When the document was created.
    pub created_at: DateTime<Utc>,
    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
    /// Domain fields.
    #[serde(flatten)]
    pub fields: Fields,
}

impl Document {
    pub(crate) fn new(id: DocumentId, fields: Fields, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            fields: strip_managed(fields),
        }
    }

    /// Shallow-merges `patch` over the current fields and refreshes `updated_at`.
    pub(crate) fn merged(&self, patch: Fields, now: DateTime<Utc>) -> Self {
        let mut fields = self.fields.clone();
        for (k, v) in strip_managed(patch) {
            fields.insert(k, v);
        }
        Self {
            id: self.id,
            created_at: self.created_at,
            updated_at: now.max(self.updated_at),
            fields,
        }
    }

    /// Raw field access.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String field, if present and a string.
    #[must_use]
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Numeric field as `f64`, if present and a number.
    #[must_use]
    pub fn f64_field(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    /// Document id stored in a string field.
    #[must_use]
    pub fn id_field(&self, field: &str) -> Option<DocumentId> {
        self.str_field(field).and_then(|s| s.parse().ok())
    }

    /// Returns true if the field is present and equal to `value`.
    #[must_use]
    pub fn field_is(&self, field: &str, value: &str) -> bool {
        self.str_field(field) == Some(value)
    }
}

/// Converts a JSON value into document fields.
///
/// # Errors
///
/// Returns `MalformedDocument` unless `value` is a JSON object.
pub fn into_fields(value: Value) -> StoreResult<Fields> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::MalformedDocument {
            reason: format!("document data must be a JSON object, got {}", type_name(&other)),
        }),
    }
}

fn strip_managed(mut fields: Fields) -> Fields {
    for key in MANAGED_FIELDS {
        fields.remove(key);
    }
    fields
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
