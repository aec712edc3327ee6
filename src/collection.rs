//! Typed collection identifiers.
//!
//! Subscriptions, trigger rules, and storage tables are keyed on `Collection`
//! rather than on free-form strings, so a misspelled collection is a compile
//! error for every collection the dashboard knows about. `Custom` covers
//! collections added lazily at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Customer orders.
    Orders,
    /// Production orders spawned from paid order lines.
    ProductionOrders,
    /// Workflow tasks of the production kanban.
    Tasks,
    /// Raw materials.
    Materials,
    /// Warehouses.
    Warehouses,
    /// Signed stock deltas (the source of truth for balances).
    InventoryMovements,
    /// Derived on-hand balances per (material, warehouse).
    InventoryBalances,
    /// Purchase orders.
    PurchaseOrders,
    /// Purchase order line items.
    PurchaseOrderItems,
    /// Tunable system settings.
    SystemSettings,
    /// Audit history of setting changes.
    SettingsChangeLogs,
    /// User-facing notifications.
    Notifications,
    /// Any other collection, created on first write.
    Custom(String),
}

impl Collection {
    /// Every built-in collection, in declaration order.
    pub const BUILT_IN: [Self; 12] = [
        Self::Orders,
        Self::ProductionOrders,
        Self::Tasks,
        Self::Materials,
        Self::Warehouses,
        Self::InventoryMovements,
        Self::InventoryBalances,
        Self::PurchaseOrders,
        Self::PurchaseOrderItems,
        Self::SystemSettings,
        Self::SettingsChangeLogs,
        Self::Notifications,
    ];

    /// Creates a custom collection.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// Returns the wire name of the collection.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Orders => "orders",
            Self::ProductionOrders => "production_orders",
            Self::Tasks => "tasks",
            Self::Materials => "materials",
            Self::Warehouses => "warehouses",
            Self::InventoryMovements => "inventory_movements",
            Self::InventoryBalances => "inventory_balances",
            Self::PurchaseOrders => "purchase_orders",
            Self::PurchaseOrderItems => "purchase_order_items",
            Self::SystemSettings => "system_settings",
            Self::SettingsChangeLogs => "settings_change_logs",
            Self::Notifications => "notifications",
            Self::Custom(name) => name,
        }
    }

    /// Returns true for collections that only the reconciler may write.
    #[must_use]
    pub const fn is_derived(&self) -> bool {
        matches!(self, Self::InventoryBalances)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Ok(Self::BUILT_IN
            .iter()
            .find(|c| c.as_str() == name)
            .cloned()
            .unwrap_or_else(|| Self::Custom(name.to_string())))
    }
}
