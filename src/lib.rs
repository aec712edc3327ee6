//! # opstore - Reactive document store for an operations dashboard
//!
//! opstore keeps the operational data of a small manufacturing business
//! (orders, production, inventory, purchasing, settings) in memory and keeps
//! it consistent as it changes. Every write is published to subscribers and
//! run through a registry of trigger rules whose effects cascade into further
//! writes until the data settles.
//!
//! ## Core Concepts
//!
//! - **Document**: a JSON object with a store-assigned id and timestamps
//! - **Collection**: a named, ordered set of documents
//! - **Subscription**: a handler receiving a collection's contents after every write
//! - **Trigger Rule**: a predicate over (before, after) plus an effect that writes
//! - **Aggregate**: derived data (inventory balances, purchase order status)
//!   maintained only by the reconciler
//!
//! ## Usage
//!
//! ```rust
//! use opstore::{Collection, PurchaseOrderStatus, Store};
//! use serde_json::json;
//!
//! let store = Store::new();
//! store.create(
//!     &Collection::InventoryMovements,
//!     json!({"material_id": "linho", "warehouse_id": "W1", "quantity": 100}),
//! )?;
//! store.create(
//!     &Collection::InventoryMovements,
//!     json!({"material_id": "linho", "warehouse_id": "W1", "quantity": -20}),
//! )?;
//! let balance = store.balance("linho", "W1")?.expect("created on first movement");
//! assert_eq!(balance.current_stock, 80.0);
//!
//! let order = store.create(&Collection::PurchaseOrders, json!({"status": "issued", "warehouse_id": "W1"}))?;
//! let item = store.create(
//!     &Collection::PurchaseOrderItems,
//!     json!({"purchase_order_id": order.id.to_string(), "material_id": "linho", "quantity": 10}),
//! )?;
//! store.receive_purchase_order_item(item.id, 10.0)?;
//! assert_eq!(store.purchase_order_status(order.id)?, PurchaseOrderStatus::Received);
//! # Ok::<(), opstore::StoreError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod collection;
pub mod config;
pub mod document;
pub mod error;

// Engine
pub mod bus;
pub mod reconciler;
pub mod storage;
pub mod store;
pub mod triggers;
pub mod workflows;

// Re-export primary types at crate root for convenience
pub use bus::{
    ChangeBus, ChangeKind, ChangeStream, ChangeSummary, CollectionHandler, CollectionSnapshot, DocumentHandler,
    HandlerError, HandlerResult, Subscription, SubscriptionId,
};
pub use collection::Collection;
pub use config::{StoreConfig, WorkflowConfig};
pub use document::{Document, DocumentId, Fields};
pub use error::{CascadeLimit, StoreError, StoreResult, Violation};
pub use reconciler::{InventoryBalance, PurchaseOrderStatus};
pub use storage::{CollectionTable, DocumentBackend};
pub use store::{Store, StoreBuilder};
pub use triggers::{CascadeTxn, Change, TriggerRule};
