//! Storage: in-memory tables and the backend contract.

mod table;
mod traits;

pub use table::CollectionTable;
pub use traits::DocumentBackend;
