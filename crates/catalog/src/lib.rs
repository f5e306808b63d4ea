//! Catalog snapshots consumed by the engine.
//!
//! Products and order line items are owned by the inventory/sales store; this crate only
//! models the shape the engine reads and validates it at the boundary (no IO).

pub mod order;
pub mod product;

pub use order::LineItem;
pub use product::Product;
