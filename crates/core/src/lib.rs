//! `shelflife-core`: shared building blocks for the pricing & waste-risk engine.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;
pub mod money;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{OrderId, PredictionId, ProductId, RuleId, StoreId, SyncItemId};
pub use money::{round_money, Money, MONEY_DECIMAL_PLACES};
