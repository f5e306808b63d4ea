//! Entity trait: identity + store ownership across state changes.

use crate::id::StoreId;

/// Entity marker + minimal interface.
///
/// Every record the engine reads or writes belongs to exactly one store; repositories
/// use `store_id()` to enforce isolation between stores.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;

    /// Returns the owning store.
    fn store_id(&self) -> StoreId;
}
