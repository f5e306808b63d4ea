use chrono::{DateTime, Utc};

use shelflife_core::StoreId;

/// A notification emitted by the engine.
///
/// Notifications are:
/// - **immutable** facts about something that already happened
/// - **store-scoped** so subscribers can filter without decoding the payload
/// - **versioned** for schema evolution of consumers
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "sync.item.transitioned").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32 {
        1
    }

    /// Store the event belongs to.
    fn store_id(&self) -> StoreId;

    /// When the event occurred.
    fn occurred_at(&self) -> DateTime<Utc>;
}
