//! Price synchronization queue.
//!
//! Lifecycle: `pending -> syncing -> {completed | failed}`, with `failed -> pending` only
//! through a manual or scheduled retry while attempts remain. A claim that stays
//! `syncing` past the staleness threshold can be reclaimed by any processor.

pub mod postgres;
pub mod processor;
pub mod store;
pub mod target;
pub mod types;

pub use postgres::PostgresSyncQueueStore;
pub use processor::{BatchOutcome, ProcessorConfig, SyncQueueProcessor, SyncQueueProcessorBuilder};
pub use store::{InMemorySyncQueueStore, SyncQueueStats, SyncQueueStore, SyncStoreError};
pub use target::{
    HttpSyncTarget, PriceUpdate, ScriptedSyncTarget, SyncTarget, TargetError,
    DEFAULT_TARGET_TIMEOUT,
};
pub use types::{
    format_error_message, Claim, PriceSyncQueueItem, SyncErrorKind, SyncStatus,
    DEFAULT_MAX_ATTEMPTS, MAX_ERROR_MESSAGE_LEN,
};
