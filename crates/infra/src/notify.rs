//! Engine notifications (state transitions pushed to subscribers).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use shelflife_core::{Money, ProductId, StoreId, SyncItemId};
use shelflife_events::{Event, EventBus};

use crate::automation::Stage;
use crate::sync::SyncStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PriceChanged {
        store_id: StoreId,
        product_id: ProductId,
        old_price: Money,
        new_price: Money,
        annotation: String,
        at: DateTime<Utc>,
    },
    SyncItemEnqueued {
        store_id: StoreId,
        item_id: SyncItemId,
        target: String,
        at: DateTime<Utc>,
    },
    SyncItemTransitioned {
        store_id: StoreId,
        item_id: SyncItemId,
        target: String,
        from: SyncStatus,
        to: SyncStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    },
    StageFailed {
        store_id: StoreId,
        stage: Stage,
        error: String,
        at: DateTime<Utc>,
    },
    RunCompleted {
        store_id: StoreId,
        updated_count: usize,
        failed_stages: usize,
        at: DateTime<Utc>,
    },
}

impl Event for EngineEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::PriceChanged { .. } => "pricing.price.changed",
            EngineEvent::SyncItemEnqueued { .. } => "sync.item.enqueued",
            EngineEvent::SyncItemTransitioned { .. } => "sync.item.transitioned",
            EngineEvent::StageFailed { .. } => "automation.stage.failed",
            EngineEvent::RunCompleted { .. } => "automation.run.completed",
        }
    }

    fn store_id(&self) -> StoreId {
        match self {
            EngineEvent::PriceChanged { store_id, .. }
            | EngineEvent::SyncItemEnqueued { store_id, .. }
            | EngineEvent::SyncItemTransitioned { store_id, .. }
            | EngineEvent::StageFailed { store_id, .. }
            | EngineEvent::RunCompleted { store_id, .. } => *store_id,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EngineEvent::PriceChanged { at, .. }
            | EngineEvent::SyncItemEnqueued { at, .. }
            | EngineEvent::SyncItemTransitioned { at, .. }
            | EngineEvent::StageFailed { at, .. }
            | EngineEvent::RunCompleted { at, .. } => *at,
        }
    }
}

/// Fire-and-forget sink for engine notifications.
///
/// Notifications are not the source of truth (queue and prediction rows are), so a failed
/// publish is logged and dropped.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: EngineEvent);
}

impl<B> EventSink for B
where
    B: EventBus<EngineEvent> + 'static,
{
    fn emit(&self, event: EngineEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.publish(event) {
            warn!(event_type, error = ?e, "failed to publish engine event");
        }
    }
}

/// Sink that drops everything (no subscribers configured).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: EngineEvent) {}
}
