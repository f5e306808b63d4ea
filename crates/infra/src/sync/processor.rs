//! Batch processor: claim, deliver, record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shelflife_core::{StoreId, SyncItemId};
use shelflife_pricing::PriceChange;

use crate::notify::{EngineEvent, EventSink};

use super::store::{SyncQueueStats, SyncQueueStore, SyncStoreError};
use super::target::{PriceUpdate, SyncTarget, TargetError, DEFAULT_TARGET_TIMEOUT};
use super::types::{PriceSyncQueueItem, SyncStatus, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_attempts: u32,
    /// A `syncing` claim older than this may be reclaimed.
    pub stale_after: Duration,
    pub target_timeout: Duration,
    pub max_in_flight_per_target: usize,
    pub max_concurrency: usize,
    /// Requeue transient failures at the start of every batch.
    pub requeue_transient: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stale_after: Duration::from_secs(5 * 60),
            target_timeout: DEFAULT_TARGET_TIMEOUT,
            max_in_flight_per_target: 1,
            max_concurrency: 4,
            requeue_transient: true,
        }
    }
}

/// Counts returned by one `process_queue` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub failed: usize,
}

struct TargetSlot {
    target: Arc<dyn SyncTarget>,
    permits: Arc<Semaphore>,
}

struct Shared {
    store: Arc<dyn SyncQueueStore>,
    targets: HashMap<String, TargetSlot>,
    sink: Arc<dyn EventSink>,
    config: ProcessorConfig,
}

/// Price sync queue processor for all configured targets.
///
/// - Claims are exclusive (conditional update in the store), so several processors may
///   run the same store concurrently.
/// - Calls to one target are limited to `max_in_flight_per_target`; waiting calls queue
///   on a semaphore. Overall in-flight calls are capped by `max_concurrency`.
/// - Cancellation is checked between claims: claimed items always run to completion.
#[derive(Clone)]
pub struct SyncQueueProcessor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SyncQueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueueProcessor")
            .field("targets", &self.target_names())
            .field("config", &self.shared.config)
            .finish()
    }
}

/// Builder for [`SyncQueueProcessor`].
pub struct SyncQueueProcessorBuilder {
    store: Arc<dyn SyncQueueStore>,
    sink: Arc<dyn EventSink>,
    config: ProcessorConfig,
    targets: Vec<Arc<dyn SyncTarget>>,
}

impl SyncQueueProcessorBuilder {
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn target(mut self, target: Arc<dyn SyncTarget>) -> Self {
        self.targets.push(target);
        self
    }

    pub fn build(self) -> SyncQueueProcessor {
        let per_target = self.config.max_in_flight_per_target.max(1);
        let targets = self
            .targets
            .into_iter()
            .map(|t| {
                let slot = TargetSlot {
                    target: t.clone(),
                    permits: Arc::new(Semaphore::new(per_target)),
                };
                (t.name().to_string(), slot)
            })
            .collect();

        SyncQueueProcessor {
            shared: Arc::new(Shared {
                store: self.store,
                targets,
                sink: self.sink,
                config: self.config,
            }),
        }
    }
}

impl SyncQueueProcessor {
    pub fn builder(store: Arc<dyn SyncQueueStore>, sink: Arc<dyn EventSink>) -> SyncQueueProcessorBuilder {
        SyncQueueProcessorBuilder {
            store,
            sink,
            config: ProcessorConfig::default(),
            targets: Vec::new(),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &Arc<dyn SyncQueueStore> {
        &self.shared.store
    }

    /// Names of the configured targets, sorted.
    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.targets.keys().cloned().collect();
        names.sort();
        names
    }

    /// Enqueue one item per price change per configured target.
    pub async fn enqueue_changes(
        &self,
        changes: &[PriceChange],
    ) -> Result<Vec<SyncItemId>, SyncStoreError> {
        let now = Utc::now();
        let mut ids = Vec::with_capacity(changes.len() * self.shared.targets.len());
        for change in changes {
            for target in self.target_names() {
                let item = PriceSyncQueueItem::from_change(change, target.clone(), now);
                let id = self.shared.store.enqueue(item).await?;
                self.shared.sink.emit(EngineEvent::SyncItemEnqueued {
                    store_id: change.store_id,
                    item_id: id,
                    target,
                    at: now,
                });
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Manual retry of a failed item (either error kind) while attempts remain.
    pub async fn retry_item(
        &self,
        store_id: StoreId,
        id: SyncItemId,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        let item = self
            .shared
            .store
            .retry_item(store_id, id, self.shared.config.max_attempts)
            .await?;
        info!(store = %store_id, item_id = %id, attempts = item.attempts, "sync item manually requeued");
        self.shared.emit_transition(&item, SyncStatus::Failed);
        Ok(item)
    }

    pub async fn stats(&self, store_id: StoreId) -> Result<SyncQueueStats, SyncStoreError> {
        self.shared
            .store
            .stats(store_id, self.shared.config.max_attempts)
            .await
    }

    /// Process up to `max_batch` items of `store_id`.
    ///
    /// One item's failure never aborts the batch; both counts are always returned. Only a
    /// failure of the queue store itself (claiming) ends the batch early with an error,
    /// after the items already claimed have finished.
    pub async fn process_queue(
        &self,
        store_id: StoreId,
        max_batch: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, SyncStoreError> {
        let shared = &self.shared;
        let max_attempts = shared.config.max_attempts;

        for item in shared
            .store
            .expire_stale(store_id, shared.stale_before(Utc::now()), max_attempts)
            .await?
        {
            warn!(store = %store_id, item_id = %item.id, attempts = item.attempts, "stale sync claim expired with no attempts left");
            shared.emit_transition(&item, SyncStatus::Syncing);
        }

        if shared.config.requeue_transient {
            for item in shared
                .store
                .requeue_failed(store_id, max_attempts)
                .await?
            {
                debug!(store = %store_id, item_id = %item.id, "transient failure requeued");
                shared.emit_transition(&item, SyncStatus::Failed);
            }
        }

        let global = Arc::new(Semaphore::new(shared.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<bool> = JoinSet::new();
        let mut claim_error = None;
        let mut claimed = 0usize;

        while claimed < max_batch {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                p = global.clone().acquire_owned() => p,
            };
            let Ok(permit) = permit else { break };

            let now = Utc::now();
            let claim = match shared
                .store
                .claim_next(store_id, shared.stale_before(now), max_attempts, now)
                .await
            {
                Ok(Some(claim)) => claim,
                Ok(None) => break,
                Err(e) => {
                    warn!(store = %store_id, error = %e, "failed to claim sync item");
                    claim_error = Some(e);
                    break;
                }
            };
            claimed += 1;
            if claim.previous == SyncStatus::Syncing {
                info!(store = %store_id, item_id = %claim.item.id, attempt = claim.item.attempts, "reclaimed stale sync item");
            }
            shared.emit_transition(&claim.item, claim.previous);
            let item = claim.item;

            let shared = Arc::clone(&self.shared);
            tasks.spawn(async move {
                let ok = shared.deliver(item).await;
                drop(permit);
                ok
            });
        }

        let mut outcome = BatchOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => outcome.processed += 1,
                Ok(false) => outcome.failed += 1,
                Err(e) => {
                    // The item stays `syncing` and is reclaimed once stale.
                    warn!(store = %store_id, error = %e, "sync delivery task aborted");
                    outcome.failed += 1;
                }
            }
        }

        info!(
            store = %store_id,
            processed = outcome.processed,
            failed = outcome.failed,
            cancelled = cancel.is_cancelled(),
            "sync batch finished"
        );

        match claim_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }
}

impl Shared {
    fn stale_before(&self, now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
        now - chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or(chrono::Duration::minutes(5))
    }

    fn emit_transition(&self, item: &PriceSyncQueueItem, from: SyncStatus) {
        self.sink.emit(EngineEvent::SyncItemTransitioned {
            store_id: item.store_id,
            item_id: item.id,
            target: item.target.clone(),
            from,
            to: item.status,
            error_message: item.error_message.clone(),
            at: Utc::now(),
        });
    }

    async fn call_target(&self, item: &PriceSyncQueueItem) -> Result<(), TargetError> {
        let Some(slot) = self.targets.get(&item.target) else {
            return Err(TargetError::Permanent(format!(
                "unknown sync target '{}'",
                item.target
            )));
        };

        let _permit = slot
            .permits
            .acquire()
            .await
            .map_err(|_| TargetError::Transient("target limiter closed".to_string()))?;

        let update = PriceUpdate::from(item);
        let timeout = self.config.target_timeout;
        match tokio::time::timeout(timeout, slot.target.push(&update)).await {
            Ok(result) => result,
            Err(_) => Err(TargetError::Transient(format!(
                "request timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Deliver one claimed item and record the outcome. Returns `true` on success.
    async fn deliver(&self, item: PriceSyncQueueItem) -> bool {
        let result = self.call_target(&item).await;
        let now = Utc::now();

        let recorded = match &result {
            Ok(()) => {
                self.store
                    .complete(item.store_id, item.id, item.attempts, now)
                    .await
            }
            Err(e) => {
                warn!(
                    store = %item.store_id,
                    item_id = %item.id,
                    target = %item.target,
                    attempt = item.attempts,
                    kind = e.kind().as_str(),
                    error = %e,
                    "price sync failed"
                );
                self.store
                    .fail(item.store_id, item.id, item.attempts, e.kind(), e.message())
                    .await
            }
        };

        match recorded {
            Ok(updated) => {
                self.emit_transition(&updated, SyncStatus::Syncing);
                result.is_ok()
            }
            Err(e) => {
                warn!(store = %item.store_id, item_id = %item.id, error = %e, "failed to record sync outcome");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopSink;
    use crate::sync::store::InMemorySyncQueueStore;
    use crate::sync::target::ScriptedSyncTarget;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use shelflife_core::ProductId;
    use shelflife_events::{EventBus, InMemoryEventBus};

    fn enqueue_items(s: StoreId, n: usize) -> Vec<PriceSyncQueueItem> {
        let base = Utc::now() - chrono::Duration::seconds(60);
        (0..n)
            .map(|i| {
                PriceSyncQueueItem::new(
                    s,
                    ProductId::new(),
                    dec!(10.00),
                    dec!(6.00),
                    "pos",
                    base + chrono::Duration::seconds(i as i64),
                )
            })
            .collect()
    }

    async fn seed(store: &InMemorySyncQueueStore, items: &[PriceSyncQueueItem]) {
        for i in items {
            store.enqueue(i.clone()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn two_failures_in_ten_are_counted_separately() {
        let store = InMemorySyncQueueStore::arc();
        let s = StoreId::new();
        let items = enqueue_items(s, 10);
        seed(&store, &items).await;

        let target = Arc::new(ScriptedSyncTarget::new("pos"));
        target.fail_product(items[2].product_id, TargetError::from_status(400, "unknown sku"));
        target.fail_product(items[7].product_id, TargetError::from_status(503, "maintenance"));

        let processor = SyncQueueProcessor::builder(store.clone(), Arc::new(NoopSink))
            .target(target.clone())
            .build();

        let outcome = processor
            .process_queue(s, 50, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome { processed: 8, failed: 2 });

        let failed = store.list(s, Some(SyncStatus::Failed), 10).await.unwrap();
        let messages: Vec<_> = failed.iter().filter_map(|i| i.error_message.clone()).collect();
        assert_eq!(messages.len(), 2);
        assert_ne!(messages[0], messages[1]);
        assert!(messages.contains(&"permanent: HTTP 400: unknown sku".to_string()));
        assert!(messages.contains(&"transient: HTTP 503: maintenance".to_string()));
    }

    #[tokio::test]
    async fn timeouts_then_success_across_batches() {
        let store = InMemorySyncQueueStore::arc();
        let s = StoreId::new();
        let items = enqueue_items(s, 1);
        seed(&store, &items).await;

        let target = Arc::new(ScriptedSyncTarget::new("pos").with_script([
            Err(TargetError::Transient("request timed out".to_string())),
            Err(TargetError::Transient("request timed out".to_string())),
        ]));
        let processor = SyncQueueProcessor::builder(store.clone(), Arc::new(NoopSink))
            .target(target)
            .build();
        let cancel = CancellationToken::new();

        assert_eq!(processor.process_queue(s, 10, &cancel).await.unwrap().failed, 1);
        assert_eq!(processor.process_queue(s, 10, &cancel).await.unwrap().failed, 1);
        assert_eq!(processor.process_queue(s, 10, &cancel).await.unwrap().processed, 1);

        let item = store.get(s, items[0].id).await.unwrap();
        assert_eq!(item.status, SyncStatus::Completed);
        assert_eq!(item.retry_count(), 2);
    }

    #[tokio::test]
    async fn one_call_in_flight_per_target() {
        let store = InMemorySyncQueueStore::arc();
        let s = StoreId::new();
        let items = enqueue_items(s, 6);
        seed(&store, &items).await;

        let target = Arc::new(ScriptedSyncTarget::new("pos").with_delay(Duration::from_millis(10)));
        let processor = SyncQueueProcessor::builder(store.clone(), Arc::new(NoopSink))
            .target(target.clone())
            .build();

        let outcome = processor
            .process_queue(s, 50, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.processed, 6);
        assert_eq!(target.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn cancelled_batch_claims_nothing() {
        let store = InMemorySyncQueueStore::arc();
        let s = StoreId::new();
        let items = enqueue_items(s, 3);
        seed(&store, &items).await;

        let processor = SyncQueueProcessor::builder(store.clone(), Arc::new(NoopSink))
            .target(Arc::new(ScriptedSyncTarget::new("pos")))
            .build();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = processor.process_queue(s, 50, &cancel).await.unwrap();
        assert_eq!(outcome, BatchOutcome::default());
        assert_eq!(processor.stats(s).await.unwrap().pending, 3);
    }

    #[tokio::test]
    async fn unknown_target_fails_permanently() {
        let store = InMemorySyncQueueStore::arc();
        let s = StoreId::new();
        let items = enqueue_items(s, 1);
        seed(&store, &items).await;

        let processor = SyncQueueProcessor::builder(store.clone(), Arc::new(NoopSink)).build();
        let outcome = processor
            .process_queue(s, 5, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failed, 1);
        let item = store.get(s, items[0].id).await.unwrap();
        assert!(item.error_message.unwrap().starts_with("permanent: unknown sync target"));
    }

    #[tokio::test]
    async fn stale_claim_without_attempts_left_is_failed_not_redelivered() {
        let store = InMemorySyncQueueStore::arc();
        let s = StoreId::new();
        let mut item = enqueue_items(s, 1).remove(0);
        item.status = SyncStatus::Syncing;
        item.attempts = DEFAULT_MAX_ATTEMPTS;
        item.last_attempt_at = Some(Utc::now() - chrono::Duration::minutes(10));
        seed(&store, std::slice::from_ref(&item)).await;

        let bus = Arc::new(InMemoryEventBus::<EngineEvent>::new());
        let sub = bus.subscribe();
        let target = Arc::new(ScriptedSyncTarget::new("pos"));
        let processor = SyncQueueProcessor::builder(store.clone(), bus.clone())
            .target(target.clone())
            .build();
        let cancel = CancellationToken::new();

        assert_eq!(processor.process_queue(s, 10, &cancel).await.unwrap(), BatchOutcome::default());
        assert_eq!(processor.process_queue(s, 10, &cancel).await.unwrap(), BatchOutcome::default());
        assert!(target.calls().is_empty());

        let failed = store.get(s, item.id).await.unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(processor.stats(s).await.unwrap().exhausted, 1);

        let transitions: Vec<_> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::SyncItemTransitioned { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect();
        assert_eq!(transitions, vec![(SyncStatus::Syncing, SyncStatus::Failed)]);
    }

    /// Cancels the batch from inside the first delivery.
    struct CancelOnPush {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl SyncTarget for CancelOnPush {
        fn name(&self) -> &str {
            "pos"
        }

        async fn push(&self, _update: &PriceUpdate) -> Result<(), TargetError> {
            self.cancel.cancel();
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancel_mid_batch_finishes_in_flight_item_and_leaves_rest_pending() {
        let store = InMemorySyncQueueStore::arc();
        let s = StoreId::new();
        let items = enqueue_items(s, 3);
        seed(&store, &items).await;

        let cancel = CancellationToken::new();
        let processor = SyncQueueProcessor::builder(store.clone(), Arc::new(NoopSink))
            .config(ProcessorConfig {
                max_concurrency: 1,
                ..ProcessorConfig::default()
            })
            .target(Arc::new(CancelOnPush { cancel: cancel.clone() }))
            .build();

        let outcome = processor.process_queue(s, 50, &cancel).await.unwrap();
        assert_eq!(outcome, BatchOutcome { processed: 1, failed: 0 });

        assert_eq!(store.get(s, items[0].id).await.unwrap().status, SyncStatus::Completed);
        let stats = processor.stats(s).await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.syncing, 0);
    }
}
