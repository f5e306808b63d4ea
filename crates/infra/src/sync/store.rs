//! Queue storage: the trait and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use shelflife_core::{DomainError, StoreId, SyncItemId};

use super::types::{Claim, PriceSyncQueueItem, SyncErrorKind, SyncStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncStoreError {
    #[error("sync item not found: {0}")]
    NotFound(SyncItemId),
    #[error("store isolation violation")]
    StoreIsolation,
    #[error("sync item already exists: {0}")]
    AlreadyExists(SyncItemId),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("attempts exhausted for sync item {0}")]
    AttemptsExhausted(SyncItemId),
    /// The item was reclaimed by another processor after its claim went stale.
    #[error("claim lost for sync item {0}")]
    ClaimLost(SyncItemId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl SyncStoreError {
    fn from_domain(id: SyncItemId, err: DomainError) -> Self {
        match err {
            DomainError::AttemptsExhausted { .. } => SyncStoreError::AttemptsExhausted(id),
            other => SyncStoreError::InvalidTransition(other.to_string()),
        }
    }
}

/// Item counts per status for one store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncQueueStats {
    pub pending: usize,
    pub syncing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Failed items with no attempts left (operator attention needed).
    pub exhausted: usize,
}

/// Durable price sync queue.
///
/// Every mutation is a conditional update on the item's current state, so concurrent
/// processors never work the same item and a processor whose claim went stale cannot
/// overwrite the outcome of the processor that reclaimed it.
#[async_trait]
pub trait SyncQueueStore: Send + Sync {
    async fn enqueue(&self, item: PriceSyncQueueItem) -> Result<SyncItemId, SyncStoreError>;

    async fn get(
        &self,
        store_id: StoreId,
        id: SyncItemId,
    ) -> Result<PriceSyncQueueItem, SyncStoreError>;

    /// Claim the oldest claimable item of the store (`pending`, or `syncing` with
    /// `last_attempt_at < stale_before`) that has fewer than `max_attempts` attempts.
    /// Returns `None` when nothing is claimable.
    async fn claim_next(
        &self,
        store_id: StoreId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, SyncStoreError>;

    /// Compare-and-swap claim of one specific item. `None` when someone else holds it
    /// or its attempts are used up.
    async fn claim(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, SyncStoreError>;

    /// `syncing -> failed` for every stale claim that has no attempts left.
    async fn expire_stale(
        &self,
        store_id: StoreId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError>;

    /// `syncing -> completed` for the claim identified by `attempt`.
    async fn complete(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<PriceSyncQueueItem, SyncStoreError>;

    /// `syncing -> failed` for the claim identified by `attempt`.
    async fn fail(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        attempt: u32,
        kind: SyncErrorKind,
        message: &str,
    ) -> Result<PriceSyncQueueItem, SyncStoreError>;

    /// Manual retry: `failed -> pending` while attempts remain, whatever the error kind.
    async fn retry_item(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        max_attempts: u32,
    ) -> Result<PriceSyncQueueItem, SyncStoreError>;

    /// Scheduled retry: requeue every transient failure that still has attempts left.
    async fn requeue_failed(
        &self,
        store_id: StoreId,
        max_attempts: u32,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError>;

    /// Oldest first.
    async fn list(
        &self,
        store_id: StoreId,
        status: Option<SyncStatus>,
        limit: usize,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError>;

    async fn stats(
        &self,
        store_id: StoreId,
        max_attempts: u32,
    ) -> Result<SyncQueueStats, SyncStoreError>;
}

/// In-memory queue for tests/dev. A single write lock makes every claim atomic.
#[derive(Debug, Default)]
pub struct InMemorySyncQueueStore {
    items: RwLock<HashMap<SyncItemId, PriceSyncQueueItem>>,
}

impl InMemorySyncQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> SyncStoreError {
        SyncStoreError::Storage("sync queue lock poisoned".to_string())
    }

    /// Run `f` on the item under the write lock, enforcing store isolation.
    fn with_item<T>(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        f: impl FnOnce(&mut PriceSyncQueueItem) -> Result<T, SyncStoreError>,
    ) -> Result<T, SyncStoreError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        match items.get_mut(&id) {
            Some(item) if item.store_id == store_id => f(item),
            Some(_) => Err(SyncStoreError::StoreIsolation),
            None => Err(SyncStoreError::NotFound(id)),
        }
    }

    fn take(
        item: &mut PriceSyncQueueItem,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Claim, SyncStoreError> {
        let previous = item.status;
        item.mark_syncing(now, max_attempts)
            .map_err(|e| SyncStoreError::from_domain(item.id, e))?;
        Ok(Claim {
            item: item.clone(),
            previous,
        })
    }

    fn check_claim(item: &PriceSyncQueueItem, attempt: u32) -> Result<(), SyncStoreError> {
        if item.status != SyncStatus::Syncing || item.attempts != attempt {
            return Err(SyncStoreError::ClaimLost(item.id));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncQueueStore for InMemorySyncQueueStore {
    async fn enqueue(&self, item: PriceSyncQueueItem) -> Result<SyncItemId, SyncStoreError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        if items.contains_key(&item.id) {
            return Err(SyncStoreError::AlreadyExists(item.id));
        }
        let id = item.id;
        items.insert(id, item);
        Ok(id)
    }

    async fn get(
        &self,
        store_id: StoreId,
        id: SyncItemId,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        self.with_item(store_id, id, |item| Ok(item.clone()))
    }

    async fn claim_next(
        &self,
        store_id: StoreId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, SyncStoreError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;

        let next = items
            .values()
            .filter(|i| i.store_id == store_id && i.is_claimable(stale_before, max_attempts))
            .min_by_key(|i| (i.created_at, i.id))
            .map(|i| i.id);

        let Some(id) = next else {
            return Ok(None);
        };
        let Some(item) = items.get_mut(&id) else {
            return Ok(None);
        };
        Self::take(item, now, max_attempts).map(Some)
    }

    async fn claim(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, SyncStoreError> {
        self.with_item(store_id, id, |item| {
            if !item.is_claimable(stale_before, max_attempts) {
                return Ok(None);
            }
            Self::take(item, now, max_attempts).map(Some)
        })
    }

    async fn expire_stale(
        &self,
        store_id: StoreId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let mut expired = Vec::new();
        for item in items.values_mut() {
            if item.store_id == store_id && item.is_expired_claim(stale_before, max_attempts) {
                item.expire_claim(stale_before, max_attempts)
                    .map_err(|e| SyncStoreError::from_domain(item.id, e))?;
                expired.push(item.clone());
            }
        }
        expired.sort_by_key(|i| (i.created_at, i.id));
        Ok(expired)
    }

    async fn complete(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        self.with_item(store_id, id, |item| {
            Self::check_claim(item, attempt)?;
            item.mark_completed(now)
                .map_err(|e| SyncStoreError::from_domain(id, e))?;
            Ok(item.clone())
        })
    }

    async fn fail(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        attempt: u32,
        kind: SyncErrorKind,
        message: &str,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        self.with_item(store_id, id, |item| {
            Self::check_claim(item, attempt)?;
            item.mark_failed(kind, message)
                .map_err(|e| SyncStoreError::from_domain(id, e))?;
            Ok(item.clone())
        })
    }

    async fn retry_item(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        max_attempts: u32,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        self.with_item(store_id, id, |item| {
            item.requeue(max_attempts)
                .map_err(|e| SyncStoreError::from_domain(id, e))?;
            Ok(item.clone())
        })
    }

    async fn requeue_failed(
        &self,
        store_id: StoreId,
        max_attempts: u32,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let mut requeued = Vec::new();
        for item in items.values_mut() {
            if item.store_id == store_id && item.is_auto_retryable(max_attempts) {
                item.requeue(max_attempts)
                    .map_err(|e| SyncStoreError::from_domain(item.id, e))?;
                requeued.push(item.clone());
            }
        }
        requeued.sort_by_key(|i| (i.created_at, i.id));
        Ok(requeued)
    }

    async fn list(
        &self,
        store_id: StoreId,
        status: Option<SyncStatus>,
        limit: usize,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        let mut out: Vec<_> = items
            .values()
            .filter(|i| i.store_id == store_id && status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|i| (i.created_at, i.id));
        out.truncate(limit);
        Ok(out)
    }

    async fn stats(
        &self,
        store_id: StoreId,
        max_attempts: u32,
    ) -> Result<SyncQueueStats, SyncStoreError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        let mut stats = SyncQueueStats::default();
        for item in items.values().filter(|i| i.store_id == store_id) {
            match item.status {
                SyncStatus::Pending => stats.pending += 1,
                SyncStatus::Syncing => stats.syncing += 1,
                SyncStatus::Completed => stats.completed += 1,
                SyncStatus::Failed => {
                    stats.failed += 1;
                    if !item.has_attempts_left(max_attempts) {
                        stats.exhausted += 1;
                    }
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use shelflife_core::ProductId;

    fn item(store: StoreId) -> PriceSyncQueueItem {
        PriceSyncQueueItem::new(store, ProductId::new(), dec!(10.00), dec!(6.00), "pos", Utc::now())
    }

    fn stale_before() -> DateTime<Utc> {
        Utc::now() - Duration::minutes(5)
    }

    #[tokio::test]
    async fn claim_is_fifo_and_store_scoped() {
        let store = InMemorySyncQueueStore::new();
        let s1 = StoreId::new();
        let s2 = StoreId::new();

        let mut first = item(s1);
        first.created_at = Utc::now() - Duration::seconds(10);
        let first_id = store.enqueue(first).await.unwrap();
        store.enqueue(item(s1)).await.unwrap();

        assert!(store.claim_next(s2, stale_before(), 3, Utc::now()).await.unwrap().is_none());

        let claimed = store.claim_next(s1, stale_before(), 3, Utc::now()).await.unwrap().unwrap().item;
        assert_eq!(claimed.id, first_id);
        assert_eq!(claimed.status, SyncStatus::Syncing);
        assert_eq!(claimed.attempts, 1);

        assert!(matches!(
            store.get(s2, first_id).await,
            Err(SyncStoreError::StoreIsolation)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let store = InMemorySyncQueueStore::arc();
        let s = StoreId::new();
        let id = store.enqueue(item(s)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim(s, id, stale_before(), 3, Utc::now()).await.unwrap()
            }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get(s, id).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn stale_claim_is_reclaimed_and_old_claim_loses() {
        let store = InMemorySyncQueueStore::new();
        let s = StoreId::new();
        let id = store.enqueue(item(s)).await.unwrap();

        let crashed_at = Utc::now() - Duration::minutes(10);
        let first = store.claim_next(s, stale_before(), 3, crashed_at).await.unwrap().unwrap().item;

        // Fresh claims are not reclaimable.
        assert!(store
            .claim_next(s, crashed_at - Duration::minutes(1), 3, Utc::now())
            .await
            .unwrap()
            .is_none());

        let second = store.claim_next(s, stale_before(), 3, Utc::now()).await.unwrap().unwrap();
        assert_eq!(second.previous, SyncStatus::Syncing);
        let second = second.item;
        assert_eq!(second.id, id);
        assert_eq!(second.attempts, 2);

        assert_eq!(
            store.complete(s, id, first.attempts, Utc::now()).await,
            Err(SyncStoreError::ClaimLost(id))
        );
        let done = store.complete(s, id, second.attempts, Utc::now()).await.unwrap();
        assert_eq!(done.status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn manual_and_scheduled_retry() {
        let store = InMemorySyncQueueStore::new();
        let s = StoreId::new();
        let transient = store.enqueue(item(s)).await.unwrap();
        let permanent = store.enqueue(item(s)).await.unwrap();

        for (id, kind) in [(transient, SyncErrorKind::Transient), (permanent, SyncErrorKind::Permanent)] {
            let c = store.claim(s, id, stale_before(), 3, Utc::now()).await.unwrap().unwrap();
            store.fail(s, id, c.item.attempts, kind, "boom").await.unwrap();
        }

        let requeued = store.requeue_failed(s, 3).await.unwrap();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].id, transient);

        let retried = store.retry_item(s, permanent, 3).await.unwrap();
        assert_eq!(retried.status, SyncStatus::Pending);

        let stats = store.stats(s, 3).await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn retry_rejected_when_exhausted() {
        let store = InMemorySyncQueueStore::new();
        let s = StoreId::new();
        let id = store.enqueue(item(s)).await.unwrap();

        let c = store.claim(s, id, stale_before(), 3, Utc::now()).await.unwrap().unwrap();
        store.fail(s, id, c.item.attempts, SyncErrorKind::Transient, "timeout").await.unwrap();

        assert_eq!(
            store.retry_item(s, id, 1).await,
            Err(SyncStoreError::AttemptsExhausted(id))
        );
        let stats = store.stats(s, 1).await.unwrap();
        assert_eq!(stats.exhausted, 1);
        let failed = store.list(s, Some(SyncStatus::Failed), 10).await.unwrap();
        assert_eq!(failed[0].error_message.as_deref(), Some("transient: timeout"));
    }

    #[tokio::test]
    async fn crash_looping_claim_stops_at_attempt_budget() {
        let store = InMemorySyncQueueStore::new();
        let s = StoreId::new();
        let id = store.enqueue(item(s)).await.unwrap();

        // Every claim is abandoned and has gone stale before the next one.
        let mut claims = 0;
        for _ in 0..5 {
            let crashed_at = Utc::now() - Duration::minutes(10);
            if store.claim_next(s, stale_before(), 3, crashed_at).await.unwrap().is_some() {
                claims += 1;
            }
        }
        assert_eq!(claims, 3);
        let stuck = store.get(s, id).await.unwrap();
        assert_eq!(stuck.status, SyncStatus::Syncing);
        assert_eq!(stuck.attempts, 3);
        assert!(store.claim(s, id, stale_before(), 3, Utc::now()).await.unwrap().is_none());

        let expired = store.expire_stale(s, stale_before(), 3).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, SyncStatus::Failed);
        assert_eq!(expired[0].attempts, 3);
        assert_eq!(
            store.retry_item(s, id, 3).await,
            Err(SyncStoreError::AttemptsExhausted(id))
        );
        assert_eq!(store.stats(s, 3).await.unwrap().exhausted, 1);
        assert!(store.expire_stale(s, stale_before(), 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expire_leaves_fresh_and_reclaimable_claims_alone() {
        let store = InMemorySyncQueueStore::new();
        let s = StoreId::new();
        let fresh = store.enqueue(item(s)).await.unwrap();
        let stale = store.enqueue(item(s)).await.unwrap();

        store.claim(s, fresh, stale_before(), 1, Utc::now()).await.unwrap().unwrap();
        store
            .claim(s, stale, stale_before(), 3, Utc::now() - Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();

        // Attempts left: the stale claim is reclaimable, not expired.
        assert!(store.expire_stale(s, stale_before(), 3).await.unwrap().is_empty());

        let expired = store.expire_stale(s, stale_before(), 1).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale);
        assert_eq!(store.get(s, fresh).await.unwrap().status, SyncStatus::Syncing);
    }
}
