//! Postgres-backed price sync queue.
//!
//! Every state change is a single conditional `UPDATE ... RETURNING`: the `WHERE` clause
//! carries the expected current state, so two processors racing for the same row cannot
//! both succeed. Claims additionally use `FOR UPDATE SKIP LOCKED` so concurrent batches
//! spread over different rows instead of queueing on one.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | SyncStoreError |
//! |------------|----------------------|----------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (check violation) | `23514` | `InvalidTransition` |
//! | Database (other) / PoolClosed / other | any | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use shelflife_core::{ProductId, StoreId, SyncItemId};

use super::store::{SyncQueueStats, SyncQueueStore, SyncStoreError};
use super::types::{
    format_error_message, Claim, PriceSyncQueueItem, SyncErrorKind, SyncStatus, MAX_ERROR_MESSAGE_LEN,
};

const STALE: &str = "(last_attempt_at IS NULL OR last_attempt_at < $2)";

#[derive(Debug, Clone)]
pub struct PostgresSyncQueueStore {
    pool: Arc<PgPool>,
}

impl PostgresSyncQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the queue table and its claim index when missing.
    pub async fn ensure_schema(&self) -> Result<(), SyncStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_sync_queue (
                id UUID PRIMARY KEY,
                store_id UUID NOT NULL,
                product_id UUID NOT NULL,
                old_price NUMERIC(12, 2) NOT NULL CHECK (old_price >= 0),
                new_price NUMERIC(12, 2) NOT NULL CHECK (new_price >= 0),
                target TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'syncing', 'completed', 'failed')),
                attempts INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
                last_error_kind TEXT NULL CHECK (last_error_kind IN ('transient', 'permanent')),
                error_message TEXT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                last_attempt_at TIMESTAMPTZ NULL,
                completed_at TIMESTAMPTZ NULL
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS price_sync_queue_claim_idx
                ON price_sync_queue (store_id, status, created_at)
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        Ok(())
    }

    async fn fetch(&self, id: SyncItemId) -> Result<Option<PriceSyncQueueItem>, SyncStoreError> {
        let row = sqlx::query("SELECT * FROM price_sync_queue WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch", e))?;
        row.as_ref().map(item_from_row).transpose()
    }

    /// Explain why a conditional update matched no row.
    async fn explain_miss(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        otherwise: impl FnOnce(PriceSyncQueueItem) -> SyncStoreError,
    ) -> SyncStoreError {
        match self.fetch(id).await {
            Ok(Some(item)) if item.store_id != store_id => SyncStoreError::StoreIsolation,
            Ok(Some(item)) => otherwise(item),
            Ok(None) => SyncStoreError::NotFound(id),
            Err(e) => e,
        }
    }

    async fn claim_where(
        &self,
        store_id: StoreId,
        only: Option<SyncItemId>,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, SyncStoreError> {
        let sql = format!(
            r#"
            WITH candidate AS (
                SELECT id, status AS previous_status
                FROM price_sync_queue
                WHERE store_id = $1
                    AND ($4::uuid IS NULL OR id = $4)
                    AND (status = 'pending' OR (status = 'syncing' AND {STALE}))
                    AND attempts < $5
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE price_sync_queue q
            SET status = 'syncing', attempts = q.attempts + 1, last_attempt_at = $3
            FROM candidate c
            WHERE q.id = c.id
            RETURNING q.*, c.previous_status
            "#
        );

        let row = sqlx::query(&sql)
            .bind(store_id.as_uuid())
            .bind(stale_before)
            .bind(now)
            .bind(only.map(|id| *id.as_uuid()))
            .bind(max_attempts as i32)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let previous: String = row
            .try_get("previous_status")
            .map_err(|e| map_sqlx_error("claim", e))?;
        Ok(Some(Claim {
            item: item_from_row(&row)?,
            previous: parse_status(&previous)?,
        }))
    }
}

#[async_trait]
impl SyncQueueStore for PostgresSyncQueueStore {
    #[instrument(skip(self, item), fields(store = %item.store_id, item_id = %item.id), err)]
    async fn enqueue(&self, item: PriceSyncQueueItem) -> Result<SyncItemId, SyncStoreError> {
        sqlx::query(
            r#"
            INSERT INTO price_sync_queue (
                id, store_id, product_id, old_price, new_price, target, status, attempts,
                last_error_kind, error_message, created_at, last_attempt_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.store_id.as_uuid())
        .bind(item.product_id.as_uuid())
        .bind(item.old_price)
        .bind(item.new_price)
        .bind(&item.target)
        .bind(item.status.as_str())
        .bind(item.attempts as i32)
        .bind(item.last_error_kind.map(|k| k.as_str()))
        .bind(&item.error_message)
        .bind(item.created_at)
        .bind(item.last_attempt_at)
        .bind(item.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("enqueue", e) {
            SyncStoreError::AlreadyExists(_) => SyncStoreError::AlreadyExists(item.id),
            other => other,
        })?;

        Ok(item.id)
    }

    #[instrument(skip(self), fields(store = %store_id, item_id = %id), err)]
    async fn get(
        &self,
        store_id: StoreId,
        id: SyncItemId,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        match self.fetch(id).await? {
            Some(item) if item.store_id == store_id => Ok(item),
            Some(_) => Err(SyncStoreError::StoreIsolation),
            None => Err(SyncStoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self), fields(store = %store_id), err)]
    async fn claim_next(
        &self,
        store_id: StoreId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, SyncStoreError> {
        self.claim_where(store_id, None, stale_before, max_attempts, now)
            .await
    }

    #[instrument(skip(self), fields(store = %store_id, item_id = %id), err)]
    async fn claim(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, SyncStoreError> {
        self.claim_where(store_id, Some(id), stale_before, max_attempts, now)
            .await
    }

    #[instrument(skip(self), fields(store = %store_id), err)]
    async fn expire_stale(
        &self,
        store_id: StoreId,
        stale_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError> {
        let sql = format!(
            r#"
            UPDATE price_sync_queue
            SET status = 'failed',
                last_error_kind = 'transient',
                error_message = LEFT('transient: claim expired after ' || attempts || ' attempts', $4)
            WHERE store_id = $1
                AND status = 'syncing'
                AND {STALE}
                AND attempts >= $3
            RETURNING *
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(store_id.as_uuid())
            .bind(stale_before)
            .bind(max_attempts as i32)
            .bind(MAX_ERROR_MESSAGE_LEN as i32)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("expire_stale", e))?;

        let mut items = rows.iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?;
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    #[instrument(skip(self), fields(store = %store_id, item_id = %id), err)]
    async fn complete(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE price_sync_queue
            SET status = 'completed', completed_at = $4
            WHERE store_id = $1 AND id = $2 AND status = 'syncing' AND attempts = $3
            RETURNING *
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(id.as_uuid())
        .bind(attempt as i32)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete", e))?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(self
                .explain_miss(store_id, id, |item| SyncStoreError::ClaimLost(item.id))
                .await),
        }
    }

    #[instrument(skip(self, message), fields(store = %store_id, item_id = %id, kind = kind.as_str()), err)]
    async fn fail(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        attempt: u32,
        kind: SyncErrorKind,
        message: &str,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE price_sync_queue
            SET status = 'failed', last_error_kind = $4, error_message = $5
            WHERE store_id = $1 AND id = $2 AND status = 'syncing' AND attempts = $3
            RETURNING *
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(id.as_uuid())
        .bind(attempt as i32)
        .bind(kind.as_str())
        .bind(format_error_message(kind, message))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fail", e))?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(self
                .explain_miss(store_id, id, |item| SyncStoreError::ClaimLost(item.id))
                .await),
        }
    }

    #[instrument(skip(self), fields(store = %store_id, item_id = %id), err)]
    async fn retry_item(
        &self,
        store_id: StoreId,
        id: SyncItemId,
        max_attempts: u32,
    ) -> Result<PriceSyncQueueItem, SyncStoreError> {
        let row = sqlx::query(
            r#"
            UPDATE price_sync_queue
            SET status = 'pending'
            WHERE store_id = $1 AND id = $2 AND status = 'failed' AND attempts < $3
            RETURNING *
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(id.as_uuid())
        .bind(max_attempts as i32)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("retry_item", e))?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(self
                .explain_miss(store_id, id, |item| {
                    if item.status == SyncStatus::Failed {
                        SyncStoreError::AttemptsExhausted(item.id)
                    } else {
                        SyncStoreError::InvalidTransition(format!(
                            "sync item {} cannot move from {} to pending",
                            item.id, item.status
                        ))
                    }
                })
                .await),
        }
    }

    #[instrument(skip(self), fields(store = %store_id), err)]
    async fn requeue_failed(
        &self,
        store_id: StoreId,
        max_attempts: u32,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE price_sync_queue
            SET status = 'pending'
            WHERE store_id = $1
                AND status = 'failed'
                AND last_error_kind = 'transient'
                AND attempts < $2
            RETURNING *
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(max_attempts as i32)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue_failed", e))?;

        let mut items = rows.iter().map(item_from_row).collect::<Result<Vec<_>, _>>()?;
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    #[instrument(skip(self), fields(store = %store_id), err)]
    async fn list(
        &self,
        store_id: StoreId,
        status: Option<SyncStatus>,
        limit: usize,
    ) -> Result<Vec<PriceSyncQueueItem>, SyncStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM price_sync_queue
            WHERE store_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(item_from_row).collect()
    }

    #[instrument(skip(self), fields(store = %store_id), err)]
    async fn stats(
        &self,
        store_id: StoreId,
        max_attempts: u32,
    ) -> Result<SyncQueueStats, SyncStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                status,
                COUNT(*) AS n,
                COUNT(*) FILTER (WHERE attempts >= $2) AS exhausted
            FROM price_sync_queue
            WHERE store_id = $1
            GROUP BY status
            "#,
        )
        .bind(store_id.as_uuid())
        .bind(max_attempts as i32)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = SyncQueueStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
            let exhausted: i64 = row.try_get("exhausted").map_err(|e| map_sqlx_error("stats", e))?;
            match parse_status(&status)? {
                SyncStatus::Pending => stats.pending = n as usize,
                SyncStatus::Syncing => stats.syncing = n as usize,
                SyncStatus::Completed => stats.completed = n as usize,
                SyncStatus::Failed => {
                    stats.failed = n as usize;
                    stats.exhausted = exhausted as usize;
                }
            }
        }
        Ok(stats)
    }
}

fn parse_status(s: &str) -> Result<SyncStatus, SyncStoreError> {
    SyncStatus::parse(s).ok_or_else(|| SyncStoreError::Storage(format!("unknown status '{s}'")))
}

fn item_from_row(row: &PgRow) -> Result<PriceSyncQueueItem, SyncStoreError> {
    let get_err = |e: sqlx::Error| SyncStoreError::Storage(format!("failed to read queue row: {e}"));

    let status: String = row.try_get("status").map_err(get_err)?;
    let kind: Option<String> = row.try_get("last_error_kind").map_err(get_err)?;
    let attempts: i32 = row.try_get("attempts").map_err(get_err)?;
    let old_price: Decimal = row.try_get("old_price").map_err(get_err)?;
    let new_price: Decimal = row.try_get("new_price").map_err(get_err)?;

    Ok(PriceSyncQueueItem {
        id: SyncItemId::from_uuid(row.try_get("id").map_err(get_err)?),
        store_id: StoreId::from_uuid(row.try_get("store_id").map_err(get_err)?),
        product_id: ProductId::from_uuid(row.try_get("product_id").map_err(get_err)?),
        old_price,
        new_price,
        target: row.try_get("target").map_err(get_err)?,
        status: parse_status(&status)?,
        attempts: attempts.max(0) as u32,
        last_error_kind: kind.as_deref().and_then(SyncErrorKind::parse),
        error_message: row.try_get("error_message").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        last_attempt_at: row.try_get("last_attempt_at").map_err(get_err)?,
        completed_at: row.try_get("completed_at").map_err(get_err)?,
    })
}

/// Map SQLx errors to `SyncStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SyncStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // The caller knows the id and replaces the placeholder.
                Some("23505") => SyncStoreError::AlreadyExists(SyncItemId::from_uuid(uuid::Uuid::nil())),
                Some("23514") => SyncStoreError::InvalidTransition(msg),
                _ => SyncStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            SyncStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => SyncStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
