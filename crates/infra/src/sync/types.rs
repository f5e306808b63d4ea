//! Queue item model and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shelflife_core::{DomainError, DomainResult, Money, ProductId, StoreId, SyncItemId};
use shelflife_pricing::PriceChange;

/// Upper bound (in characters) of a stored error message.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Default attempt budget per item.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by a processor; a call to the target may be in flight
    Syncing,
    /// Target acknowledged the new price
    Completed,
    /// Last attempt failed; see `last_error_kind`
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "syncing" => Some(SyncStatus::Syncing),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether retrying may help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    Transient,
    Permanent,
}

impl SyncErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorKind::Transient => "transient",
            SyncErrorKind::Permanent => "permanent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transient" => Some(SyncErrorKind::Transient),
            "permanent" => Some(SyncErrorKind::Permanent),
            _ => None,
        }
    }
}

/// `"<kind>: <message>"`, cut to `MAX_ERROR_MESSAGE_LEN` characters.
pub fn format_error_message(kind: SyncErrorKind, message: &str) -> String {
    format!("{}: {}", kind.as_str(), message)
        .chars()
        .take(MAX_ERROR_MESSAGE_LEN)
        .collect()
}

/// A successful claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub item: PriceSyncQueueItem,
    /// `syncing` when a stale claim was taken over.
    pub previous: SyncStatus,
}

/// One price change to deliver to one target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSyncQueueItem {
    pub id: SyncItemId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub old_price: Money,
    pub new_price: Money,
    /// Name of the downstream system (e.g. "pos", "delivery").
    pub target: String,
    pub status: SyncStatus,
    /// Claims so far (a stale reclaim counts as a new attempt).
    pub attempts: u32,
    pub last_error_kind: Option<SyncErrorKind>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PriceSyncQueueItem {
    pub fn new(
        store_id: StoreId,
        product_id: ProductId,
        old_price: Money,
        new_price: Money,
        target: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SyncItemId::new(),
            store_id,
            product_id,
            old_price,
            new_price,
            target: target.into(),
            status: SyncStatus::Pending,
            attempts: 0,
            last_error_kind: None,
            error_message: None,
            created_at: now,
            last_attempt_at: None,
            completed_at: None,
        }
    }

    pub fn from_change(change: &PriceChange, target: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(
            change.store_id,
            change.product_id,
            change.old_price,
            change.new_price,
            target,
            now,
        )
    }

    /// Claimable when pending, or when a claim went stale (`last_attempt_at < stale_before`),
    /// as long as the attempt budget allows one more claim.
    pub fn is_claimable(&self, stale_before: DateTime<Utc>, max_attempts: u32) -> bool {
        self.has_attempts_left(max_attempts)
            && match self.status {
                SyncStatus::Pending => true,
                SyncStatus::Syncing => self.is_stale(stale_before),
                _ => false,
            }
    }

    /// A stale claim with no attempts left; it is failed instead of reclaimed.
    pub fn is_expired_claim(&self, stale_before: DateTime<Utc>, max_attempts: u32) -> bool {
        self.status == SyncStatus::Syncing
            && self.is_stale(stale_before)
            && !self.has_attempts_left(max_attempts)
    }

    fn is_stale(&self, stale_before: DateTime<Utc>) -> bool {
        self.last_attempt_at.is_none_or(|at| at < stale_before)
    }

    /// `pending -> syncing` (or a stale `syncing` reclaim). Each claim is one attempt.
    pub fn mark_syncing(&mut self, now: DateTime<Utc>, max_attempts: u32) -> DomainResult<()> {
        if !matches!(self.status, SyncStatus::Pending | SyncStatus::Syncing) {
            return Err(self.illegal(SyncStatus::Syncing));
        }
        if !self.has_attempts_left(max_attempts) {
            return Err(self.exhausted(max_attempts));
        }
        self.status = SyncStatus::Syncing;
        self.attempts += 1;
        self.last_attempt_at = Some(now);
        Ok(())
    }

    /// `syncing -> completed`.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != SyncStatus::Syncing {
            return Err(self.illegal(SyncStatus::Completed));
        }
        self.status = SyncStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }

    /// `syncing -> failed`, recording the classified message.
    pub fn mark_failed(&mut self, kind: SyncErrorKind, message: &str) -> DomainResult<()> {
        if self.status != SyncStatus::Syncing {
            return Err(self.illegal(SyncStatus::Failed));
        }
        self.status = SyncStatus::Failed;
        self.last_error_kind = Some(kind);
        self.error_message = Some(format_error_message(kind, message));
        Ok(())
    }

    /// `syncing -> failed` for a stale claim with no attempts left.
    pub fn expire_claim(&mut self, stale_before: DateTime<Utc>, max_attempts: u32) -> DomainResult<()> {
        if !self.is_expired_claim(stale_before, max_attempts) {
            return Err(self.illegal(SyncStatus::Failed));
        }
        let message = format!("claim expired after {} attempts", self.attempts);
        self.mark_failed(SyncErrorKind::Transient, &message)
    }

    /// `failed -> pending`, only while the attempt budget is not exhausted.
    ///
    /// The last error is kept for the operator view until the next attempt overwrites it.
    pub fn requeue(&mut self, max_attempts: u32) -> DomainResult<()> {
        if self.status != SyncStatus::Failed {
            return Err(self.illegal(SyncStatus::Pending));
        }
        if !self.has_attempts_left(max_attempts) {
            return Err(self.exhausted(max_attempts));
        }
        self.status = SyncStatus::Pending;
        Ok(())
    }

    pub fn has_attempts_left(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }

    /// Eligible for the scheduled (automatic) retry.
    pub fn is_auto_retryable(&self, max_attempts: u32) -> bool {
        self.status == SyncStatus::Failed
            && self.last_error_kind == Some(SyncErrorKind::Transient)
            && self.has_attempts_left(max_attempts)
    }

    /// Attempts beyond the first.
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    fn illegal(&self, to: SyncStatus) -> DomainError {
        DomainError::IllegalTransition {
            item: self.id,
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }

    fn exhausted(&self, max_attempts: u32) -> DomainError {
        DomainError::AttemptsExhausted {
            item: self.id,
            max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn item() -> PriceSyncQueueItem {
        PriceSyncQueueItem::new(
            StoreId::new(),
            ProductId::new(),
            dec!(10.00),
            dec!(6.00),
            "pos",
            Utc::now(),
        )
    }

    #[test]
    fn pending_cannot_skip_syncing() {
        let mut i = item();
        assert!(i.mark_completed(Utc::now()).is_err());
        assert!(i.mark_failed(SyncErrorKind::Transient, "x").is_err());
        assert_eq!(i.status, SyncStatus::Pending);
    }

    #[test]
    fn two_timeouts_then_success_records_two_retries() {
        let mut i = item();
        for _ in 0..2 {
            i.mark_syncing(Utc::now(), DEFAULT_MAX_ATTEMPTS).unwrap();
            i.mark_failed(SyncErrorKind::Transient, "request timed out").unwrap();
            assert!(i.is_auto_retryable(DEFAULT_MAX_ATTEMPTS));
            i.requeue(DEFAULT_MAX_ATTEMPTS).unwrap();
        }
        i.mark_syncing(Utc::now(), DEFAULT_MAX_ATTEMPTS).unwrap();
        i.mark_completed(Utc::now()).unwrap();

        assert_eq!(i.status, SyncStatus::Completed);
        assert_eq!(i.retry_count(), 2);
        assert!(i.completed_at.is_some());
    }

    #[test]
    fn requeue_stops_at_attempt_budget() {
        let mut i = item();
        for _ in 0..3 {
            i.mark_syncing(Utc::now(), DEFAULT_MAX_ATTEMPTS).unwrap();
            i.mark_failed(SyncErrorKind::Transient, "503").unwrap();
            let _ = i.requeue(3);
        }
        assert_eq!(i.status, SyncStatus::Failed);
        assert!(matches!(
            i.requeue(3),
            Err(DomainError::AttemptsExhausted { max_attempts: 3, .. })
        ));
    }

    #[test]
    fn permanent_errors_are_not_auto_retried() {
        let mut i = item();
        i.mark_syncing(Utc::now(), DEFAULT_MAX_ATTEMPTS).unwrap();
        i.mark_failed(SyncErrorKind::Permanent, "400 Bad Request").unwrap();

        assert!(!i.is_auto_retryable(3));
        assert_eq!(i.error_message.as_deref(), Some("permanent: 400 Bad Request"));
        // Manual retry is still allowed.
        i.requeue(3).unwrap();
        assert_eq!(i.status, SyncStatus::Pending);
    }

    #[test]
    fn stale_claims_become_claimable() {
        let mut i = item();
        let claimed_at = Utc::now() - Duration::minutes(10);
        i.mark_syncing(claimed_at, 3).unwrap();

        assert!(!i.is_claimable(claimed_at - Duration::minutes(1), 3));
        assert!(i.is_claimable(Utc::now() - Duration::minutes(5), 3));
    }

    #[test]
    fn stale_claim_on_last_attempt_is_expired_not_reclaimed() {
        let mut i = item();
        let stale_before = Utc::now() - Duration::minutes(5);
        for _ in 0..3 {
            i.mark_syncing(Utc::now() - Duration::minutes(10), 3).unwrap();
        }
        assert_eq!(i.attempts, 3);
        assert!(!i.is_claimable(stale_before, 3));
        assert!(matches!(
            i.mark_syncing(Utc::now(), 3),
            Err(DomainError::AttemptsExhausted { .. })
        ));

        i.expire_claim(stale_before, 3).unwrap();
        assert_eq!(i.status, SyncStatus::Failed);
        assert_eq!(i.error_message.as_deref(), Some("transient: claim expired after 3 attempts"));
        assert!(!i.is_auto_retryable(3));
        assert!(i.requeue(3).is_err());
    }

    #[test]
    fn fresh_claim_cannot_be_expired() {
        let mut i = item();
        i.mark_syncing(Utc::now(), 1).unwrap();
        assert!(matches!(
            i.expire_claim(Utc::now() - Duration::minutes(5), 1),
            Err(DomainError::IllegalTransition { from: "syncing", to: "failed", .. })
        ));
    }

    #[test]
    fn error_messages_are_truncated_on_char_boundary() {
        let long = "é".repeat(1_000);
        let msg = format_error_message(SyncErrorKind::Transient, &long);
        assert_eq!(msg.chars().count(), MAX_ERROR_MESSAGE_LEN);
        assert!(msg.starts_with("transient: "));
    }
}
