//! Downstream systems (POS, delivery platforms) that receive price updates.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shelflife_core::{Money, ProductId, StoreId, SyncItemId};

use super::types::{PriceSyncQueueItem, SyncErrorKind};

/// Default bound on a single call to a target.
pub const DEFAULT_TARGET_TIMEOUT: Duration = Duration::from_secs(10);

/// Payload delivered to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub item_id: SyncItemId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub old_price: Money,
    pub new_price: Money,
}

impl From<&PriceSyncQueueItem> for PriceUpdate {
    fn from(item: &PriceSyncQueueItem) -> Self {
        Self {
            item_id: item.id,
            store_id: item.store_id,
            product_id: item.product_id,
            old_price: item.old_price,
            new_price: item.new_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// Timeout, connection failure, 5xx, 429: retrying may help.
    #[error("{0}")]
    Transient(String),
    /// Rejected request or unusable payload: fix the data first.
    #[error("{0}")]
    Permanent(String),
}

impl TargetError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            TargetError::Transient(_) => SyncErrorKind::Transient,
            TargetError::Permanent(_) => SyncErrorKind::Permanent,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TargetError::Transient(m) | TargetError::Permanent(m) => m,
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {body}")
        };
        if status >= 500 || status == 429 {
            TargetError::Transient(msg)
        } else {
            TargetError::Permanent(msg)
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), "");
        }
        if err.is_timeout() {
            return TargetError::Transient(format!("request timed out: {err}"));
        }
        if err.is_connect() {
            return TargetError::Transient(format!("connection failed: {err}"));
        }
        if err.is_builder() || err.is_body() || err.is_decode() {
            return TargetError::Permanent(format!("invalid payload: {err}"));
        }
        TargetError::Transient(err.to_string())
    }
}

/// A system that must be told about price changes.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, update: &PriceUpdate) -> Result<(), TargetError>;
}

/// JSON-over-HTTP webhook target.
#[derive(Debug, Clone)]
pub struct HttpSyncTarget {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpSyncTarget {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TargetError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TargetError::Permanent(format!("http client: {e}")))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SyncTarget for HttpSyncTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, update: &PriceUpdate) -> Result<(), TargetError> {
        let response = self
            .client
            .post(&self.url)
            .json(update)
            .send()
            .await
            .map_err(|e| TargetError::from_reqwest(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TargetError::from_status(status.as_u16(), body.trim()))
    }
}

/// Target with scripted outcomes for tests/dev; records every call.
///
/// Outcomes are consumed in order; once the script runs out every call succeeds.
/// Products registered with `fail_product` always fail with the given error.
#[derive(Debug, Default)]
pub struct ScriptedSyncTarget {
    name: String,
    script: Mutex<VecDeque<Result<(), TargetError>>>,
    per_product: Mutex<HashMap<ProductId, TargetError>>,
    calls: Mutex<Vec<PriceUpdate>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedSyncTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = Result<(), TargetError>>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.extend(outcomes);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_product(&self, product_id: ProductId, error: TargetError) {
        if let Ok(mut map) = self.per_product.lock() {
            map.insert(product_id, error);
        }
    }

    pub fn calls(&self) -> Vec<PriceUpdate> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Highest number of simultaneous calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncTarget for ScriptedSyncTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, update: &PriceUpdate) -> Result<(), TargetError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(update.clone());
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let forced = self
            .per_product
            .lock()
            .ok()
            .and_then(|m| m.get(&update.product_id).cloned());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match forced {
            Some(err) => Err(err),
            None => scripted.unwrap_or(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(TargetError::from_status(503, "").kind(), SyncErrorKind::Transient);
        assert_eq!(TargetError::from_status(429, "slow down").kind(), SyncErrorKind::Transient);
        assert_eq!(TargetError::from_status(400, "bad sku").kind(), SyncErrorKind::Permanent);
        assert_eq!(TargetError::from_status(404, "").kind(), SyncErrorKind::Permanent);
        assert_eq!(TargetError::from_status(422, "x").message(), "HTTP 422: x");
    }

    #[tokio::test]
    async fn scripted_target_replays_outcomes_then_succeeds() {
        let target = ScriptedSyncTarget::new("pos")
            .with_script([Err(TargetError::Transient("timeout".to_string()))]);
        let update = PriceUpdate {
            item_id: SyncItemId::new(),
            store_id: StoreId::new(),
            product_id: ProductId::new(),
            old_price: Money::ONE_HUNDRED,
            new_price: Money::TEN,
        };

        assert!(target.push(&update).await.is_err());
        assert!(target.push(&update).await.is_ok());
        assert_eq!(target.calls().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_http_target_is_transient() {
        // Port 9 (discard) on localhost is closed in test environments.
        let target =
            HttpSyncTarget::new("pos", "http://127.0.0.1:9/prices", Duration::from_secs(2)).unwrap();
        let update = PriceUpdate {
            item_id: SyncItemId::new(),
            store_id: StoreId::new(),
            product_id: ProductId::new(),
            old_price: Money::ONE,
            new_price: Money::ONE,
        };

        let err = target.push(&update).await.unwrap_err();
        assert_eq!(err.kind(), SyncErrorKind::Transient);
    }
}
