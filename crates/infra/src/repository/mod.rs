//! Store-scoped repositories for the records the engine reads and writes.
//!
//! The product, order and rule tables are owned by the inventory/sales subsystem; the
//! engine only reads them, with a single authorized mutation: `update_price`. Predictions
//! are append-only, correlations are upserted by pair.

mod in_memory;

pub use in_memory::{
    InMemoryCorrelationRepository, InMemoryOrderRepository, InMemoryPredictionRepository,
    InMemoryProductRepository, InMemoryRuleRepository,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shelflife_analytics::{PredictionRun, ProductCorrelation, WastePrediction};
use shelflife_catalog::{LineItem, Product};
use shelflife_core::{Money, ProductId, StoreId};
use shelflife_pricing::PricingRule;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store isolation violation")]
    StoreIsolation,
    #[error("invalid record: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    pub(crate) fn poisoned() -> Self {
        RepositoryError::Storage("repository lock poisoned".to_string())
    }
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn list_products(&self, store_id: StoreId) -> Result<Vec<Product>, RepositoryError>;

    async fn get_product(
        &self,
        store_id: StoreId,
        product_id: ProductId,
    ) -> Result<Product, RepositoryError>;

    /// Write the authoritative price and the audit annotation of the applied rule.
    async fn update_price(
        &self,
        store_id: StoreId,
        product_id: ProductId,
        new_price: Money,
        annotation: &str,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn list_rules(&self, store_id: StoreId) -> Result<Vec<PricingRule>, RepositoryError>;

    async fn active_rules(&self, store_id: StoreId) -> Result<Vec<PricingRule>, RepositoryError> {
        Ok(self
            .list_rules(store_id)
            .await?
            .into_iter()
            .filter(|r| r.is_active)
            .collect())
    }

    async fn save_rule(&self, rule: PricingRule) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait PredictionRepository: Send + Sync {
    /// Append a run; earlier runs are never touched.
    async fn append_run(&self, run: &PredictionRun) -> Result<(), RepositoryError>;

    async fn latest_run(&self, store_id: StoreId)
    -> Result<Option<PredictionRun>, RepositoryError>;

    /// Every prediction created at or after `since`.
    async fn predictions_since(
        &self,
        store_id: StoreId,
        since: DateTime<Utc>,
    ) -> Result<Vec<WastePrediction>, RepositoryError>;
}

#[async_trait]
pub trait CorrelationRepository: Send + Sync {
    /// Upsert keyed by `(product_a, product_b)`.
    async fn upsert(&self, correlations: &[ProductCorrelation]) -> Result<usize, RepositoryError>;

    /// Strongest correlations first.
    async fn top(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<ProductCorrelation>, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn line_items(&self, store_id: StoreId) -> Result<Vec<LineItem>, RepositoryError>;
}
