use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shelflife_analytics::{PredictionRun, ProductCorrelation, ProductPair, WastePrediction};
use shelflife_catalog::{LineItem, Product};
use shelflife_core::{Money, ProductId, StoreId};
use shelflife_pricing::PricingRule;

use super::{
    CorrelationRepository, OrderRepository, PredictionRepository, ProductRepository,
    RepositoryError, RuleRepository,
};

/// In-memory product table for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductRepository {
    products: RwLock<HashMap<ProductId, Product>>,
    annotations: RwLock<HashMap<ProductId, String>>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a product snapshot (stands in for the inventory subsystem).
    pub fn insert(&self, product: Product) -> Result<(), RepositoryError> {
        product
            .validate()
            .map_err(|e| RepositoryError::Validation(e.to_string()))?;
        let mut map = self.products.write().map_err(|_| RepositoryError::poisoned())?;
        map.insert(product.id, product);
        Ok(())
    }

    /// Last audit annotation written by `update_price`.
    pub fn annotation(&self, product_id: ProductId) -> Option<String> {
        self.annotations.read().ok()?.get(&product_id).cloned()
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn list_products(&self, store_id: StoreId) -> Result<Vec<Product>, RepositoryError> {
        let map = self.products.read().map_err(|_| RepositoryError::poisoned())?;
        let mut out: Vec<Product> = map
            .values()
            .filter(|p| p.store_id == store_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    async fn get_product(
        &self,
        store_id: StoreId,
        product_id: ProductId,
    ) -> Result<Product, RepositoryError> {
        let map = self.products.read().map_err(|_| RepositoryError::poisoned())?;
        match map.get(&product_id) {
            Some(p) if p.store_id == store_id => Ok(p.clone()),
            Some(_) => Err(RepositoryError::StoreIsolation),
            None => Err(RepositoryError::NotFound(format!("product {product_id}"))),
        }
    }

    async fn update_price(
        &self,
        store_id: StoreId,
        product_id: ProductId,
        new_price: Money,
        annotation: &str,
    ) -> Result<(), RepositoryError> {
        if new_price.is_sign_negative() {
            return Err(RepositoryError::Validation("price must be >= 0".to_string()));
        }

        {
            let mut map = self.products.write().map_err(|_| RepositoryError::poisoned())?;
            let product = match map.get_mut(&product_id) {
                Some(p) if p.store_id == store_id => p,
                Some(_) => return Err(RepositoryError::StoreIsolation),
                None => return Err(RepositoryError::NotFound(format!("product {product_id}"))),
            };
            product.price = new_price;
        }

        let mut notes = self.annotations.write().map_err(|_| RepositoryError::poisoned())?;
        notes.insert(product_id, annotation.to_string());
        Ok(())
    }
}

/// In-memory rule configuration for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<HashMap<StoreId, Vec<PricingRule>>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn list_rules(&self, store_id: StoreId) -> Result<Vec<PricingRule>, RepositoryError> {
        let map = self.rules.read().map_err(|_| RepositoryError::poisoned())?;
        Ok(map.get(&store_id).cloned().unwrap_or_default())
    }

    async fn save_rule(&self, rule: PricingRule) -> Result<(), RepositoryError> {
        rule.validate()
            .map_err(|e| RepositoryError::Validation(e.to_string()))?;
        let mut map = self.rules.write().map_err(|_| RepositoryError::poisoned())?;
        let rules = map.entry(rule.store_id).or_default();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => rules.push(rule),
        }
        Ok(())
    }
}

/// Append-only prediction history.
#[derive(Debug, Default)]
pub struct InMemoryPredictionRepository {
    runs: RwLock<Vec<PredictionRun>>,
}

impl InMemoryPredictionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PredictionRepository for InMemoryPredictionRepository {
    async fn append_run(&self, run: &PredictionRun) -> Result<(), RepositoryError> {
        if run.predictions.iter().any(|p| p.store_id != run.store_id) {
            return Err(RepositoryError::StoreIsolation);
        }
        let mut runs = self.runs.write().map_err(|_| RepositoryError::poisoned())?;
        runs.push(run.clone());
        Ok(())
    }

    async fn latest_run(
        &self,
        store_id: StoreId,
    ) -> Result<Option<PredictionRun>, RepositoryError> {
        let runs = self.runs.read().map_err(|_| RepositoryError::poisoned())?;
        Ok(runs.iter().rev().find(|r| r.store_id == store_id).cloned())
    }

    async fn predictions_since(
        &self,
        store_id: StoreId,
        since: DateTime<Utc>,
    ) -> Result<Vec<WastePrediction>, RepositoryError> {
        let runs = self.runs.read().map_err(|_| RepositoryError::poisoned())?;
        Ok(runs
            .iter()
            .filter(|r| r.store_id == store_id)
            .flat_map(|r| r.predictions.iter())
            .filter(|p| p.created_at >= since)
            .cloned()
            .collect())
    }
}

/// Correlations keyed by store and canonical pair.
#[derive(Debug, Default)]
pub struct InMemoryCorrelationRepository {
    inner: RwLock<HashMap<(StoreId, ProductPair), ProductCorrelation>>,
}

impl InMemoryCorrelationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationRepository for InMemoryCorrelationRepository {
    async fn upsert(&self, correlations: &[ProductCorrelation]) -> Result<usize, RepositoryError> {
        let mut map = self.inner.write().map_err(|_| RepositoryError::poisoned())?;
        for c in correlations {
            map.insert((c.store_id, c.pair()), c.clone());
        }
        Ok(correlations.len())
    }

    async fn top(
        &self,
        store_id: StoreId,
        limit: usize,
    ) -> Result<Vec<ProductCorrelation>, RepositoryError> {
        let map = self.inner.read().map_err(|_| RepositoryError::poisoned())?;
        let mut out: Vec<ProductCorrelation> = map
            .iter()
            .filter(|((s, _), _)| *s == store_id)
            .map(|(_, c)| c.clone())
            .collect();
        out.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.frequency.cmp(&a.frequency))
                .then_with(|| a.pair().cmp(&b.pair()))
        });
        out.truncate(limit);
        Ok(out)
    }
}

/// Historical order lines per store.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    inner: RwLock<HashMap<StoreId, Vec<LineItem>>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(
        &self,
        store_id: StoreId,
        items: impl IntoIterator<Item = LineItem>,
    ) -> Result<(), RepositoryError> {
        let mut map = self.inner.write().map_err(|_| RepositoryError::poisoned())?;
        map.entry(store_id).or_default().extend(items);
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn line_items(&self, store_id: StoreId) -> Result<Vec<LineItem>, RepositoryError> {
        let map = self.inner.read().map_err(|_| RepositoryError::poisoned())?;
        Ok(map.get(&store_id).cloned().unwrap_or_default())
    }
}
