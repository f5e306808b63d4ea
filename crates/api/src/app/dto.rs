use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shelflife_catalog::Product;
use shelflife_core::{ProductId, StoreId};
use shelflife_infra::sync::BatchOutcome;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ProcessQueueRequest {
    pub max_batch: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncQueueQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrendQuery {
    pub weeks: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Product snapshot pushed by the inventory subsystem.
#[derive(Debug, Deserialize)]
pub struct ProductInput {
    pub id: Option<ProductId>,
    pub name: String,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub quantity: u32,
    #[serde(default)]
    pub category: String,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl ProductInput {
    pub fn into_product(self, store_id: StoreId) -> Product {
        let mut product = Product::new(store_id, self.name, self.price, self.quantity)
            .with_original_price(self.original_price.or(Some(self.price)))
            .with_category(self.category);
        if let Some(id) = self.id {
            product = product.with_id(id);
        }
        if let Some(exp) = self.expiration_date {
            product = product.with_expiration(exp);
        }
        product
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub processed: usize,
    pub failed: usize,
}

impl From<BatchOutcome> for BatchResponse {
    fn from(b: BatchOutcome) -> Self {
        Self {
            processed: b.processed,
            failed: b.failed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: usize,
}
