//! Waste prediction heuristics.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shelflife_catalog::Product;
use shelflife_core::{round_money, Entity, Money, PredictionId, ProductId, StoreId};

use crate::error::AnalysisError;
use crate::job::{AnalysisJob, StoreSnapshot};

pub const DEFAULT_HORIZON_DAYS: u32 = 7;

const URGENT_DAYS: i64 = 3;
const OVERSTOCK_QUANTITY: u32 = 50;
const LOW_DEMAND_QUANTITY: u32 = 20;

/// Why a product is expected to go unsold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WasteCause {
    Expiration,
    Overstock,
    LowDemand,
}

impl WasteCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            WasteCause::Expiration => "expiration",
            WasteCause::Overstock => "overstock",
            WasteCause::LowDemand => "low_demand",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "expiration" => Some(WasteCause::Expiration),
            "overstock" => Some(WasteCause::Overstock),
            "low_demand" => Some(WasteCause::LowDemand),
            _ => None,
        }
    }
}

/// One append-only prediction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WastePrediction {
    pub id: PredictionId,
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub product_name: String,
    /// Never exceeds the product quantity at prediction time.
    pub predicted_quantity: u32,
    pub predicted_value: Money,
    pub cause: WasteCause,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub recommendation: String,
    pub horizon_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Entity for WastePrediction {
    type Id = PredictionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn store_id(&self) -> StoreId {
        self.store_id
    }
}

/// `ceil(quantity * percent / 100)` in integer arithmetic.
fn ceil_share(quantity: u32, percent: u64) -> u32 {
    let q = quantity as u64;
    ((q * percent).div_ceil(100)).min(q) as u32
}

struct Heuristic {
    quantity: u32,
    cause: WasteCause,
    confidence: f64,
    recommendation: String,
}

fn classify(product: &Product, horizon_days: u32, now: DateTime<Utc>) -> Option<Heuristic> {
    if let Some(days) = product.days_until_expiry(now) {
        if days > 0 && days <= horizon_days as i64 {
            let recommendation = if days <= URGENT_DAYS {
                format!("Urgent: apply a deep discount or donate within {days} day(s)")
            } else {
                format!("Plan a promotion: expires in {days} days")
            };
            return Some(Heuristic {
                quantity: ceil_share(product.quantity, 30),
                cause: WasteCause::Expiration,
                confidence: 0.75,
                recommendation,
            });
        }
        if days <= 0 {
            return Some(Heuristic {
                quantity: product.quantity,
                cause: WasteCause::Expiration,
                confidence: 0.95,
                recommendation: "Remove from shelf and record as waste or donate if still safe"
                    .to_string(),
            });
        }
    }

    if product.quantity > OVERSTOCK_QUANTITY {
        return Some(Heuristic {
            quantity: ceil_share(product.quantity, 15),
            cause: WasteCause::Overstock,
            confidence: 0.60,
            recommendation: "Reduce reorder quantity and bundle with popular items".to_string(),
        });
    }

    if product.quantity > LOW_DEMAND_QUANTITY {
        return Some(Heuristic {
            quantity: ceil_share(product.quantity, 10),
            cause: WasteCause::LowDemand,
            confidence: 0.50,
            recommendation: "Consider a promotion to increase turnover".to_string(),
        });
    }

    None
}

/// End of the prediction window, `now + horizon_days`.
pub fn horizon_date(now: DateTime<Utc>, horizon_days: u32) -> Result<DateTime<Utc>, AnalysisError> {
    Duration::try_days(i64::from(horizon_days))
        .and_then(|d| now.checked_add_signed(d))
        .ok_or_else(|| {
            AnalysisError::InvalidInput(format!(
                "a {horizon_days}-day horizon from {now} is out of the supported date range"
            ))
        })
}

/// Predict waste for a single product (first matching heuristic wins).
pub fn predict_product(
    product: &Product,
    horizon_days: u32,
    now: DateTime<Utc>,
) -> Result<Option<WastePrediction>, AnalysisError> {
    let until = horizon_date(now, horizon_days)?;
    Ok(predict_until(product, horizon_days, until, now))
}

fn predict_until(
    product: &Product,
    horizon_days: u32,
    horizon_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<WastePrediction> {
    if product.quantity == 0 {
        return None;
    }

    let h = classify(product, horizon_days, now)?;
    Some(WastePrediction {
        id: PredictionId::new(),
        store_id: product.store_id,
        product_id: product.id,
        product_name: product.name.clone(),
        predicted_quantity: h.quantity,
        predicted_value: round_money(Decimal::from(h.quantity) * product.price),
        cause: h.cause,
        confidence: h.confidence,
        recommendation: h.recommendation,
        horizon_date,
        created_at: now,
    })
}

/// Predict waste for every product; at most one prediction per product.
pub fn predict(
    products: &[Product],
    horizon_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<WastePrediction>, AnalysisError> {
    let until = horizon_date(now, horizon_days)?;
    Ok(products
        .iter()
        .filter_map(|p| predict_until(p, horizon_days, until, now))
        .collect())
}

/// Input snapshot for a prediction run.
#[derive(Debug, Clone)]
pub struct WasteSnapshot {
    pub store_id: StoreId,
    pub products: Vec<Product>,
    pub as_of: DateTime<Utc>,
}

impl StoreSnapshot for WasteSnapshot {
    fn store_id(&self) -> StoreId {
        self.store_id
    }
}

/// Output of one prediction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRun {
    pub run_id: Uuid,
    pub store_id: StoreId,
    pub created_at: DateTime<Utc>,
    pub predictions: Vec<WastePrediction>,
    pub total_predicted_value: Money,
}

impl PredictionRun {
    pub fn count_by_cause(&self, cause: WasteCause) -> usize {
        self.predictions.iter().filter(|p| p.cause == cause).count()
    }
}

/// Waste prediction as a store-scoped analysis job.
#[derive(Debug, Clone)]
pub struct WastePredictionJob {
    store_id: StoreId,
    input: WasteSnapshot,
    horizon_days: u32,
}

impl WastePredictionJob {
    pub fn new(store_id: StoreId, input: WasteSnapshot) -> Self {
        Self {
            store_id,
            input,
            horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }

    pub fn with_horizon_days(mut self, horizon_days: u32) -> Self {
        self.horizon_days = horizon_days;
        self
    }
}

impl AnalysisJob for WastePredictionJob {
    type Input = WasteSnapshot;
    type Output = PredictionRun;

    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn input(&self) -> &Self::Input {
        &self.input
    }

    fn run(&self) -> Result<PredictionRun, AnalysisError> {
        if self.horizon_days == 0 {
            return Err(AnalysisError::InvalidInput(
                "horizon_days must be >= 1".to_string(),
            ));
        }
        if let Some(foreign) = self.input.products.iter().find(|p| p.store_id != self.store_id) {
            return Err(AnalysisError::InvalidInput(format!(
                "product {} belongs to another store",
                foreign.id
            )));
        }

        let predictions = predict(&self.input.products, self.horizon_days, self.input.as_of)?;
        let total_predicted_value = predictions.iter().map(|p| p.predicted_value).sum();

        Ok(PredictionRun {
            run_id: Uuid::now_v7(),
            store_id: self.store_id,
            created_at: self.input.as_of,
            predictions,
            total_predicted_value,
        })
    }
}
