//! Co-purchase correlation mining over historical order line items.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shelflife_catalog::LineItem;
use shelflife_core::{DomainError, DomainResult, OrderId, ProductId, StoreId};

use crate::error::AnalysisError;
use crate::job::{AnalysisJob, StoreSnapshot};

pub const DEFAULT_TOP_N: usize = 20;
pub const DEFAULT_MIN_FREQUENCY: u32 = 2;

const MAX_SCORE: f64 = 0.99;
const MAX_CONFIDENCE: f64 = 0.95;
const SCORE_ORDER_SHARE: f64 = 0.3;
const CONFIDENCE_SATURATION: f64 = 20.0;

/// Unordered product pair, stored as `(smaller, larger)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductPair {
    a: ProductId,
    b: ProductId,
}

impl ProductPair {
    pub fn new(x: ProductId, y: ProductId) -> DomainResult<Self> {
        if x == y {
            return Err(DomainError::InvalidPair(
                "a product cannot be correlated with itself".to_string(),
            ));
        }
        Ok(if x < y { Self { a: x, b: y } } else { Self { a: y, b: x } })
    }

    pub fn first(&self) -> ProductId {
        self.a
    }

    pub fn second(&self) -> ProductId {
        self.b
    }
}

/// Raw analysis result for one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CoPurchase {
    pub pair: ProductPair,
    pub frequency: u32,
    pub score: f64,
    pub confidence: f64,
}

fn score(frequency: u32, total_orders: usize) -> f64 {
    let denominator = (total_orders as f64 * SCORE_ORDER_SHARE).max(1.0);
    (frequency as f64 / denominator).min(MAX_SCORE)
}

fn confidence(frequency: u32) -> f64 {
    (frequency as f64 / CONFIDENCE_SATURATION).min(MAX_CONFIDENCE)
}

/// Count co-purchases per pair and keep the strongest `top_n`.
///
/// Ordering: score descending, then frequency descending, then pair ascending.
pub fn analyze_co_purchases(
    line_items: &[LineItem],
    top_n: usize,
    min_frequency: u32,
) -> Vec<CoPurchase> {
    let mut orders: HashMap<OrderId, BTreeSet<ProductId>> = HashMap::new();
    for item in line_items {
        orders.entry(item.order_id).or_default().insert(item.product_id);
    }
    let total_orders = orders.len();

    let mut counts: BTreeMap<ProductPair, u32> = BTreeMap::new();
    for products in orders.values() {
        let products: Vec<ProductId> = products.iter().copied().collect();
        for (i, a) in products.iter().enumerate() {
            for b in &products[i + 1..] {
                // Set iteration is sorted and distinct, so (a, b) is already canonical.
                *counts.entry(ProductPair { a: *a, b: *b }).or_insert(0) += 1;
            }
        }
    }

    let mut results: Vec<CoPurchase> = counts
        .into_iter()
        .filter(|(_, f)| *f >= min_frequency.max(1))
        .map(|(pair, frequency)| CoPurchase {
            pair,
            frequency,
            score: score(frequency, total_orders),
            confidence: confidence(frequency),
        })
        .collect();

    results.sort_by(|x, y| {
        y.score
            .total_cmp(&x.score)
            .then_with(|| y.frequency.cmp(&x.frequency))
            .then_with(|| x.pair.cmp(&y.pair))
    });
    results.truncate(top_n);
    results
}

/// Persisted correlation record (upserted by pair).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCorrelation {
    pub store_id: StoreId,
    pub product_a: ProductId,
    pub product_b: ProductId,
    pub product_a_name: String,
    pub product_b_name: String,
    pub frequency: u32,
    pub score: f64,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

impl ProductCorrelation {
    pub fn pair(&self) -> ProductPair {
        ProductPair { a: self.product_a, b: self.product_b }
    }
}

/// Input for a correlation recalculation.
#[derive(Debug, Clone)]
pub struct OrderHistory {
    pub store_id: StoreId,
    pub line_items: Vec<LineItem>,
    pub as_of: DateTime<Utc>,
}

impl StoreSnapshot for OrderHistory {
    fn store_id(&self) -> StoreId {
        self.store_id
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationJob {
    store_id: StoreId,
    input: OrderHistory,
    top_n: usize,
    min_frequency: u32,
}

impl CorrelationJob {
    pub fn new(store_id: StoreId, input: OrderHistory) -> Self {
        Self {
            store_id,
            input,
            top_n: DEFAULT_TOP_N,
            min_frequency: DEFAULT_MIN_FREQUENCY,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_min_frequency(mut self, min_frequency: u32) -> Self {
        self.min_frequency = min_frequency;
        self
    }
}

impl AnalysisJob for CorrelationJob {
    type Input = OrderHistory;
    type Output = Vec<ProductCorrelation>;

    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn input(&self) -> &Self::Input {
        &self.input
    }

    fn run(&self) -> Result<Vec<ProductCorrelation>, AnalysisError> {
        let mut names: HashMap<ProductId, &str> = HashMap::new();
        for item in &self.input.line_items {
            names.insert(item.product_id, item.product_name.as_str());
        }
        let name_of = |id: ProductId| names.get(&id).map(|n| n.to_string()).unwrap_or_default();

        Ok(analyze_co_purchases(&self.input.line_items, self.top_n, self.min_frequency)
            .into_iter()
            .map(|c| ProductCorrelation {
                store_id: self.store_id,
                product_a: c.pair.first(),
                product_b: c.pair.second(),
                product_a_name: name_of(c.pair.first()),
                product_b_name: name_of(c.pair.second()),
                frequency: c.frequency,
                score: c.score,
                confidence: c.confidence,
                updated_at: self.input.as_of,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{AnalysisScheduler, LocalAnalysisScheduler};

    fn basket(order: OrderId, products: &[ProductId]) -> Vec<LineItem> {
        products
            .iter()
            .map(|p| LineItem::new(order, *p, format!("p-{p}"), 1))
            .collect()
    }

    #[test]
    fn pair_is_canonical_and_rejects_self() {
        let x = ProductId::new();
        let y = ProductId::new();
        assert_eq!(ProductPair::new(x, y).unwrap(), ProductPair::new(y, x).unwrap());
        assert!(ProductPair::new(x, x).is_err());
    }

    #[test]
    fn six_of_fifteen_orders_saturates_score() {
        let bread = ProductId::new();
        let butter = ProductId::new();
        let milk = ProductId::new();

        let mut items = Vec::new();
        for _ in 0..6 {
            items.extend(basket(OrderId::new(), &[bread, butter]));
        }
        for _ in 0..9 {
            items.extend(basket(OrderId::new(), &[milk]));
        }

        let result = analyze_co_purchases(&items, DEFAULT_TOP_N, DEFAULT_MIN_FREQUENCY);

        assert_eq!(result.len(), 1);
        let c = &result[0];
        assert_eq!(c.pair, ProductPair::new(bread, butter).unwrap());
        assert_eq!(c.frequency, 6);
        assert_eq!(c.score, 0.99);
        assert!((c.confidence - 0.30).abs() < 1e-12);
    }

    #[test]
    fn single_co_purchase_is_discarded() {
        let items = basket(OrderId::new(), &[ProductId::new(), ProductId::new()]);
        assert!(analyze_co_purchases(&items, DEFAULT_TOP_N, DEFAULT_MIN_FREQUENCY).is_empty());
    }

    #[test]
    fn repeated_product_in_one_order_counts_once() {
        let a = ProductId::new();
        let b = ProductId::new();
        let mut items = Vec::new();
        for _ in 0..2 {
            let order = OrderId::new();
            items.extend(basket(order, &[a, a, b, b]));
        }

        let result = analyze_co_purchases(&items, DEFAULT_TOP_N, DEFAULT_MIN_FREQUENCY);
        assert_eq!(result[0].frequency, 2);
    }

    #[test]
    fn ordering_and_top_n() {
        let ids: Vec<ProductId> = (0..4).map(|_| ProductId::new()).collect();
        let mut items = Vec::new();
        // (0,1) in 3 orders; (2,3) in 2 orders. 5 orders total -> denominators 1.5.
        for _ in 0..3 {
            items.extend(basket(OrderId::new(), &[ids[0], ids[1]]));
        }
        for _ in 0..2 {
            items.extend(basket(OrderId::new(), &[ids[2], ids[3]]));
        }

        let all = analyze_co_purchases(&items, 10, 2);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].frequency, 3);
        assert!(all[0].score >= all[1].score);

        let top = analyze_co_purchases(&items, 1, 2);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].pair, ProductPair::new(ids[0], ids[1]).unwrap());
    }

    #[test]
    fn job_names_products_and_checks_store() {
        let store = StoreId::new();
        let a = ProductId::new();
        let b = ProductId::new();
        let mut line_items = Vec::new();
        for _ in 0..2 {
            let order = OrderId::new();
            line_items.push(LineItem::new(order, a, "Bread", 1));
            line_items.push(LineItem::new(order, b, "Butter", 1));
        }
        let history = OrderHistory { store_id: store, line_items, as_of: Utc::now() };

        let out = LocalAnalysisScheduler::for_store(store)
            .run(CorrelationJob::new(store, history.clone()))
            .unwrap();
        assert_eq!(out.len(), 1);
        let names = [out[0].product_a_name.as_str(), out[0].product_b_name.as_str()];
        assert!(names.contains(&"Bread") && names.contains(&"Butter"));

        let other = StoreId::new();
        let err = LocalAnalysisScheduler::for_store(other)
            .run(CorrelationJob::new(other, history))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: scores stay in [0, 0.99], confidence in [0, 0.95], frequency >= 2.
            #[test]
            fn scores_are_bounded(
                baskets in prop::collection::vec(prop::collection::vec(0usize..6, 1..5), 0..40),
            ) {
                let catalog: Vec<ProductId> = (0..6).map(|_| ProductId::new()).collect();
                let items: Vec<LineItem> = baskets
                    .iter()
                    .flat_map(|b| {
                        let order = OrderId::new();
                        b.iter().map(move |i| (order, *i)).collect::<Vec<_>>()
                    })
                    .map(|(order, i)| LineItem::new(order, catalog[i], "x", 1))
                    .collect();

                for c in analyze_co_purchases(&items, DEFAULT_TOP_N, DEFAULT_MIN_FREQUENCY) {
                    prop_assert!(c.score >= 0.0 && c.score <= 0.99);
                    prop_assert!(c.confidence >= 0.0 && c.confidence <= 0.95);
                    prop_assert!(c.frequency >= 2);
                    prop_assert!(c.pair.first() < c.pair.second());
                }
            }
        }
    }
}
