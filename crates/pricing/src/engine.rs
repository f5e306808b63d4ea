use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use shelflife_catalog::Product;
use shelflife_core::{round_money, StoreId};

use crate::change::PriceChange;
use crate::rule::PricingRule;

/// Minimum absolute difference (exclusive) between the current and the proposed price.
pub const DEFAULT_PRICE_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Expiration-band pricing rule engine.
///
/// Model:
/// - `days = floor(expiration - now)`, clamped at 0 (expired = most urgent band).
/// - Pick the active expiration rule whose `[min_days, max_days)` contains `days`;
///   overlapping bands resolve to the smallest `min_days` (then smallest rule id).
/// - `new_price = round_half_up(basis * (1 - pct/100))`, where `basis` is the original
///   price when known. Using the original price keeps repeated runs from compounding.
/// - Emit only when `|new_price - price| > epsilon`.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    epsilon: Decimal,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_PRICE_EPSILON,
        }
    }
}

impl PricingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epsilon(mut self, epsilon: Decimal) -> Self {
        self.epsilon = epsilon.abs();
        self
    }

    pub fn epsilon(&self) -> Decimal {
        self.epsilon
    }

    /// Select the single matching rule of `store_id` for `days` (already clamped).
    ///
    /// Rules of other stores and rules that fail validation never take part.
    pub fn select_rule(rules: &[PricingRule], store_id: StoreId, days: i64) -> Option<&PricingRule> {
        rules
            .iter()
            .filter(|r| r.store_id == store_id && r.applies_to_expiration())
            .filter(|r| r.condition.contains(days) && r.validate().is_ok())
            .min_by_key(|r| (r.condition.min_days, r.id))
    }

    /// Proposed price for `product` under `rule` (rounded to the minor unit).
    pub fn proposed_price(product: &Product, rule: &PricingRule) -> Decimal {
        let factor = Decimal::ONE - rule.discount_percentage / Decimal::ONE_HUNDRED;
        round_money(product.pricing_basis() * factor)
    }

    /// Evaluate `rules` against `products` at instant `now`.
    ///
    /// Products without an expiration date and invalid snapshots are skipped; each product
    /// only sees its own store's rules. Output is ordered by product id.
    pub fn evaluate(
        &self,
        products: &[Product],
        rules: &[PricingRule],
        now: DateTime<Utc>,
    ) -> Vec<PriceChange> {
        let mut changes: Vec<PriceChange> = products
            .iter()
            .filter_map(|product| self.evaluate_product(product, rules, now))
            .collect();

        changes.sort_by_key(|c| c.product_id);
        changes
    }

    fn evaluate_product(
        &self,
        product: &Product,
        rules: &[PricingRule],
        now: DateTime<Utc>,
    ) -> Option<PriceChange> {
        if product.validate().is_err() {
            return None;
        }

        let days = product.days_until_expiry(now)?.max(0);
        let rule = Self::select_rule(rules, product.store_id, days)?;

        let new_price = Self::proposed_price(product, rule);
        if (new_price - product.price).abs() <= self.epsilon {
            return None;
        }

        Some(PriceChange {
            store_id: product.store_id,
            product_id: product.id,
            product_name: product.name.clone(),
            old_price: product.price,
            new_price,
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            discount_percentage: rule.discount_percentage,
            days_until_expiry: days,
        })
    }
}
