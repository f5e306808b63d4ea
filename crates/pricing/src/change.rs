use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shelflife_core::{Money, ProductId, RuleId, StoreId};

/// A proposed price mutation produced by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    pub store_id: StoreId,
    pub product_id: ProductId,
    pub product_name: String,
    pub old_price: Money,
    pub new_price: Money,
    pub rule_id: RuleId,
    pub rule_name: String,
    pub discount_percentage: Decimal,
    /// Clamped to zero for expired products.
    pub days_until_expiry: i64,
}

impl PriceChange {
    /// Audit annotation stored next to the product price.
    pub fn annotation(&self) -> String {
        format!(
            "auto-discount:{}%:{}",
            self.discount_percentage.normalize(),
            self.rule_name
        )
    }
}
