use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shelflife_core::{DomainError, DomainResult, Entity, Money, ProductId, StoreId};

const SECONDS_PER_DAY: i64 = 86_400;

/// Product snapshot as supplied by the inventory subsystem.
///
/// The engine only ever proposes a new `price`; every other field is read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub store_id: StoreId,
    pub name: String,
    /// Current shelf price (possibly already discounted).
    pub price: Money,
    /// Undiscounted price; discounts are computed from this when known.
    pub original_price: Option<Money>,
    pub quantity: u32,
    pub category: String,
    pub expiration_date: Option<DateTime<Utc>>,
}

impl Product {
    pub fn new(store_id: StoreId, name: impl Into<String>, price: Money, quantity: u32) -> Self {
        Self {
            id: ProductId::new(),
            store_id,
            name: name.into(),
            price,
            original_price: Some(price),
            quantity,
            category: String::new(),
            expiration_date: None,
        }
    }

    pub fn with_id(mut self, id: ProductId) -> Self {
        self.id = id;
        self
    }

    pub fn with_original_price(mut self, original_price: Option<Money>) -> Self {
        self.original_price = original_price;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_expiration(mut self, expiration_date: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration_date);
        self
    }

    /// Whole days until expiry, floored (`None` when the product does not expire).
    ///
    /// Not clamped: an expired product yields a negative number.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiration_date
            .map(|exp| (exp - now).num_seconds().div_euclid(SECONDS_PER_DAY))
    }

    /// Price the discount is computed from.
    pub fn pricing_basis(&self) -> Money {
        match self.original_price {
            Some(p) if p > Decimal::ZERO => p,
            _ => self.price,
        }
    }

    /// Boundary validation for snapshots coming from the inventory store.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid_product("product name cannot be empty"));
        }
        if self.price.is_sign_negative() {
            return Err(DomainError::invalid_product(format!(
                "product {} has a negative price",
                self.id
            )));
        }
        if self.original_price.is_some_and(|p| p.is_sign_negative()) {
            return Err(DomainError::invalid_product(format!(
                "product {} has a negative original price",
                self.id
            )));
        }
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn store_id(&self) -> StoreId {
        self.store_id
    }
}
