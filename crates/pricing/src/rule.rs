use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shelflife_core::{DomainError, DomainResult, Entity, RuleId, StoreId};

/// Kind of pricing rule. Only expiration bands exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Expiration,
}

/// Day band `[min_days, max_days)`; `max_days = None` is unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleCondition {
    pub min_days: i64,
    pub max_days: Option<i64>,
}

impl RuleCondition {
    pub fn new(min_days: i64, max_days: Option<i64>) -> Self {
        Self { min_days, max_days }
    }

    pub fn contains(&self, days: i64) -> bool {
        days >= self.min_days && self.max_days.is_none_or(|max| days < max)
    }

    pub fn overlaps(&self, other: &RuleCondition) -> bool {
        let lo = self.min_days.max(other.min_days);
        match (self.max_days, other.max_days) {
            (None, None) => true,
            (Some(a), None) | (None, Some(a)) => lo < a,
            (Some(a), Some(b)) => lo < a.min(b),
        }
    }
}

/// Operator-configured discount band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: RuleId,
    pub store_id: StoreId,
    pub name: String,
    pub rule_type: RuleType,
    pub condition: RuleCondition,
    /// Percentage in `[0, 100]`.
    pub discount_percentage: Decimal,
    pub is_active: bool,
}

impl PricingRule {
    pub fn expiration(
        store_id: StoreId,
        name: impl Into<String>,
        condition: RuleCondition,
        discount_percentage: Decimal,
    ) -> Self {
        Self {
            id: RuleId::new(),
            store_id,
            name: name.into(),
            rule_type: RuleType::Expiration,
            condition,
            discount_percentage,
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether this rule takes part in expiration-band selection.
    pub fn applies_to_expiration(&self) -> bool {
        self.is_active && self.rule_type == RuleType::Expiration
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid_rule("rule name cannot be empty"));
        }
        if self.discount_percentage < Decimal::ZERO || self.discount_percentage > Decimal::ONE_HUNDRED {
            return Err(DomainError::invalid_rule(format!(
                "rule '{}': discount_percentage must be within 0..=100, got {}",
                self.name, self.discount_percentage
            )));
        }
        if self.condition.min_days < 0 {
            return Err(DomainError::invalid_rule(format!(
                "rule '{}': min_days must be >= 0",
                self.name
            )));
        }
        if let Some(max) = self.condition.max_days {
            if max <= self.condition.min_days {
                return Err(DomainError::invalid_rule(format!(
                    "rule '{}': max_days ({max}) must be greater than min_days ({})",
                    self.name, self.condition.min_days
                )));
            }
        }
        Ok(())
    }
}

impl Entity for PricingRule {
    type Id = RuleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn store_id(&self) -> StoreId {
        self.store_id
    }
}

/// Rule set seeded for a store that has not configured any rules.
pub fn default_rules(store_id: StoreId) -> Vec<PricingRule> {
    vec![
        PricingRule::expiration(store_id, "1 day or less", RuleCondition::new(0, Some(2)), Decimal::from(40)),
        PricingRule::expiration(store_id, "2-3 days", RuleCondition::new(2, Some(4)), Decimal::from(25)),
        PricingRule::expiration(store_id, "4-7 days", RuleCondition::new(4, Some(8)), Decimal::from(10)),
        PricingRule::expiration(store_id, "more than 7 days", RuleCondition::new(8, None), Decimal::ZERO),
    ]
}

/// Two active rules whose day bands intersect (a configuration bug).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOverlap {
    pub first: RuleId,
    pub first_name: String,
    pub second: RuleId,
    pub second_name: String,
}

/// Report every overlapping pair of active expiration rules.
pub fn find_overlaps(rules: &[PricingRule]) -> Vec<RuleOverlap> {
    let active: Vec<&PricingRule> = rules.iter().filter(|r| r.applies_to_expiration()).collect();
    let mut overlaps = Vec::new();
    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            if a.condition.overlaps(&b.condition) {
                overlaps.push(RuleOverlap {
                    first: a.id,
                    first_name: a.name.clone(),
                    second: b.id,
                    second_name: b.name.clone(),
                });
            }
        }
    }
    overlaps
}
