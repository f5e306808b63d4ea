//! Expiration-driven pricing rules and the rule engine.
//!
//! Pure, deterministic decision logic: given product snapshots, a rule set and a clock
//! reading, propose price changes. Persisting them and telling external systems is the
//! job of `shelflife-infra`.

pub mod change;
pub mod engine;
pub mod rule;

pub use change::PriceChange;
pub use engine::{PricingEngine, DEFAULT_PRICE_EPSILON};
pub use rule::{default_rules, find_overlaps, PricingRule, RuleCondition, RuleOverlap, RuleType};
