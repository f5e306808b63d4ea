//! Errors raised by the pricing and sync domain types.

use thiserror::Error;

use crate::id::SyncItemId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Rejections raised by domain values and state machines.
///
/// Storage and transport failures never show up here; each layer wraps these in its
/// own error type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A product snapshot is unusable for pricing (empty name, negative price).
    #[error("invalid product: {0}")]
    InvalidProduct(String),

    /// A pricing rule has an empty name, a bad day band or a discount outside 0..=100.
    #[error("invalid pricing rule: {0}")]
    InvalidRule(String),

    /// A product was paired with itself for correlation.
    #[error("invalid product pair: {0}")]
    InvalidPair(String),

    #[error("malformed {kind}: {reason}")]
    MalformedId { kind: &'static str, reason: String },

    /// A sync item was asked for a move its lifecycle does not allow.
    #[error("sync item {item} cannot move from {from} to {to}")]
    IllegalTransition {
        item: SyncItemId,
        from: &'static str,
        to: &'static str,
    },

    /// A sync item has used every attempt it is allowed.
    #[error("sync item {item} exhausted its {max_attempts} attempts")]
    AttemptsExhausted { item: SyncItemId, max_attempts: u32 },
}

impl DomainError {
    pub fn invalid_product(msg: impl Into<String>) -> Self {
        Self::InvalidProduct(msg.into())
    }

    pub fn invalid_rule(msg: impl Into<String>) -> Self {
        Self::InvalidRule(msg.into())
    }
}
