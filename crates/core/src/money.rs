//! Money arithmetic on `rust_decimal::Decimal`.
//!
//! Prices are kept as exact decimals; rounding to the currency minor unit happens once,
//! at the point a price is proposed or a value is reported.

use rust_decimal::{Decimal, RoundingStrategy};

/// Currency amount. Always non-negative for shelf prices.
pub type Money = Decimal;

/// Minor unit precision (cents).
pub const MONEY_DECIMAL_PLACES: u32 = 2;

/// Round to the minor unit, half-up (midpoint away from zero).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_up() {
        assert_eq!(round_money(dec!(1.005)), dec!(1.01));
        assert_eq!(round_money(dec!(1.004)), dec!(1.00));
        assert_eq!(round_money(dec!(7.125)), dec!(7.13));
    }

    #[test]
    fn keeps_two_places() {
        assert_eq!(round_money(dec!(6)).to_string(), "6");
        assert_eq!(round_money(dec!(5.999)), dec!(6.00));
    }
}
