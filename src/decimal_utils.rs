//! Exact rounding rules for money and quantity, grounded on the original
//! project's satoshi/cent constants.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// The smallest unit a quantity may be expressed in: one hundred-millionth
/// of a BTC.
pub const ONE_SATOSHI: Decimal = dec!(0.00000001);

/// The smallest unit a USD price may be expressed in.
pub const ONE_CENT: Decimal = dec!(0.01);

/// Round a BTC quantity to the nearest satoshi, half rounds up.
#[must_use]
pub fn round_to_satoshi(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(8, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a USD price to the nearest cent, half rounds up.
#[must_use]
pub fn round_to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a USD price down to the nearest cent. Used when computing how much
/// BTC a given USD balance can afford, so the engine never rounds up into an
/// order it cannot actually pay for.
#[must_use]
pub fn round_down_to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Round a BTC quantity down to three decimal places, the affordability
/// convention used when sizing a hedge order against a USD balance.
#[must_use]
pub fn round_down_to_milli_btc(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(3, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_satoshi_rounds_up() {
        let value = Decimal::new(5, 9); // 0.000000005
        assert_eq!(round_to_satoshi(value), ONE_SATOSHI);
    }

    #[test]
    fn half_cent_rounds_up() {
        let value = Decimal::new(5, 3); // 0.005
        assert_eq!(round_to_cents(value), ONE_CENT / dec!(2) + ONE_CENT / dec!(2));
    }

    #[test]
    fn round_down_to_cents_truncates() {
        let value = Decimal::new(1299, 3); // 1.299
        assert_eq!(round_down_to_cents(value), Decimal::new(129, 2));
    }
}
