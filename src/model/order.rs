//! Orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::quote::Side;

/// Venue-assigned order identifier. Both venues hand back string ids (a
/// GDAX-style UUID or a Gemini-style integer-as-string), so this is a
/// newtype over `String` rather than an integer.
pub type OrderId = String;

/// Whether an order rests on the book until filled or executes immediately
/// against whatever liquidity is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Resting order at a specified price.
    Limit,
    /// Immediate execution against the book; no price is stored.
    Market,
}

/// Lifecycle status of an order. `Cancelled`, `Filled` and `Rejected` are
/// terminal: once an order reaches one of them it is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted by us, not yet acknowledged by the venue.
    Pending,
    /// Acknowledged by the venue and resting (or, for IOC, momentarily live).
    Open,
    /// Some but not all of the amount has been filled.
    PartiallyFilled,
    /// Fully filled. Terminal.
    Filled,
    /// Cancelled before being fully filled. Terminal.
    Cancelled,
    /// Rejected by the venue before ever being open. Terminal.
    Rejected,
}

impl OrderStatus {
    /// Whether this status will never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// An order as tracked in [`crate::model::exchange_state::ExchangeState`].
///
/// Invariant: `amount == filled + remaining` always holds; venue clients
/// must update `filled` and `remaining` together.
#[derive(Debug, Clone)]
pub struct Order {
    /// Venue-assigned identifier.
    pub id: OrderId,
    /// Traded symbol, e.g. `"BTC-USD"`.
    pub symbol: String,
    /// Buy or sell.
    pub side: Side,
    /// Limit or market.
    pub order_type: OrderType,
    /// Total quantity requested.
    pub amount: Decimal,
    /// Limit price; `Some` iff `order_type == Limit`.
    pub price: Option<Decimal>,
    /// Quantity executed so far.
    pub filled: Decimal,
    /// Quantity not yet executed.
    pub remaining: Decimal,
    /// Quantity-weighted average fill price, once any fill has occurred.
    pub average_price: Option<Decimal>,
    /// Current lifecycle status.
    pub status: OrderStatus,
}

impl Order {
    /// A new, unacknowledged order in `Pending` status with nothing filled.
    #[must_use]
    pub fn new_pending(
        id: OrderId,
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            side,
            order_type,
            amount,
            price,
            filled: Decimal::ZERO,
            remaining: amount,
            average_price: None,
            status: OrderStatus::Pending,
        }
    }

    /// Record a fill of `quantity` at `price`, updating `filled`/`remaining`
    /// and the running average fill price, and advancing status to
    /// `Filled` or `PartiallyFilled` as appropriate.
    pub fn apply_fill(&mut self, quantity: Decimal, price: Decimal) {
        let prior_notional = self.average_price.unwrap_or(Decimal::ZERO) * self.filled;
        self.filled += quantity;
        self.remaining -= quantity;
        if !self.filled.is_zero() {
            self.average_price = Some((prior_notional + quantity * price) / self.filled);
        }
        self.status = if self.remaining.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn amount_equals_filled_plus_remaining_after_partial_fill() {
        let mut order = Order::new_pending(
            "1".to_owned(),
            "BTC-USD",
            Side::Bid,
            OrderType::Limit,
            dec!(1.0),
            Some(dec!(20000)),
        );
        order.apply_fill(dec!(0.4), dec!(20000));
        assert_eq!(order.amount, order.filled + order.remaining);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);

        order.apply_fill(dec!(0.6), dec!(20010));
        assert_eq!(order.amount, order.filled + order.remaining);
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.status.is_terminal());
    }
}
