//! Two-sided order book with a one-shot readiness gate.

use rust_decimal::Decimal;

use crate::model::quote::{Quote, Side, SortedQuotes};

/// A venue's level-2 order book. `ready` becomes `true` exactly once, when
/// the client has applied the initial snapshot (or, for venues without a
/// snapshot message, the first fully-consistent update batch); it is never
/// reset to `false` afterwards except by a full client restart, which
/// replaces the `OrderBook` wholesale rather than mutating this flag.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: SortedQuotes,
    asks: SortedQuotes,
    ready: bool,
}

impl OrderBook {
    /// An empty, not-yet-ready book.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bids: SortedQuotes::new(Side::Bid),
            asks: SortedQuotes::new(Side::Ask),
            ready: false,
        }
    }

    /// Resting bids, highest price first.
    #[must_use]
    pub fn bids(&self) -> &SortedQuotes {
        &self.bids
    }

    /// Resting asks, lowest price first.
    #[must_use]
    pub fn asks(&self) -> &SortedQuotes {
        &self.asks
    }

    /// Apply a quote update to the given side.
    pub fn set_quote(&mut self, side: Side, quote: Quote) {
        match side {
            Side::Bid => self.bids.set_quote(quote),
            Side::Ask => self.asks.set_quote(quote),
        }
    }

    /// Mark the book ready. Idempotent.
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Whether the book has received a consistent initial view.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Highest resting bid price, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<Quote> {
        self.bids.best()
    }

    /// Lowest resting ask price, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<Quote> {
        self.asks.best()
    }

    /// Volume-weighted average price of filling `quantity` by walking the
    /// book on `side` (the side being *taken*: `Side::Ask` to price a market
    /// buy, `Side::Bid` to price a market sell). Returns `None` if the book
    /// cannot supply `quantity` at all, in which case the caller has no
    /// executable price and must not act.
    #[must_use]
    pub fn effective_price(&self, side: Side, quantity: Decimal) -> Option<Decimal> {
        let levels: Box<dyn Iterator<Item = Quote>> = match side {
            Side::Bid => Box::new(self.bids.iter()),
            Side::Ask => Box::new(self.asks.iter()),
        };

        let mut remaining = quantity;
        let mut notional = Decimal::ZERO;

        for level in levels {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(level.quantity);
            notional += take * level.price;
            remaining -= take;
        }

        if remaining.is_zero() {
            Some(notional / quantity)
        } else {
            None
        }
    }
}
