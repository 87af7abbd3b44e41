//! Price-level book sides.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which side of the book a quote or order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Resting buy interest.
    Bid,
    /// Resting sell interest.
    Ask,
}

impl Side {
    /// The other side.
    #[must_use]
    pub fn opposite(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// A single price level update: `quantity == 0` deletes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    /// Price of the level, in units of 1 cent.
    pub price: Decimal,
    /// Quantity resting at this price, in units of 1 satoshi.
    pub quantity: Decimal,
}

/// One side of an order book: a price-ordered map of resting quantity.
///
/// Bids are iterated highest price first, asks lowest price first. Internally
/// both sides use the same ascending `BTreeMap<Decimal, Decimal>`; bids are
/// distinguished only by iterating in reverse, so there is a single source of
/// truth for "is this price on the book" regardless of side.
#[derive(Debug, Clone, Default)]
pub struct SortedQuotes {
    side: Option<Side>,
    levels: BTreeMap<Decimal, Decimal>,
}

impl SortedQuotes {
    /// Create an empty set of quotes for the given side.
    #[must_use]
    pub fn new(side: Side) -> Self {
        Self {
            side: Some(side),
            levels: BTreeMap::new(),
        }
    }

    /// Apply a quote update. A quantity of zero removes the level; a
    /// positive quantity inserts or replaces it. Prices must be strictly
    /// positive and quantities non-negative, but this is not re-validated
    /// here: the venue clients are the single writer and are responsible for
    /// rejecting malformed wire data before it reaches the book.
    pub fn set_quote(&mut self, quote: Quote) {
        if quote.quantity.is_zero() {
            self.levels.remove(&quote.price);
        } else {
            self.levels.insert(quote.price, quote.quantity);
        }
    }

    /// The best (first) quote on this side, if any.
    #[must_use]
    pub fn best(&self) -> Option<Quote> {
        self.iter().next()
    }

    /// Number of distinct price levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether there are no resting levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Iterate quotes in priority order: descending price for bids, ascending
    /// for asks.
    pub fn iter(&self) -> Box<dyn DoubleEndedIterator<Item = Quote> + '_> {
        let mapped = self
            .levels
            .iter()
            .map(|(&price, &quantity)| Quote { price, quantity });

        match self.side {
            Some(Side::Bid) => Box::new(mapped.rev()),
            _ => Box::new(mapped),
        }
    }
}
