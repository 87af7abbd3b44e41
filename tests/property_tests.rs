//! Property-based tests for the invariants spec.md §8 names directly:
//! `SortedQuotes`/`OrderBook` ordering and sign invariants, the fee-factor
//! identity, and the effective-sell-price walk.

use proptest::prelude::*;
use rust_decimal::Decimal;

use arb_engine::model::order_book::OrderBook;
use arb_engine::model::quote::{Quote, Side, SortedQuotes};
use arb_engine::strategy::{combined_fee_factor, fee_as_factor};

/// Prices in whole cents, kept well away from `Decimal`'s overflow range.
fn arb_price() -> impl Strategy<Value = i64> {
    1i64..10_000_000i64
}

/// Quantities in satoshis.
fn arb_quantity() -> impl Strategy<Value = i64> {
    1i64..10_000_000i64
}

fn arb_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Bid), Just(Side::Ask)]
}

fn price_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn quantity_decimal(satoshi: i64) -> Decimal {
    Decimal::new(satoshi, 8)
}

proptest! {
    /// spec.md §8: "For every OrderBook side: prices are strictly monotone
    /// in index direction, quantities > 0."
    #[test]
    fn sorted_quotes_iterate_in_side_order_with_positive_quantities(
        side in arb_side(),
        levels in prop::collection::vec((arb_price(), arb_quantity()), 0..30),
    ) {
        let mut quotes = SortedQuotes::new(side);
        for &(price, qty) in &levels {
            quotes.set_quote(Quote {
                price: price_decimal(price),
                quantity: quantity_decimal(qty),
            });
        }

        let collected: Vec<Quote> = quotes.iter().collect();
        for quote in &collected {
            prop_assert!(quote.quantity > Decimal::ZERO);
        }
        for window in collected.windows(2) {
            match side {
                Side::Bid => prop_assert!(window[0].price > window[1].price),
                Side::Ask => prop_assert!(window[0].price < window[1].price),
            }
        }
        prop_assert_eq!(collected.len(), quotes.len());
    }

    /// spec.md §4.1 / §8: deleting an absent level is a silent no-op.
    #[test]
    fn zeroing_an_absent_level_is_a_no_op(
        side in arb_side(),
        existing_price in arb_price(),
        existing_qty in arb_quantity(),
        absent_price in arb_price(),
    ) {
        prop_assume!(existing_price != absent_price);

        let mut quotes = SortedQuotes::new(side);
        quotes.set_quote(Quote {
            price: price_decimal(existing_price),
            quantity: quantity_decimal(existing_qty),
        });
        let before: Vec<Quote> = quotes.iter().collect();

        quotes.set_quote(Quote {
            price: price_decimal(absent_price),
            quantity: Decimal::ZERO,
        });
        let after: Vec<Quote> = quotes.iter().collect();

        prop_assert_eq!(before, after);
    }

    /// spec.md §3: `set_quote` with quantity 0 always deletes the level,
    /// regardless of how many times it was previously set.
    #[test]
    fn zero_quantity_always_deletes_the_level(
        side in arb_side(),
        price in arb_price(),
        quantities in prop::collection::vec(arb_quantity(), 1..10),
    ) {
        let mut quotes = SortedQuotes::new(side);
        for &qty in &quantities {
            quotes.set_quote(Quote {
                price: price_decimal(price),
                quantity: quantity_decimal(qty),
            });
        }
        prop_assert_eq!(quotes.len(), 1);

        quotes.set_quote(Quote {
            price: price_decimal(price),
            quantity: Decimal::ZERO,
        });
        prop_assert!(quotes.is_empty());
    }

    /// spec.md §8: `calculate_effective_sell_price(Q, book)` equals
    /// `Σ (q_i/Q) × p_i` over a minimal prefix whose quantities sum to ≥ Q.
    #[test]
    fn effective_price_matches_hand_rolled_volume_weighted_average(
        levels in prop::collection::vec((arb_price(), arb_quantity()), 1..10),
        take_fraction in 1u32..100u32,
    ) {
        let mut book = OrderBook::new();
        let mut total_qty = Decimal::ZERO;
        for &(price, qty) in &levels {
            book.set_quote(
                Side::Bid,
                Quote {
                    price: price_decimal(price),
                    quantity: quantity_decimal(qty),
                },
            );
            total_qty += quantity_decimal(qty);
        }

        // Ask for a quantity the book (as deduplicated by price) can cover.
        let quantity = total_qty * Decimal::new(i64::from(take_fraction), 2);
        prop_assume!(quantity > Decimal::ZERO);

        if let Some(price) = book.effective_price(Side::Bid, quantity) {
            let mut remaining = quantity;
            let mut notional = Decimal::ZERO;
            for quote in book.bids().iter() {
                if remaining.is_zero() {
                    break;
                }
                let take = remaining.min(quote.quantity);
                notional += take * quote.price;
                remaining -= take;
            }
            prop_assert_eq!(remaining, Decimal::ZERO);
            prop_assert_eq!(price, notional / quantity);
        }
    }

    /// spec.md §8: `fee_factor(f) × (1 + f) = 1` within decimal precision.
    #[test]
    fn fee_factor_inverts_the_fee_rate(fee_bps in 0i64..10_000i64) {
        let fee = Decimal::new(fee_bps, 4);
        let factor = fee_as_factor(fee);
        let roundtrip = (factor * (Decimal::ONE + fee)).round_dp(12);
        prop_assert_eq!(roundtrip, Decimal::ONE);
    }

    /// The combined round-trip factor is always the product of its two
    /// independently-computed factors, regardless of fee magnitude.
    #[test]
    fn combined_fee_factor_is_the_product_of_its_parts(
        maker_bps in 0i64..10_000i64,
        taker_bps in 0i64..10_000i64,
    ) {
        let maker = Decimal::new(maker_bps, 4);
        let taker = Decimal::new(taker_bps, 4);
        let combined = combined_fee_factor(maker, taker);
        let expected = fee_as_factor(maker) * fee_as_factor(taker);
        prop_assert_eq!(combined, expected);
    }
}
