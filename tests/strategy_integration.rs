//! Integration tests driving the strategy against an in-memory stand-in for
//! a venue client, exercising the seeded scenarios from spec.md §8 without
//! needing a live websocket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arb_engine::config::StrategyConfig;
use arb_engine::error::EngineError;
use arb_engine::model::action::{Action, ActionId, ActionStatus};
use arb_engine::model::balance::BalanceEntry;
use arb_engine::model::exchange_state::ExchangeState;
use arb_engine::model::order::{Order, OrderStatus, OrderType};
use arb_engine::model::quote::{Quote, Side};
use arb_engine::strategy::ArbitrageStrategy;
use arb_engine::venue::VenueClient;
use async_trait::async_trait;
use rust_decimal_macros::dec;
use tokio::sync::RwLock;

#[derive(Debug)]
struct FakeVenue {
    id: &'static str,
    state: Arc<RwLock<ExchangeState>>,
    next_id: AtomicU64,
    submitted: tokio::sync::Mutex<Vec<Action>>,
}

impl FakeVenue {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            state: Arc::new(RwLock::new(ExchangeState::new(id))),
            next_id: AtomicU64::new(0),
            submitted: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VenueClient for FakeVenue {
    fn venue_id(&self) -> &'static str {
        self.id
    }

    fn state(&self) -> Arc<RwLock<ExchangeState>> {
        Arc::clone(&self.state)
    }

    async fn run(&self) -> Result<(), EngineError> {
        std::future::pending().await
    }

    async fn submit_action(&self, action: Action) -> Result<ActionId, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.write().await.track_action(id, action.clone());
        self.submitted.lock().await.push(action);
        Ok(id)
    }
}

fn strategy_config() -> StrategyConfig {
    StrategyConfig {
        bid_amount: dec!(1.0),
        profit_target: dec!(0.10),
        order_update_threshold: dec!(0.005),
        poll_period: Duration::from_secs(1),
    }
}

/// Seeds both venues with ready books and enough USD balance on the buy
/// venue that a new bid can always be sized at the full configured amount.
async fn seed_ready_books(venue_a: &FakeVenue, venue_b: &FakeVenue) {
    let mut a = venue_a.state.write().await;
    a.order_book.set_quote(
        Side::Ask,
        Quote {
            price: dec!(25000),
            quantity: dec!(5.0),
        },
    );
    a.order_book.mark_ready();
    a.balance.set(
        "USD",
        BalanceEntry {
            free: dec!(100000),
            on_hold: dec!(0),
        },
    );
    drop(a);

    let mut b = venue_b.state.write().await;
    b.order_book.set_quote(
        Side::Bid,
        Quote {
            price: dec!(20000),
            quantity: dec!(5.0),
        },
    );
    b.order_book.mark_ready();
}

/// Marks action 0 (the first `CreateOrder` any of these tests submits) as
/// accepted, tying it to a freshly created resting order on `venue_a`.
async fn accept_resting_bid(venue_a: &FakeVenue, order_id: &str, bid_price: rust_decimal::Decimal) {
    let mut a = venue_a.state.write().await;
    let order = Order::new_pending(
        order_id.to_owned(),
        "BTC-USD",
        Side::Bid,
        OrderType::Limit,
        dec!(1.0),
        Some(bid_price),
    );
    a.set_order(order);
    a.set_action_result_order(0, order_id.to_owned());
    a.set_action_status(0, ActionStatus::Success);
}

fn submitted_bid_price(submitted: &[Action]) -> rust_decimal::Decimal {
    match &submitted[0] {
        Action::CreateOrder { price, .. } => price.unwrap(),
        Action::CancelOrder { .. } => panic!("expected a CreateOrder action"),
    }
}

#[tokio::test]
async fn strategy_skips_until_both_books_are_ready() {
    let venue_a = Arc::new(FakeVenue::new("venue_a"));
    let venue_b = Arc::new(FakeVenue::new("venue_b"));
    let strategy = ArbitrageStrategy::new(
        Arc::clone(&venue_a) as Arc<dyn VenueClient>,
        Arc::clone(&venue_b) as Arc<dyn VenueClient>,
        strategy_config(),
    );

    strategy.tick().await.unwrap();
    assert!(venue_a.submitted.lock().await.is_empty());
}

#[tokio::test]
async fn strategy_issues_a_bid_once_both_books_are_ready_and_balance_suffices() {
    let venue_a = Arc::new(FakeVenue::new("venue_a"));
    let venue_b = Arc::new(FakeVenue::new("venue_b"));
    seed_ready_books(&venue_a, &venue_b).await;

    let strategy = ArbitrageStrategy::new(
        Arc::clone(&venue_a) as Arc<dyn VenueClient>,
        Arc::clone(&venue_b) as Arc<dyn VenueClient>,
        strategy_config(),
    );

    strategy.tick().await.unwrap();

    let submitted = venue_a.submitted.lock().await;
    assert_eq!(submitted.len(), 1);
    match &submitted[0] {
        Action::CreateOrder { side, price, .. } => {
            assert_eq!(*side, Side::Bid);
            assert!(price.unwrap() < dec!(20000));
        }
        Action::CancelOrder { .. } => panic!("expected a CreateOrder action"),
    }
}

#[tokio::test]
async fn strategy_declines_to_issue_a_bid_that_would_cross_the_best_ask() {
    let venue_a = Arc::new(FakeVenue::new("venue_a"));
    let venue_b = Arc::new(FakeVenue::new("venue_b"));

    {
        let mut a = venue_a.state.write().await;
        // Best ask far below what the hedge venue would require, so the
        // computed bid price would cross it.
        a.order_book.set_quote(
            Side::Ask,
            Quote {
                price: dec!(1),
                quantity: dec!(5.0),
            },
        );
        a.order_book.mark_ready();
        a.balance.set(
            "USD",
            BalanceEntry {
                free: dec!(100000),
                on_hold: dec!(0),
            },
        );
    }
    {
        let mut b = venue_b.state.write().await;
        b.order_book.set_quote(
            Side::Bid,
            Quote {
                price: dec!(20000),
                quantity: dec!(5.0),
            },
        );
        b.order_book.mark_ready();
    }

    let strategy = ArbitrageStrategy::new(
        Arc::clone(&venue_a) as Arc<dyn VenueClient>,
        Arc::clone(&venue_b) as Arc<dyn VenueClient>,
        strategy_config(),
    );

    let result = strategy.tick().await;
    assert!(matches!(result, Err(EngineError::StrategyContract(_))));
}

#[tokio::test]
async fn strategy_does_not_issue_a_second_bid_while_the_first_is_pending() {
    let venue_a = Arc::new(FakeVenue::new("venue_a"));
    let venue_b = Arc::new(FakeVenue::new("venue_b"));
    seed_ready_books(&venue_a, &venue_b).await;

    let strategy = ArbitrageStrategy::new(
        Arc::clone(&venue_a) as Arc<dyn VenueClient>,
        Arc::clone(&venue_b) as Arc<dyn VenueClient>,
        strategy_config(),
    );

    // The action stays Pending (nothing advances it to Success), so a
    // second tick must not submit another bid.
    strategy.tick().await.unwrap();
    strategy.tick().await.unwrap();

    assert_eq!(venue_a.submitted.lock().await.len(), 1);
}

#[tokio::test]
async fn strategy_hedges_incremental_fills_and_resets_after_full_fill() {
    let venue_a = Arc::new(FakeVenue::new("venue_a"));
    let venue_b = Arc::new(FakeVenue::new("venue_b"));
    seed_ready_books(&venue_a, &venue_b).await;

    let strategy = ArbitrageStrategy::new(
        Arc::clone(&venue_a) as Arc<dyn VenueClient>,
        Arc::clone(&venue_b) as Arc<dyn VenueClient>,
        strategy_config(),
    );

    strategy.tick().await.unwrap();
    let bid_price = submitted_bid_price(&venue_a.submitted.lock().await);
    accept_resting_bid(&venue_a, "order-1", bid_price).await;

    {
        let mut a = venue_a.state.write().await;
        let order = a.orders.get_mut("order-1").unwrap();
        order.apply_fill(dec!(0.4), bid_price);
    }
    strategy.tick().await.unwrap();
    {
        let submitted = venue_b.submitted.lock().await;
        assert_eq!(submitted.len(), 1);
        match &submitted[0] {
            Action::CreateOrder {
                side,
                amount,
                order_type,
                ..
            } => {
                assert_eq!(*side, Side::Ask);
                assert_eq!(*order_type, OrderType::Market);
                assert_eq!(*amount, dec!(0.4));
            }
            Action::CancelOrder { .. } => panic!("expected a CreateOrder action"),
        }
    }

    {
        let mut a = venue_a.state.write().await;
        let order = a.orders.get_mut("order-1").unwrap();
        order.apply_fill(dec!(0.6), bid_price);
    }
    strategy.tick().await.unwrap();
    {
        let submitted = venue_b.submitted.lock().await;
        assert_eq!(submitted.len(), 2);
        match &submitted[1] {
            Action::CreateOrder { amount, .. } => assert_eq!(*amount, dec!(0.6)),
            Action::CancelOrder { .. } => panic!("expected a CreateOrder action"),
        }
    }

    // The bid is now fully filled and reset; a later tick issues a fresh one.
    strategy.tick().await.unwrap();
    assert_eq!(venue_a.submitted.lock().await.len(), 2);
}

#[tokio::test]
async fn strategy_cancels_the_resting_bid_when_profit_factor_drifts_past_threshold() {
    let venue_a = Arc::new(FakeVenue::new("venue_a"));
    let venue_b = Arc::new(FakeVenue::new("venue_b"));
    seed_ready_books(&venue_a, &venue_b).await;

    let strategy = ArbitrageStrategy::new(
        Arc::clone(&venue_a) as Arc<dyn VenueClient>,
        Arc::clone(&venue_b) as Arc<dyn VenueClient>,
        strategy_config(),
    );

    strategy.tick().await.unwrap();
    let bid_price = submitted_bid_price(&venue_a.submitted.lock().await);
    accept_resting_bid(&venue_a, "order-1", bid_price).await;

    // The hedge venue's top bid collapses well past the re-pricing threshold.
    {
        let mut b = venue_b.state.write().await;
        b.order_book.set_quote(
            Side::Bid,
            Quote {
                price: dec!(20000),
                quantity: dec!(0),
            },
        );
        b.order_book.set_quote(
            Side::Bid,
            Quote {
                price: dec!(14000),
                quantity: dec!(5.0),
            },
        );
    }

    strategy.tick().await.unwrap();

    let submitted = venue_a.submitted.lock().await;
    assert_eq!(submitted.len(), 2);
    match &submitted[1] {
        Action::CancelOrder { order_id } => assert_eq!(order_id, "order-1"),
        Action::CreateOrder { .. } => panic!("expected a CancelOrder action"),
    }
}

#[tokio::test]
async fn strategy_treats_an_unrequested_cancellation_as_fatal() {
    let venue_a = Arc::new(FakeVenue::new("venue_a"));
    let venue_b = Arc::new(FakeVenue::new("venue_b"));
    seed_ready_books(&venue_a, &venue_b).await;

    let strategy = ArbitrageStrategy::new(
        Arc::clone(&venue_a) as Arc<dyn VenueClient>,
        Arc::clone(&venue_b) as Arc<dyn VenueClient>,
        strategy_config(),
    );

    strategy.tick().await.unwrap();
    let bid_price = submitted_bid_price(&venue_a.submitted.lock().await);

    {
        let mut a = venue_a.state.write().await;
        let mut order = Order::new_pending(
            "order-1".to_owned(),
            "BTC-USD",
            Side::Bid,
            OrderType::Limit,
            dec!(1.0),
            Some(bid_price),
        );
        // Cancelled by the venue without us ever requesting it: nothing in
        // `a.actions` is a pending CancelOrder for this order.
        order.status = OrderStatus::Cancelled;
        a.set_order(order);
        a.set_action_result_order(0, "order-1".to_owned());
        a.set_action_status(0, ActionStatus::Success);
    }

    let result = strategy.tick().await;
    assert!(matches!(result, Err(EngineError::StrategyContract(_))));
}
