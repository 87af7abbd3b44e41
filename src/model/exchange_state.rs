//! The single piece of mutable state a venue client owns and publishes.

use std::collections::HashMap;

use crate::model::action::{Action, ActionId, ActionStatus, ActionStore};
use crate::model::balance::Balance;
use crate::model::order::{Order, OrderId};
use crate::model::order_book::OrderBook;
use crate::model::publisher::Publisher;

/// Everything known about one venue: its book, its open/closed orders, its
/// balances, the in-flight actions it is executing on the strategy's behalf,
/// and the publisher that announces changes to any of them.
///
/// Single-writer discipline: only the venue client that owns this state
/// mutates it (through `&mut self` methods below); the strategy and any
/// diagnostics code hold it behind a [`tokio::sync::RwLock`] and only ever
/// take the read lock. See spec.md §5.
#[derive(Debug)]
pub struct ExchangeState {
    /// Which venue this state belongs to, e.g. `"venue_a"`.
    pub venue_id: &'static str,
    /// The venue's level-2 order book.
    pub order_book: OrderBook,
    /// Orders we have placed, keyed by venue-assigned id.
    pub orders: HashMap<OrderId, Order>,
    /// Balances by currency.
    pub balance: Balance,
    /// Actions dispatched to this venue, keyed by dispatch id, tracked from
    /// submission through to `Success`/`Failed`.
    pub actions: HashMap<ActionId, ActionStore>,
    /// Fires after every batch of applied updates.
    pub update_publisher: Publisher,
}

impl ExchangeState {
    /// A fresh, empty state for `venue_id`.
    #[must_use]
    pub fn new(venue_id: &'static str) -> Self {
        Self {
            venue_id,
            order_book: OrderBook::new(),
            orders: HashMap::new(),
            balance: Balance::new(),
            actions: HashMap::new(),
            update_publisher: Publisher::new(),
        }
    }

    /// Insert or replace the tracked order.
    pub fn set_order(&mut self, order: Order) {
        self.orders.insert(order.id.clone(), order);
    }

    /// Look up a tracked order by id.
    #[must_use]
    pub fn order(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// Begin tracking a freshly dispatched action in `Pending` status.
    pub fn track_action(&mut self, id: ActionId, action: Action) {
        self.actions.insert(id, ActionStore::new(id, action));
    }

    /// Look up a tracked action by dispatch id.
    #[must_use]
    pub fn action(&self, id: ActionId) -> Option<&ActionStore> {
        self.actions.get(&id)
    }

    /// Advance a tracked action's status. A no-op if the id is unknown,
    /// which should not happen for an id this venue itself minted.
    pub fn set_action_status(&mut self, id: ActionId, status: ActionStatus) {
        if let Some(store) = self.actions.get_mut(&id) {
            store.status = status;
        }
    }

    /// Back-fill the venue-assigned order produced by a `CreateOrder` that
    /// just succeeded.
    pub fn set_action_result_order(&mut self, id: ActionId, order_id: OrderId) {
        if let Some(store) = self.actions.get_mut(&id) {
            store.result_order = Some(order_id);
        }
    }

    /// Find the dispatch id of a still-pending `CancelOrder` action targeting
    /// `order_id`, used to decide whether a venue-reported cancellation was
    /// requested by us (spec.md §4.3/§4.2's "cancelled without our request is
    /// fatal" rule) or not.
    #[must_use]
    pub fn pending_cancel_action(&self, order_id: &str) -> Option<ActionId> {
        self.actions.iter().find_map(|(id, store)| {
            let is_match = matches!(
                &store.action,
                Action::CancelOrder { order_id: target } if target == order_id
            );
            (is_match && store.status == ActionStatus::Pending).then_some(*id)
        })
    }

    /// Reset the book, orders and tracked actions while keeping the venue
    /// id, used when a client reconnects after a protocol violation and must
    /// rebuild its view of the world from scratch rather than patch a
    /// possibly inconsistent one.
    pub fn reset(&mut self) {
        self.order_book = OrderBook::new();
        self.orders.clear();
        self.actions.clear();
    }
}
