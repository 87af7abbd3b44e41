//! Actions the strategy issues against a venue, and their lifecycle.

use rust_decimal::Decimal;

use crate::model::order::{OrderId, OrderType};
use crate::model::quote::Side;

/// A unique, monotonically increasing identifier assigned to every action by
/// the issuing [`crate::coordinator::Coordinator`], mirroring the teacher's
/// `ActionStore` id counter.
pub type ActionId = u64;

/// What the strategy wants a venue to do. Tagged by variant rather than by a
/// trait object: unlike the wire-level `Action` trait a venue client
/// implements internally to serialize a request, this is plain strategy
/// output data that both venues interpret in their own way.
#[derive(Debug, Clone)]
pub enum Action {
    /// Place a new order.
    CreateOrder {
        /// Symbol to trade, e.g. `"BTC-USD"`.
        symbol: String,
        /// Buy or sell.
        side: Side,
        /// Limit or market.
        order_type: OrderType,
        /// Quantity to trade.
        amount: Decimal,
        /// Limit price; required iff `order_type == Limit`.
        price: Option<Decimal>,
    },
    /// Cancel a previously placed order.
    CancelOrder {
        /// The order to cancel.
        order_id: OrderId,
    },
}

/// Outcome of an [`Action`] once the venue has responded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// Submitted, awaiting venue acknowledgement.
    Pending,
    /// Venue accepted the action.
    Success,
    /// Venue rejected the action.
    Failed,
}

/// An action together with its dispatch id, current status, and (for a
/// `CreateOrder` that has succeeded) the venue-assigned order it produced.
/// This is the unit the owning venue client tracks in its
/// [`crate::model::exchange_state::ExchangeState`] while the action is in
/// flight, and the unit the strategy polls to learn how its own request was
/// received without mutating it directly (spec.md §3: "The strategy holds a
/// reference to inspect status transitions; it must not mutate.").
#[derive(Debug, Clone)]
pub struct ActionStore {
    /// Dispatch id, unique per run.
    pub id: ActionId,
    /// The action itself.
    pub action: Action,
    /// Current lifecycle status.
    pub status: ActionStatus,
    /// Venue-assigned order id, back-filled on a `CreateOrder` reaching
    /// `Success`. Always `None` for `CancelOrder` and for a `CreateOrder`
    /// that has not yet succeeded.
    pub result_order: Option<OrderId>,
}

impl ActionStore {
    /// A freshly dispatched, pending action.
    #[must_use]
    pub fn new(id: ActionId, action: Action) -> Self {
        Self {
            id,
            action,
            status: ActionStatus::Pending,
            result_order: None,
        }
    }
}
