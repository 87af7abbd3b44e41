//! The arbitrage strategy: a resting bid on one venue, hedged incrementally
//! against fills by taking liquidity on the other venue, re-priced as the
//! hedge venue's book moves.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, trace, warn};

use crate::config::StrategyConfig;
use crate::decimal_utils::{round_down_to_cents, round_down_to_milli_btc};
use crate::error::EngineError;
use crate::model::action::{Action, ActionId, ActionStatus};
use crate::model::order::{Order, OrderStatus, OrderType};
use crate::model::quote::Side;
use crate::venue::{fees, MarketSpread, VenueClient};

/// `1 / (1 + fee)`: the fraction of a transaction's value that survives a
/// fee charged as a percentage of the transaction.
#[must_use]
pub fn fee_as_factor(fee: Decimal) -> Decimal {
    Decimal::ONE / (Decimal::ONE + fee)
}

/// The inverse of [`fee_as_factor`]: given the surviving fraction of a
/// transaction, the fee rate that produced it.
#[must_use]
pub fn fee_as_percentage(fee_factor: Decimal) -> Decimal {
    (Decimal::ONE - fee_factor) / fee_factor
}

/// The combined round-trip survival factor of buying (paying the maker fee)
/// on one venue and selling (paying the taker fee) on the other.
#[must_use]
pub fn combined_fee_factor(buy_maker_fee: Decimal, sell_taker_fee: Decimal) -> Decimal {
    fee_as_factor(buy_maker_fee) * fee_as_factor(sell_taker_fee)
}

/// The highest bid price that still nets at least `profit_target` given the
/// combined fee factor and the hedge venue's effective sell price `s` for
/// the quantity the strategy intends to trade.
#[must_use]
pub fn calculate_bid_limit_price(
    combined_fee_factor: Decimal,
    effective_sell_price: Decimal,
    profit_target: Decimal,
) -> Decimal {
    combined_fee_factor * effective_sell_price / (Decimal::ONE + profit_target)
}

/// Runs the per-tick arbitrage algorithm of spec.md §4.5 against a buy venue
/// (where the resting bid lives) and a sell venue (hedged against).
///
/// Holds exactly one resting bid at a time, tracked by the dispatch id of the
/// `CreateOrder` action that placed it rather than by the order itself, so a
/// tick that lands between submission and venue acknowledgement can tell
/// "awaiting acknowledgement" apart from "no bid exists" and never double-
/// submits.
#[derive(Debug)]
pub struct ArbitrageStrategy {
    buy_venue: Arc<dyn VenueClient>,
    sell_venue: Arc<dyn VenueClient>,
    config: StrategyConfig,
    /// Dispatch id of the in-flight or resting `CreateOrder` action, if any.
    live_limit_action: Mutex<Option<ActionId>>,
    /// Dispatch id of the in-flight `CancelOrder` action against the resting
    /// bid, if one has been issued.
    live_cancel_action: Mutex<Option<ActionId>>,
    /// How much of the current resting bid has already been hedged, so a
    /// later tick only hedges the incremental fill since the last one.
    previous_fill_amount: Mutex<Decimal>,
}

impl ArbitrageStrategy {
    /// A strategy resting bids on `buy_venue` and hedging fills by taking
    /// asks on `sell_venue`.
    #[must_use]
    pub fn new(
        buy_venue: Arc<dyn VenueClient>,
        sell_venue: Arc<dyn VenueClient>,
        config: StrategyConfig,
    ) -> Self {
        Self {
            buy_venue,
            sell_venue,
            config,
            live_limit_action: Mutex::new(None),
            live_cancel_action: Mutex::new(None),
            previous_fill_amount: Mutex::new(Decimal::ZERO),
        }
    }

    /// Run one evaluation of the strategy. Called on every tick of the
    /// coordinator's [`crate::timer::Timer`] and on every update either
    /// venue publishes.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a sanity contract is violated (see spec.md §4.5) or
    /// if either venue is unreachable while submitting an action.
    pub async fn tick(&self) -> Result<(), EngineError> {
        if !self.books_ready().await {
            return Ok(());
        }

        self.log_spread_diagnostic().await;

        let limit_id = *self.live_limit_action.lock().await;
        let Some(limit_id) = limit_id else {
            return self.issue_new_bid().await;
        };

        match self.action_status(&self.buy_venue, limit_id).await? {
            ActionStatus::Pending => Ok(()),
            ActionStatus::Failed => {
                *self.live_limit_action.lock().await = None;
                Ok(())
            }
            ActionStatus::Success => self.manage_resting_bid(limit_id).await,
        }
    }

    async fn books_ready(&self) -> bool {
        let buy_state = self.buy_venue.state();
        let sell_state = self.sell_venue.state();
        let buy = buy_state.read().await;
        let sell = sell_state.read().await;
        buy.order_book.is_ready() && sell.order_book.is_ready()
    }

    /// Replaces the ad-hoc CSV spread logger: a `tracing` event per tick
    /// rather than a file on disk.
    async fn log_spread_diagnostic(&self) {
        let buy_state = self.buy_venue.state();
        let sell_state = self.sell_venue.state();
        let buy = buy_state.read().await;
        let sell = sell_state.read().await;
        let buy_spread = MarketSpread::from_book(&buy.order_book);
        let sell_spread = MarketSpread::from_book(&sell.order_book);
        trace!(
            buy_bid = ?buy_spread.highest_bid,
            buy_ask = ?buy_spread.lowest_ask,
            sell_bid = ?sell_spread.highest_bid,
            sell_ask = ?sell_spread.lowest_ask,
            "market spread snapshot"
        );
    }

    /// Look up the current status of a tracked action. The id came from this
    /// strategy's own earlier `submit_action` call, so its disappearance
    /// from venue state means the venue reset (e.g. after a reconnect) out
    /// from under us; that is a fatal contract violation rather than
    /// something to silently paper over.
    async fn action_status(
        &self,
        venue: &Arc<dyn VenueClient>,
        id: ActionId,
    ) -> Result<ActionStatus, EngineError> {
        venue
            .state()
            .read()
            .await
            .action(id)
            .map(|store| store.status)
            .ok_or_else(|| {
                EngineError::StrategyContract(format!(
                    "action {id} on {} vanished from venue state",
                    venue.venue_id()
                ))
            })
    }

    async fn issue_new_bid(&self) -> Result<(), EngineError> {
        let sell_state = self.sell_venue.state();
        let effective_sell_price = {
            let sell = sell_state.read().await;
            sell.order_book
                .effective_price(Side::Bid, self.config.bid_amount)
        };
        let Some(effective_sell_price) = effective_sell_price else {
            info!("hedge venue book cannot currently cover the target bid size, skipping tick");
            return Ok(());
        };

        let buy_fees = fees(self.buy_venue.venue_id())?;
        let sell_fees = fees(self.sell_venue.venue_id())?;
        let factor = combined_fee_factor(buy_fees.maker, sell_fees.taker);
        let bid_price = round_down_to_cents(calculate_bid_limit_price(
            factor,
            effective_sell_price,
            self.config.profit_target,
        ));

        let buy_state = self.buy_venue.state();
        let buy = buy_state.read().await;
        let spread = MarketSpread::from_book(&buy.order_book);
        if let Some(best_ask) = spread.lowest_ask {
            if bid_price >= best_ask {
                return Err(EngineError::StrategyContract(format!(
                    "computed bid {bid_price} would cross the best ask {best_ask}"
                )));
            }
        }

        let usd_free = buy.balance.get("USD").free;
        let affordable = round_down_to_milli_btc(usd_free / bid_price);
        let amount = self.config.bid_amount.min(affordable);
        drop(buy);

        if amount.is_zero() {
            warn!(
                usd_free = %usd_free,
                bid_price = %bid_price,
                "insufficient balance to issue a new bid, skipping tick"
            );
            return Ok(());
        }

        let id = self
            .submit(
                &self.buy_venue,
                Action::CreateOrder {
                    symbol: "BTC-USD".to_owned(),
                    side: Side::Bid,
                    order_type: OrderType::Limit,
                    amount,
                    price: Some(bid_price),
                },
            )
            .await?;
        *self.live_limit_action.lock().await = Some(id);
        Ok(())
    }

    /// The live limit action has succeeded: a resting bid exists. Hedge any
    /// new fill, detect completion or a fatal mismatch, and otherwise fall
    /// through to cancel-tracking and re-pricing.
    async fn manage_resting_bid(&self, limit_id: ActionId) -> Result<(), EngineError> {
        let order = {
            let state = self.buy_venue.state();
            let state = state.read().await;
            let store = state.action(limit_id).ok_or_else(|| {
                EngineError::StrategyContract(format!(
                    "live limit action {limit_id} vanished from venue state"
                ))
            })?;
            let Some(order_id) = &store.result_order else {
                return Err(EngineError::StrategyContract(format!(
                    "action {limit_id} succeeded without a result order"
                )));
            };
            state.order(order_id).cloned().ok_or_else(|| {
                EngineError::StrategyContract(format!(
                    "order {order_id} missing from venue state"
                ))
            })?
        };

        self.hedge_fills(&order).await?;

        if order.filled == order.amount {
            if order.status != OrderStatus::Filled {
                return Err(EngineError::StrategyContract(format!(
                    "order {} is fully filled but not Filled (status {:?})",
                    order.id, order.status
                )));
            }
            self.clear_live_bid().await;
            return Ok(());
        }

        if order.status.is_terminal() {
            return Err(EngineError::StrategyContract(format!(
                "order {} reached terminal status {:?} with {} of {} filled",
                order.id, order.status, order.filled, order.amount
            )));
        }

        let cancel_id = *self.live_cancel_action.lock().await;
        if let Some(cancel_id) = cancel_id {
            return self.manage_live_cancel(&order, cancel_id).await;
        }

        self.maybe_reprice(&order).await
    }

    async fn manage_live_cancel(
        &self,
        order: &Order,
        cancel_id: ActionId,
    ) -> Result<(), EngineError> {
        match self.action_status(&self.buy_venue, cancel_id).await? {
            ActionStatus::Pending => Ok(()),
            ActionStatus::Success => {
                self.clear_live_bid().await;
                Ok(())
            }
            ActionStatus::Failed => Err(EngineError::StrategyContract(format!(
                "cancel action {cancel_id} for order {} failed",
                order.id
            ))),
        }
    }

    async fn maybe_reprice(&self, order: &Order) -> Result<(), EngineError> {
        let Some(order_price) = order.price else {
            return Err(EngineError::StrategyContract(
                "resting bid has no price".to_owned(),
            ));
        };

        let sell_state = self.sell_venue.state();
        let effective_sell_price = {
            let sell = sell_state.read().await;
            sell.order_book
                .effective_price(Side::Bid, self.config.bid_amount)
        };
        let Some(effective_sell_price) = effective_sell_price else {
            return Ok(());
        };

        let buy_fees = fees(self.buy_venue.venue_id())?;
        let sell_fees = fees(self.sell_venue.venue_id())?;
        let factor = combined_fee_factor(buy_fees.maker, sell_fees.taker);
        let profit_factor = factor * effective_sell_price / order_price;
        let target = Decimal::ONE + self.config.profit_target;
        let drift = (profit_factor - target).abs();

        if drift > self.config.order_update_threshold {
            info!(
                order_id = %order.id,
                %profit_factor,
                %drift,
                "profit factor drifted past threshold, cancelling resting bid"
            );
            let id = self
                .submit(
                    &self.buy_venue,
                    Action::CancelOrder {
                        order_id: order.id.clone(),
                    },
                )
                .await?;
            *self.live_cancel_action.lock().await = Some(id);
        }

        Ok(())
    }

    async fn hedge_fills(&self, order: &Order) -> Result<(), EngineError> {
        let delta = {
            let previous = self.previous_fill_amount.lock().await;
            order.filled - *previous
        };
        if delta <= Decimal::ZERO {
            return Ok(());
        }

        self.submit(
            &self.sell_venue,
            Action::CreateOrder {
                symbol: "BTC-USD".to_owned(),
                side: Side::Ask,
                order_type: OrderType::Market,
                amount: delta,
                price: None,
            },
        )
        .await?;

        *self.previous_fill_amount.lock().await = order.filled;
        Ok(())
    }

    async fn clear_live_bid(&self) {
        *self.live_limit_action.lock().await = None;
        *self.live_cancel_action.lock().await = None;
        *self.previous_fill_amount.lock().await = Decimal::ZERO;
    }

    /// Submit an action after checking it against the sanity contract every
    /// strategy output must satisfy (spec.md §4.5): never a market bid or a
    /// limit ask, and never an order on the wrong side of the venue it is
    /// headed to.
    async fn submit(
        &self,
        venue: &Arc<dyn VenueClient>,
        action: Action,
    ) -> Result<ActionId, EngineError> {
        self.assert_sane(venue.venue_id(), &action)?;
        venue.submit_action(action).await
    }

    fn assert_sane(&self, venue_id: &str, action: &Action) -> Result<(), EngineError> {
        let Action::CreateOrder {
            side, order_type, ..
        } = action
        else {
            return Ok(());
        };

        if *order_type == OrderType::Market && *side == Side::Bid {
            return Err(EngineError::StrategyContract(
                "refusing to submit a market bid".to_owned(),
            ));
        }
        if *order_type == OrderType::Limit && *side == Side::Ask {
            return Err(EngineError::StrategyContract(
                "refusing to submit a limit ask".to_owned(),
            ));
        }
        if venue_id == self.buy_venue.venue_id() && *side == Side::Ask {
            return Err(EngineError::StrategyContract(format!(
                "refusing to submit an ask on buy venue {venue_id}"
            )));
        }
        if venue_id == self.sell_venue.venue_id() && *side == Side::Bid {
            return Err(EngineError::StrategyContract(format!(
                "refusing to submit a bid on sell venue {venue_id}"
            )));
        }
        Ok(())
    }
}
