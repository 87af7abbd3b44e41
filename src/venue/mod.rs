//! Shared venue-client abstraction, request signing helpers, and the two
//! concrete venue implementations.

pub mod venue_a;
pub mod venue_b;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hmac::Mac;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::EngineError;
use crate::model::action::{Action, ActionId};
use crate::model::exchange_state::ExchangeState;
use crate::model::order_book::OrderBook;
use crate::model::quote::Side;

/// HMAC-SHA256 signer, used by Venue A per spec.md §6.
pub type HmacSha256 = hmac::Hmac<sha2::Sha256>;
/// HMAC-SHA384 signer, used by Venue B per spec.md §6.
pub type HmacSha384 = hmac::Hmac<sha2::Sha384>;

/// Sign `message` with `key` under the given HMAC construction and return
/// the lowercase hex digest.
///
/// # Panics
///
/// Never panics: HMAC accepts keys of any length.
pub fn hmac_hex<M: Mac + hmac::digest::KeyInit>(key: &[u8], message: &[u8]) -> String {
    let mut mac = <M as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Sign `message` with `key` under the given HMAC construction and return
/// the base64 digest, used by venues that expect a base64-encoded signature
/// rather than hex.
pub fn hmac_base64<M: Mac + hmac::digest::KeyInit>(key: &[u8], message: &[u8]) -> String {
    use base64::Engine;

    let mut mac = <M as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Per-venue maker/taker fees, expressed as fractions (`0.0025` for 0.25%).
#[derive(Debug, Clone, Copy)]
pub struct Fees {
    /// Fee paid when resting liquidity that is later taken.
    pub maker: Decimal,
    /// Fee paid when taking resting liquidity.
    pub taker: Decimal,
}

/// Static fee table. A venue id not present here is a configuration error,
/// not a silent default, matching the original project's `fees()` which
/// raises for unknown exchange ids.
///
/// # Errors
///
/// Returns `Err` if `venue_id` is not a known venue.
pub fn fees(venue_id: &str) -> Result<Fees, EngineError> {
    use rust_decimal_macros::dec;

    match venue_id {
        "venue_a" | "venue_a_sandbox" => Ok(Fees {
            maker: Decimal::ZERO,
            taker: dec!(0.0025),
        }),
        "venue_b" | "venue_b_sandbox" => Ok(Fees {
            maker: dec!(0.001),
            taker: dec!(0.0035),
        }),
        other => Err(EngineError::StrategyContract(format!(
            "no fee table configured for venue {other}"
        ))),
    }
}

/// A read-only view of the best bid/ask on a venue's book, used for
/// diagnostics and by the strategy's sanity checks.
#[derive(Debug, Clone, Copy)]
pub struct MarketSpread {
    /// Highest resting bid price, if the book has any bids.
    pub highest_bid: Option<Decimal>,
    /// Lowest resting ask price, if the book has any asks.
    pub lowest_ask: Option<Decimal>,
}

impl MarketSpread {
    /// Derive the spread from an order book snapshot.
    #[must_use]
    pub fn from_book(book: &OrderBook) -> Self {
        Self {
            highest_bid: book.best_bid().map(|q| q.price),
            lowest_ask: book.best_ask().map(|q| q.price),
        }
    }
}

/// A monotonically increasing source of [`ActionId`]s, shared by a venue
/// client's submission path and its task-internal dispatcher, mirroring the
/// teacher's `Controller::current_id` counter generalized to be race-free
/// across tasks.
#[derive(Debug, Default)]
pub struct ActionIdSource(AtomicU64);

impl ActionIdSource {
    /// The next id, never repeated for the lifetime of this source.
    pub fn next(&self) -> ActionId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Common lifecycle every venue client exposes to the coordinator and the
/// strategy. A concrete implementation owns its websocket/REST tasks
/// internally and is the sole writer of its [`ExchangeState`].
#[async_trait]
pub trait VenueClient: std::fmt::Debug + Send + Sync {
    /// This venue's identifier, as used in [`fees`] and log output.
    fn venue_id(&self) -> &'static str;

    /// Shared, read-mostly handle to this venue's state. The strategy reads
    /// through this; only the client itself ever takes the write lock.
    fn state(&self) -> Arc<RwLock<ExchangeState>>;

    /// Run the client's websocket and action-processing tasks until a fatal
    /// error occurs on any of them, then return that error. Intended to be
    /// raced against sibling venues' `run` futures by the coordinator.
    async fn run(&self) -> Result<(), EngineError>;

    /// Submit an action for this venue to execute. Returns immediately after
    /// the action has been queued; the caller observes the outcome by
    /// polling the corresponding order (for `CreateOrder`) through
    /// [`VenueClient::state`].
    async fn submit_action(&self, action: Action) -> Result<ActionId, EngineError>;
}

/// Which side of an order book a venue-originated event applies to, reused
/// by both venue clients' wire decoders.
pub(crate) fn side_from_str(raw: &str) -> Option<Side> {
    match raw {
        "buy" | "bid" => Some(Side::Bid),
        "sell" | "ask" => Some(Side::Ask),
        _ => None,
    }
}
