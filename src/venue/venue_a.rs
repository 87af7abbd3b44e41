//! Venue A: a single combined market-data + order-events websocket, modeled
//! on the Coinbase/GDAX `level2` feed, plus a REST surface for order entry
//! and balance polling.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::config::VenueEndpoints;
use crate::credentials::ApiCredentials;
use crate::error::EngineError;
use crate::model::action::{Action, ActionId, ActionStatus};
use crate::model::exchange_state::ExchangeState;
use crate::model::order::{Order, OrderStatus, OrderType};
use crate::model::quote::{Quote, Side};
use crate::venue::{hmac_base64, side_from_str, ActionIdSource, HmacSha256, VenueClient};

/// Heartbeats more than this far from the expected 1 second cadence are a
/// protocol violation, per spec.md §4.2.
const HEARTBEAT_TOLERANCE_LOW: Duration = Duration::from_millis(500);
const HEARTBEAT_TOLERANCE_HIGH: Duration = Duration::from_millis(1500);

fn unix_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum WireMessage {
    Subscriptions {
        channels: Vec<WireChannel>,
    },
    Snapshot {
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    },
    #[serde(rename = "l2update")]
    L2Update {
        changes: Vec<(String, Decimal, Decimal)>,
    },
    Heartbeat {
        time: String,
        sequence: u64,
    },
    Received {
        order_id: String,
    },
    Open {
        order_id: String,
        price: Decimal,
        remaining_size: Decimal,
        side: String,
    },
    Done {
        order_id: String,
        reason: String,
    },
    Match {
        maker_order_id: String,
        taker_order_id: String,
        price: Decimal,
        size: Decimal,
    },
    Change {
        order_id: String,
        new_size: Option<Decimal>,
    },
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    name: String,
    #[serde(default)]
    product_ids: Vec<String>,
}

/// The order object `POST /orders` responds with on acceptance.
#[derive(Debug, Deserialize)]
struct NewOrderResponse {
    id: String,
}

/// GDAX-style venue client, the single-websocket venue per spec.md §4.2.
#[derive(Debug)]
pub struct VenueAClient {
    state: Arc<RwLock<ExchangeState>>,
    endpoints: VenueEndpoints,
    credentials: ApiCredentials,
    symbol: String,
    action_ids: ActionIdSource,
    action_tx: mpsc::UnboundedSender<(ActionId, Action)>,
    action_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<(ActionId, Action)>>>,
    last_heartbeat: tokio::sync::Mutex<Option<std::time::Instant>>,
}

impl VenueAClient {
    /// A new client for the given endpoints/credentials/symbol. `symbol` is
    /// the venue's own product id, e.g. `"BTC-USD"`.
    #[must_use]
    pub fn new(
        endpoints: VenueEndpoints,
        credentials: ApiCredentials,
        symbol: impl Into<String>,
    ) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(RwLock::new(ExchangeState::new("venue_a"))),
            endpoints,
            credentials,
            symbol: symbol.into(),
            action_ids: ActionIdSource::default(),
            action_tx,
            action_rx: tokio::sync::Mutex::new(Some(action_rx)),
            last_heartbeat: tokio::sync::Mutex::new(None),
        }
    }

    /// Base64-decode `api_secret` into raw HMAC key bytes. Per spec.md §6 /
    /// `gdax.py::CoinbaseExchangeAuth`, the secret is stored and transmitted
    /// base64-encoded but must be decoded before it keys the HMAC.
    fn hmac_key(&self) -> Result<Vec<u8>, EngineError> {
        use base64::Engine;

        base64::engine::general_purpose::STANDARD
            .decode(&self.credentials.api_secret)
            .map_err(|err| EngineError::ProtocolViolation {
                venue: "venue_a",
                reason: format!("api_secret is not valid base64: {err}"),
            })
    }

    fn rest_auth_headers(
        &self,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, EngineError> {
        let timestamp = unix_timestamp_secs();
        let prehash = format!("{timestamp}{method}{path}{body}");
        let signature = hmac_base64::<HmacSha256>(&self.hmac_key()?, prehash.as_bytes());

        Ok(vec![
            ("CB-ACCESS-KEY", self.credentials.api_key.clone()),
            ("CB-ACCESS-SIGN", signature),
            ("CB-ACCESS-TIMESTAMP", timestamp.to_string()),
            (
                "CB-ACCESS-PASSPHRASE",
                self.credentials.passphrase.clone().unwrap_or_default(),
            ),
        ])
    }

    fn build_subscribe_message(&self) -> Result<Message, EngineError> {
        let timestamp = unix_timestamp_secs();
        let prehash = format!("{timestamp}GET/users/self/verify");
        let signature = hmac_base64::<HmacSha256>(&self.hmac_key()?, prehash.as_bytes());

        let msg = json!({
            "type": "subscribe",
            "product_ids": [self.symbol],
            "channels": ["level2", "heartbeat", "user"],
            "signature": signature,
            "key": self.credentials.api_key,
            "passphrase": self.credentials.passphrase,
            "timestamp": timestamp.to_string(),
        });

        Ok(Message::Text(serde_json::to_string(&msg)?))
    }

    async fn apply_snapshot(&self, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) {
        let mut state = self.state.write().await;
        for (price, quantity) in bids {
            state.order_book.set_quote(Side::Bid, Quote { price, quantity });
        }
        for (price, quantity) in asks {
            state.order_book.set_quote(Side::Ask, Quote { price, quantity });
        }
        state.order_book.mark_ready();
        state.update_publisher.notify();
    }

    async fn apply_l2_update(
        &self,
        changes: Vec<(String, Decimal, Decimal)>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        for (side_raw, price, quantity) in changes {
            let side = side_from_str(&side_raw).ok_or_else(|| EngineError::ProtocolViolation {
                venue: "venue_a",
                reason: format!("unknown l2update side {side_raw}"),
            })?;
            state.order_book.set_quote(side, Quote { price, quantity });
        }
        state.update_publisher.notify();
        Ok(())
    }

    async fn handle_heartbeat(&self) -> Result<(), EngineError> {
        let mut last = self.last_heartbeat.lock().await;
        let now = std::time::Instant::now();
        if let Some(prev) = *last {
            let delta = now.duration_since(prev);
            if delta < HEARTBEAT_TOLERANCE_LOW || delta > HEARTBEAT_TOLERANCE_HIGH {
                return Err(EngineError::ProtocolViolation {
                    venue: "venue_a",
                    reason: format!("heartbeat delta {delta:?} outside [0.5s, 1.5s]"),
                });
            }
        }
        *last = Some(now);
        Ok(())
    }

    async fn handle_order_event(&self, msg: WireMessage) -> Result<(), EngineError> {
        let mut state = self.state.write().await;

        match msg {
            WireMessage::Received { order_id } => {
                info!(venue = "venue_a", %order_id, "order received by venue");
            }
            WireMessage::Open {
                order_id,
                price,
                remaining_size,
                side,
            } => {
                let side = side_from_str(&side).ok_or_else(|| EngineError::ProtocolViolation {
                    venue: "venue_a",
                    reason: format!("unknown order side {side}"),
                })?;
                let order = state.orders.entry(order_id.clone()).or_insert_with(|| {
                    Order::new_pending(
                        order_id.clone(),
                        self.symbol.clone(),
                        side,
                        OrderType::Limit,
                        remaining_size,
                        Some(price),
                    )
                });
                order.remaining = remaining_size;
                order.status = OrderStatus::Open;
            }
            WireMessage::Match {
                maker_order_id,
                price,
                size,
                ..
            } => {
                if let Some(order) = state.orders.get_mut(&maker_order_id) {
                    order.apply_fill(size, price);
                }
            }
            WireMessage::Change { order_id, new_size } => {
                if let (Some(order), Some(new_size)) =
                    (state.orders.get_mut(&order_id), new_size)
                {
                    order.remaining = new_size;
                }
            }
            WireMessage::Done { order_id, reason } => {
                let Some(order) = state.orders.get_mut(&order_id) else {
                    return Ok(());
                };
                if order.status.is_terminal() {
                    return Ok(());
                }
                match reason.as_str() {
                    "filled" => order.status = OrderStatus::Filled,
                    "cancelled" => {
                        order.status = OrderStatus::Cancelled;
                        // A cancellation we requested has a matching pending
                        // CancelOrder action for this order id; one the venue
                        // initiated on its own does not, and is fatal per
                        // spec.md §9.
                        match state.pending_cancel_action(&order_id) {
                            Some(cancel_action_id) => {
                                state.set_action_status(cancel_action_id, ActionStatus::Success);
                            }
                            None => {
                                drop(state);
                                return Err(EngineError::ProtocolViolation {
                                    venue: "venue_a",
                                    reason: format!(
                                        "order {order_id} cancelled by venue without request"
                                    ),
                                });
                            }
                        }
                    }
                    other => {
                        return Err(EngineError::ProtocolViolation {
                            venue: "venue_a",
                            reason: format!("unknown done reason {other}"),
                        })
                    }
                }
            }
            _ => {}
        }

        state.update_publisher.notify();
        Ok(())
    }

    async fn handle_message(&self, raw: &str) -> Result<(), EngineError> {
        let parsed: WireMessage = match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(_) => {
                // Messages we have no variant for (e.g. `last_match`) are
                // ignored rather than fatal, matching spec.md §7's
                // "unrecognized-but-well-formed message" disposition.
                return Ok(());
            }
        };

        match parsed {
            WireMessage::Subscriptions { channels } => {
                // spec.md §4.2: the ack's channels must be a superset of
                // what we asked for ({user, heartbeat, level2}) and each
                // one's symbols must match our request exactly.
                const REQUESTED_CHANNELS: [&str; 3] = ["user", "heartbeat", "level2"];
                for requested in REQUESTED_CHANNELS {
                    let channel = channels.iter().find(|c| c.name == requested).ok_or_else(|| {
                        EngineError::ProtocolViolation {
                            venue: "venue_a",
                            reason: format!("subscription ack missing expected {requested} channel"),
                        }
                    })?;
                    if channel.product_ids != [self.symbol.clone()] {
                        return Err(EngineError::ProtocolViolation {
                            venue: "venue_a",
                            reason: format!(
                                "subscription ack channel {requested} has unexpected symbols {:?}",
                                channel.product_ids
                            ),
                        });
                    }
                }
                Ok(())
            }
            WireMessage::Snapshot { bids, asks } => {
                self.apply_snapshot(bids, asks).await;
                Ok(())
            }
            WireMessage::L2Update { changes } => self.apply_l2_update(changes).await,
            WireMessage::Heartbeat { .. } => self.handle_heartbeat().await,
            other => self.handle_order_event(other).await,
        }
    }

    /// Execute a dispatched action against the REST API and update the
    /// tracked [`crate::model::action::ActionStore`] (and, for a successful
    /// `CreateOrder`, the new [`Order`]) with the outcome. A non-2xx response
    /// flips the action to `Failed` and is logged, per spec.md §4.2; it is
    /// not propagated as a fatal error. Only a transport-level failure
    /// (connection refused, timeout) escapes as `Err` here, since that is
    /// outside the documented non-2xx disposition.
    async fn execute_action(&self, id: ActionId, action: &Action) -> Result<(), EngineError> {
        let client = reqwest::Client::new();

        match action {
            Action::CreateOrder {
                symbol,
                side,
                order_type,
                amount,
                price,
            } => {
                let client_oid = uuid::Uuid::new_v4().to_string();
                let body = match order_type {
                    OrderType::Limit => {
                        let price = price.ok_or_else(|| EngineError::StrategyContract(
                            "limit order submitted without a price".to_owned(),
                        ))?;
                        json!({
                            "type": "limit",
                            "client_oid": client_oid,
                            "side": if matches!(side, Side::Bid) { "buy" } else { "sell" },
                            "product_id": symbol,
                            "price": price.to_string(),
                            "size": amount.to_string(),
                            "time_in_force": "GTC",
                        })
                    }
                    OrderType::Market => json!({
                        "type": "market",
                        "client_oid": client_oid,
                        "side": if matches!(side, Side::Bid) { "buy" } else { "sell" },
                        "product_id": symbol,
                        "size": amount.to_string(),
                    }),
                };

                let body_str = serde_json::to_string(&body)?;
                let headers = self.rest_auth_headers("POST", "/orders", &body_str)?;
                let mut request = client
                    .post(self.endpoints.rest_url.join("orders").unwrap())
                    .body(body_str);
                for (name, value) in headers {
                    request = request.header(name, value);
                }

                let response = request.send().await?;
                if !response.status().is_success() {
                    warn!(
                        venue = "venue_a",
                        reason = %response.text().await.unwrap_or_default(),
                        "create order rejected"
                    );
                    let mut state = self.state.write().await;
                    state.set_action_status(id, ActionStatus::Failed);
                    state.update_publisher.notify();
                    return Ok(());
                }

                let accepted: NewOrderResponse = response.json().await?;
                let mut state = self.state.write().await;
                state.set_order(Order::new_pending(
                    accepted.id.clone(),
                    symbol.clone(),
                    *side,
                    *order_type,
                    *amount,
                    *price,
                ));
                state.set_action_result_order(id, accepted.id);
                state.set_action_status(id, ActionStatus::Success);
                state.update_publisher.notify();
                Ok(())
            }
            Action::CancelOrder { order_id } => {
                let path = format!("/orders/{order_id}");
                let headers = self.rest_auth_headers("DELETE", &path, "")?;
                let mut request = client.delete(self.endpoints.rest_url.join(path.trim_start_matches('/')).unwrap());
                for (name, value) in headers {
                    request = request.header(name, value);
                }

                let response = request.send().await?;
                if !response.status().is_success() {
                    warn!(
                        venue = "venue_a",
                        %order_id,
                        reason = %response.text().await.unwrap_or_default(),
                        "cancel order rejected"
                    );
                    let mut state = self.state.write().await;
                    state.set_action_status(id, ActionStatus::Failed);
                    state.update_publisher.notify();
                }
                // On acceptance the action is left Pending: the venue only
                // confirms the order is actually gone via the `done`
                // websocket event, which resolves this action to Success.
                Ok(())
            }
        }
    }
}

#[async_trait]
impl VenueClient for VenueAClient {
    fn venue_id(&self) -> &'static str {
        "venue_a"
    }

    fn state(&self) -> Arc<RwLock<ExchangeState>> {
        Arc::clone(&self.state)
    }

    async fn run(&self) -> Result<(), EngineError> {
        let (ws_stream, _) = connect_async(&self.endpoints.market_ws_url).await?;
        info!(venue = "venue_a", "websocket handshake complete");

        let (mut write, mut read) = ws_stream.split();
        write.send(self.build_subscribe_message()?).await?;

        let mut action_rx = self
            .action_rx
            .lock()
            .await
            .take()
            .expect("run called more than once");

        loop {
            tokio::select! {
                frame = read.next() => {
                    let Some(frame) = frame else {
                        return Err(EngineError::Transport {
                            venue: "venue_a",
                            source: anyhow::anyhow!("websocket stream closed"),
                        });
                    };
                    let frame = frame?;
                    if let Message::Text(text) = frame {
                        self.handle_message(&text).await?;
                    }
                }
                action = action_rx.recv() => {
                    let Some((id, action)) = action else {
                        continue;
                    };
                    if let Err(err) = self.execute_action(id, &action).await {
                        warn!(venue = "venue_a", ?err, "action failed");
                    }
                }
            }
        }
    }

    async fn submit_action(&self, action: Action) -> Result<ActionId, EngineError> {
        let id = self.action_ids.next();
        {
            let mut state = self.state.write().await;
            state.track_action(id, action.clone());
        }
        self.action_tx
            .send((id, action))
            .map_err(|_| EngineError::Transport {
                venue: "venue_a",
                source: anyhow::anyhow!("action channel closed"),
            })?;
        Ok(id)
    }
}

#[derive(Debug, Deserialize)]
struct AccountBalanceEntry {
    currency: String,
    available: Decimal,
    hold: Decimal,
}

impl VenueAClient {
    /// Poll `GET /accounts` and overwrite the tracked balance for every
    /// currency the venue reports.
    ///
    /// # Errors
    ///
    /// Returns `Err` on a transport failure or a non-success response.
    pub async fn update_balance(&self) -> Result<(), EngineError> {
        let client = reqwest::Client::new();
        let headers = self.rest_auth_headers("GET", "/accounts", "")?;
        let mut request = client.get(self.endpoints.rest_url.join("accounts").unwrap());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EngineError::RestNonSuccess {
                venue: "venue_a",
                reason: response.text().await.unwrap_or_default(),
            });
        }

        let accounts: Vec<AccountBalanceEntry> = response.json().await?;
        let mut state = self.state.write().await;
        for account in accounts {
            state.balance.set(
                account.currency,
                crate::model::balance::BalanceEntry {
                    free: account.available,
                    on_hold: account.hold,
                },
            );
        }
        state.update_publisher.notify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn subscribe_message_serializes_with_signature() {
        let client = VenueAClient::new(
            VenueEndpoints {
                rest_url: url::Url::parse("https://example.com").unwrap(),
                market_ws_url: url::Url::parse("wss://example.com").unwrap(),
                user_ws_url: None,
            },
            ApiCredentials {
                ccxt_id: "venue_a".to_owned(),
                owner: None,
                api_key: "key".to_owned(),
                api_secret: "c2VjcmV0".to_owned(),
                passphrase: Some("pass".to_owned()),
                api_url: None,
            },
            "BTC-USD",
        );

        let message = client.build_subscribe_message().unwrap();
        let Message::Text(text) = message else {
            panic!("expected text message");
        };
        assert!(text.contains("\"signature\""));
        assert!(text.contains("BTC-USD"));
    }

    #[tokio::test]
    async fn snapshot_marks_book_ready_and_applies_levels() {
        let client = VenueAClient::new(
            VenueEndpoints {
                rest_url: url::Url::parse("https://example.com").unwrap(),
                market_ws_url: url::Url::parse("wss://example.com").unwrap(),
                user_ws_url: None,
            },
            ApiCredentials {
                ccxt_id: "venue_a".to_owned(),
                owner: None,
                api_key: "key".to_owned(),
                api_secret: "c2VjcmV0".to_owned(),
                passphrase: None,
                api_url: None,
            },
            "BTC-USD",
        );

        client
            .apply_snapshot(vec![(dec!(100), dec!(1))], vec![(dec!(101), dec!(1))])
            .await;

        let state = client.state().read().await;
        assert!(state.order_book.is_ready());
        assert_eq!(state.order_book.best_bid().unwrap().price, dec!(100));
        assert_eq!(state.order_book.best_ask().unwrap().price, dec!(101));
    }

    fn test_client() -> VenueAClient {
        VenueAClient::new(
            VenueEndpoints {
                rest_url: url::Url::parse("https://example.com").unwrap(),
                market_ws_url: url::Url::parse("wss://example.com").unwrap(),
                user_ws_url: None,
            },
            ApiCredentials {
                ccxt_id: "venue_a".to_owned(),
                owner: None,
                api_key: "key".to_owned(),
                api_secret: "c2VjcmV0".to_owned(),
                passphrase: Some("pass".to_owned()),
                api_url: None,
            },
            "BTC-USD",
        )
    }

    #[test]
    fn rest_auth_signature_is_base64_over_the_base64_decoded_secret() {
        use base64::Engine;

        let client = test_client();
        let headers = client.rest_auth_headers("GET", "/accounts", "").unwrap();
        let signature = headers
            .iter()
            .find(|(name, _)| *name == "CB-ACCESS-SIGN")
            .map(|(_, value)| value.clone())
            .unwrap();

        // A valid base64 string whose decoded length matches a SHA256 HMAC
        // digest (32 bytes), confirming the signature was base64-encoded
        // rather than left as a hex digest.
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&signature)
            .expect("signature must be base64");
        assert_eq!(decoded.len(), 32);
    }

    #[tokio::test]
    async fn subscriptions_ack_accepts_the_full_requested_channel_set() {
        let client = test_client();
        let raw = serde_json::json!({
            "type": "subscriptions",
            "channels": [
                {"name": "level2", "product_ids": ["BTC-USD"]},
                {"name": "heartbeat", "product_ids": ["BTC-USD"]},
                {"name": "user", "product_ids": ["BTC-USD"]},
            ],
        })
        .to_string();

        client.handle_message(&raw).await.unwrap();
    }

    #[tokio::test]
    async fn subscriptions_ack_is_fatal_when_a_requested_channel_is_missing() {
        let client = test_client();
        let raw = serde_json::json!({
            "type": "subscriptions",
            "channels": [
                {"name": "level2", "product_ids": ["BTC-USD"]},
                {"name": "heartbeat", "product_ids": ["BTC-USD"]},
            ],
        })
        .to_string();

        assert!(client.handle_message(&raw).await.is_err());
    }

    #[tokio::test]
    async fn subscriptions_ack_is_fatal_when_a_symbol_does_not_match() {
        let client = test_client();
        let raw = serde_json::json!({
            "type": "subscriptions",
            "channels": [
                {"name": "level2", "product_ids": ["ETH-USD"]},
                {"name": "heartbeat", "product_ids": ["BTC-USD"]},
                {"name": "user", "product_ids": ["BTC-USD"]},
            ],
        })
        .to_string();

        assert!(client.handle_message(&raw).await.is_err());
    }
}
