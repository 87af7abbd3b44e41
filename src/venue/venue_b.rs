//! Venue B: two independent websockets (market data, order events), modeled
//! on the Gemini exchange's feeds, each with its own per-socket sequence
//! counter, plus a REST surface for order entry, cancellation and balance
//! polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
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
use crate::venue::{hmac_hex, side_from_str, ActionIdSource, HmacSha384, VenueClient};

fn unix_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as u64
}

/// Per-socket sequencing state, tracked independently for the market-data
/// and order-events sockets since each venue connection has its own
/// `socket_sequence` counter and its own heartbeat `sequence` counter.
#[derive(Debug, Default)]
struct SocketState {
    expected_sequence: Option<u64>,
    heartbeat_sequence: Option<u64>,
    acknowledged: bool,
}

impl SocketState {
    /// Validate and advance the expected `socket_sequence` for this socket.
    /// `subscription_ack` messages are exempt from the sequence check, but
    /// per spec.md §4.3 ("socket_sequence 0 must be a subscription_ack")
    /// they must also be the very first message seen on the socket: any
    /// other message type arriving before one is fatal, since nothing else
    /// is allowed to open the sequence.
    fn check_sequence(&mut self, socket_sequence: Option<u64>, is_ack: bool) -> Result<(), EngineError> {
        if is_ack {
            self.acknowledged = true;
            return Ok(());
        }
        if !self.acknowledged {
            return Err(EngineError::ProtocolViolation {
                venue: "venue_b",
                reason: "socket sequence opened by a message other than subscription_ack"
                    .to_owned(),
            });
        }
        let Some(sequence) = socket_sequence else {
            return Ok(());
        };

        match self.expected_sequence {
            None => {
                self.expected_sequence = Some(sequence + 1);
                Ok(())
            }
            Some(expected) if expected == sequence => {
                self.expected_sequence = Some(sequence + 1);
                Ok(())
            }
            Some(expected) => Err(EngineError::ProtocolViolation {
                venue: "venue_b",
                reason: format!("socket sequence gap: expected {expected}, got {sequence}"),
            }),
        }
    }

    /// Validate and advance the independent heartbeat `sequence` counter
    /// (spec.md §4.3), distinct from `socket_sequence`: heartbeats carry
    /// their own monotonically-increasing-by-one counter and a gap in it is
    /// fatal just like a gap in `socket_sequence`.
    fn check_heartbeat_sequence(&mut self, heartbeat_sequence: u64) -> Result<(), EngineError> {
        match self.heartbeat_sequence {
            None => {
                self.heartbeat_sequence = Some(heartbeat_sequence + 1);
                Ok(())
            }
            Some(expected) if expected == heartbeat_sequence => {
                self.heartbeat_sequence = Some(heartbeat_sequence + 1);
                Ok(())
            }
            Some(expected) => Err(EngineError::ProtocolViolation {
                venue: "venue_b",
                reason: format!(
                    "heartbeat sequence gap: expected {expected}, got {heartbeat_sequence}"
                ),
            }),
        }
    }
}

/// Gemini-style venue client: dual websockets with per-socket sequencing
/// and a richer order-event state machine, per spec.md §4.3.
#[derive(Debug)]
pub struct VenueBClient {
    state: Arc<RwLock<ExchangeState>>,
    endpoints: VenueEndpoints,
    credentials: ApiCredentials,
    symbol: String,
    nonce: AtomicU64,
    action_ids: ActionIdSource,
    action_tx: mpsc::UnboundedSender<(ActionId, Action)>,
    action_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<(ActionId, Action)>>>,
}

impl VenueBClient {
    /// A new client for the given endpoints/credentials/symbol.
    #[must_use]
    pub fn new(
        endpoints: VenueEndpoints,
        credentials: ApiCredentials,
        symbol: impl Into<String>,
    ) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(RwLock::new(ExchangeState::new("venue_b"))),
            endpoints,
            credentials,
            symbol: symbol.into(),
            nonce: AtomicU64::new(unix_timestamp_millis()),
            action_ids: ActionIdSource::default(),
            action_tx,
            action_rx: tokio::sync::Mutex::new(Some(action_rx)),
        }
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }

    /// Build the `X-GEMINI-*` header set for a REST request whose JSON
    /// payload (including `request`/`nonce`) is `payload`.
    fn rest_headers(&self, payload: &Value) -> Vec<(&'static str, String)> {
        use base64::Engine;

        let payload_b64 =
            base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(payload).unwrap());
        let signature =
            hmac_hex::<HmacSha384>(self.credentials.api_secret.as_bytes(), payload_b64.as_bytes());

        vec![
            ("X-GEMINI-APIKEY", self.credentials.api_key.clone()),
            ("X-GEMINI-PAYLOAD", payload_b64),
            ("X-GEMINI-SIGNATURE", signature),
        ]
    }

    async fn post_signed(&self, request_path: &str, mut body: Value) -> Result<Value, EngineError> {
        let client = reqwest::Client::new();
        let obj = body.as_object_mut().expect("body must be a JSON object");
        obj.insert("request".to_owned(), json!(request_path));
        obj.insert("nonce".to_owned(), json!(self.next_nonce()));

        const MAX_ATTEMPTS: u32 = 4;
        let mut last_err = None;

        for _ in 0..MAX_ATTEMPTS {
            let headers = self.rest_headers(&body);
            let mut request = client.post(self.endpoints.rest_url.join(request_path.trim_start_matches('/')).unwrap());
            for (name, value) in &headers {
                request = request.header(*name, value.clone());
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json().await?);
                }
                Ok(response) => {
                    last_err = Some(EngineError::RestNonSuccess {
                        venue: "venue_b",
                        reason: response.text().await.unwrap_or_default(),
                    });
                }
                Err(err) => {
                    last_err = Some(EngineError::Transport {
                        venue: "venue_b",
                        source: err.into(),
                    });
                }
            }
        }

        Err(last_err.unwrap_or(EngineError::Transport {
            venue: "venue_b",
            source: anyhow::anyhow!("retries exhausted with no recorded error"),
        }))
    }

    async fn apply_market_update(&self, events: Vec<Value>) -> Result<(), EngineError> {
        let mut state = self.state.write().await;

        for event in events {
            let Some(event_type) = event.get("type").and_then(Value::as_str) else {
                continue;
            };
            if event_type != "change" {
                continue;
            }
            let side = event
                .get("side")
                .and_then(Value::as_str)
                .and_then(side_from_str)
                .ok_or_else(|| EngineError::ProtocolViolation {
                    venue: "venue_b",
                    reason: "change event missing a valid side".to_owned(),
                })?;
            let price: Decimal = event
                .get("price")
                .and_then(Value::as_str)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| EngineError::ProtocolViolation {
                    venue: "venue_b",
                    reason: "change event missing a valid price".to_owned(),
                })?;
            let remaining: Decimal = event
                .get("remaining")
                .and_then(Value::as_str)
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| EngineError::ProtocolViolation {
                    venue: "venue_b",
                    reason: "change event missing a valid remaining quantity".to_owned(),
                })?;

            state.order_book.set_quote(side, Quote { price, quantity: remaining });
        }

        state.order_book.mark_ready();
        state.update_publisher.notify();
        Ok(())
    }

    /// Validate a private-stream `subscription_ack` against spec.md §4.3's
    /// table: an account id must be present, the symbol and event-type
    /// filters must both be empty (we did not ask the venue to narrow
    /// them), and the session filter must name exactly our own API key.
    fn validate_subscription_ack(&self, event: &Value) -> Result<(), EngineError> {
        let fatal = |reason: &str| EngineError::ProtocolViolation {
            venue: "venue_b",
            reason: reason.to_owned(),
        };

        if event.get("accountId").is_none() {
            return Err(fatal("subscription_ack missing accountId"));
        }
        let filter_is_empty = |key: &str| {
            event
                .get(key)
                .and_then(Value::as_array)
                .map_or(true, <[Value]>::is_empty)
        };
        if !filter_is_empty("symbolFilter") {
            return Err(fatal("subscription_ack symbolFilter is not empty"));
        }
        if !filter_is_empty("eventTypeFilter") {
            return Err(fatal("subscription_ack eventTypeFilter is not empty"));
        }

        let session_filter = event
            .get("apiSessionFilter")
            .and_then(Value::as_array)
            .ok_or_else(|| fatal("subscription_ack missing apiSessionFilter"))?;
        let matches_our_key = session_filter.len() == 1
            && session_filter[0].as_str() == Some(self.credentials.api_key.as_str());
        if !matches_our_key {
            return Err(fatal(
                "subscription_ack apiSessionFilter does not contain exactly our session key",
            ));
        }
        Ok(())
    }

    /// Match a `client_order_id` reported on an `accepted`/`rejected` event
    /// back to the pending `CreateOrder` action that produced it. No match
    /// is fatal per spec.md §4.3's order-event table.
    fn matching_create_action(
        state: &ExchangeState,
        event: &Value,
    ) -> Result<ActionId, EngineError> {
        event
            .get("client_order_id")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<ActionId>().ok())
            .filter(|id| state.action(*id).is_some())
            .ok_or_else(|| EngineError::Business {
                venue: "venue_b",
                order_id: event
                    .get("order_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_owned(),
                reason: "no pending action matches this event's client_order_id".to_owned(),
            })
    }

    async fn handle_order_event(&self, event: &Value) -> Result<(), EngineError> {
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::ProtocolViolation {
                venue: "venue_b",
                reason: "order event missing type".to_owned(),
            })?;

        if event_type == "subscription_ack" {
            return self.validate_subscription_ack(event);
        }

        let Some(order_id) = event.get("order_id").and_then(Value::as_str) else {
            return Ok(());
        };

        let mut state = self.state.write().await;

        match event_type {
            "accepted" | "initial" => {
                let action_id = if event_type == "accepted" {
                    Some(Self::matching_create_action(&state, event)?)
                } else {
                    None
                };
                if event_type == "initial" && state.orders.contains_key(order_id) {
                    drop(state);
                    return Err(EngineError::ProtocolViolation {
                        venue: "venue_b",
                        reason: format!("order id {order_id} collides with an existing order"),
                    });
                }

                let side = event
                    .get("side")
                    .and_then(Value::as_str)
                    .and_then(side_from_str)
                    .unwrap_or(Side::Bid);
                let amount: Decimal = event
                    .get("original_amount")
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
                let price: Option<Decimal> = event
                    .get("price")
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse().ok());
                let order = state.orders.entry(order_id.to_owned()).or_insert_with(|| {
                    Order::new_pending(
                        order_id.to_owned(),
                        self.symbol.clone(),
                        side,
                        OrderType::Limit,
                        amount,
                        price,
                    )
                });
                order.status = OrderStatus::Open;

                if let Some(action_id) = action_id {
                    state.set_action_result_order(action_id, order_id.to_owned());
                    state.set_action_status(action_id, ActionStatus::Success);
                }
            }
            "booked" => {
                // Informational per spec.md §4.3; no state change required.
            }
            "fill" => {
                let price: Decimal = event
                    .get("fill")
                    .and_then(|f| f.get("price"))
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
                let amount: Decimal = event
                    .get("fill")
                    .and_then(|f| f.get("amount"))
                    .and_then(Value::as_str)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default();
                let Some(order) = state.orders.get_mut(order_id) else {
                    drop(state);
                    return Err(EngineError::ProtocolViolation {
                        venue: "venue_b",
                        reason: format!("fill for unknown order {order_id}"),
                    });
                };
                order.apply_fill(amount, price);
            }
            "rejected" => {
                let action_id = Self::matching_create_action(&state, event)?;
                let reason = event
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_owned();
                state.set_action_status(action_id, ActionStatus::Failed);
                warn!(venue = "venue_b", order_id, %reason, "create order rejected");
            }
            "cancelled" => {
                let Some(order) = state.orders.get_mut(order_id) else {
                    drop(state);
                    return Err(EngineError::Business {
                        venue: "venue_b",
                        order_id: order_id.to_owned(),
                        reason: "cancelled event for unknown order".to_owned(),
                    });
                };
                if order.status.is_terminal() {
                    return Ok(());
                }
                order.status = OrderStatus::Cancelled;
                match state.pending_cancel_action(order_id) {
                    Some(cancel_action_id) => {
                        state.set_action_status(cancel_action_id, ActionStatus::Success);
                    }
                    None => {
                        drop(state);
                        return Err(EngineError::ProtocolViolation {
                            venue: "venue_b",
                            reason: format!("order {order_id} cancelled by venue without request"),
                        });
                    }
                }
            }
            "cancel_rejected" => {
                let reason = event
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_owned();
                match state.pending_cancel_action(order_id) {
                    Some(cancel_action_id) => {
                        state.set_action_status(cancel_action_id, ActionStatus::Failed);
                        warn!(venue = "venue_b", order_id, %reason, "cancel request rejected");
                    }
                    None => {
                        drop(state);
                        return Err(EngineError::ProtocolViolation {
                            venue: "venue_b",
                            reason: format!(
                                "cancel_rejected for {order_id} with no matching cancel action"
                            ),
                        });
                    }
                }
            }
            "closed" => {
                let Some(order) = state.orders.get_mut(order_id) else {
                    drop(state);
                    return Err(EngineError::ProtocolViolation {
                        venue: "venue_b",
                        reason: format!("closed event for unknown order {order_id}"),
                    });
                };
                if !order.status.is_terminal() {
                    order.status = if order.remaining.is_zero() {
                        OrderStatus::Filled
                    } else {
                        OrderStatus::Cancelled
                    };
                }
            }
            other => {
                return Err(EngineError::ProtocolViolation {
                    venue: "venue_b",
                    reason: format!("unknown order event type {other}"),
                })
            }
        }

        state.update_publisher.notify();
        Ok(())
    }

    fn new_order_payload(
        &self,
        side: Side,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
        client_order_id: &str,
    ) -> Value {
        let side_str = if matches!(side, Side::Bid) { "buy" } else { "sell" };

        match order_type {
            OrderType::Limit => json!({
                "symbol": self.symbol,
                "client_order_id": client_order_id,
                "amount": amount.to_string(),
                "price": price.map(|p| p.to_string()).unwrap_or_default(),
                "side": side_str,
                "type": "exchange limit",
            }),
            OrderType::Market => {
                // Venue B has no native market order; emulate one as an
                // immediate-or-cancel limit priced to guarantee a cross,
                // per spec.md §9.
                let extreme_price = if matches!(side, Side::Bid) {
                    "1000000"
                } else {
                    "0"
                };
                json!({
                    "symbol": self.symbol,
                    "client_order_id": client_order_id,
                    "amount": amount.to_string(),
                    "price": extreme_price,
                    "side": side_str,
                    "type": "exchange limit",
                    "options": ["immediate-or-cancel"],
                })
            }
        }
    }

    /// Submit a dispatched action's REST call. Exhausting the 4-attempt
    /// retry policy is fatal to the whole run per spec.md §4.3 ("the
    /// action's status is not flipped to `FAILED` silently"), so the error
    /// propagates out rather than being swallowed into the tracked action.
    /// A `CreateOrder`'s resolution to `Success`/`Failed` and a
    /// `CancelOrder`'s resolution to `Success` happen later, off the
    /// corresponding order-events message, not off this REST
    /// acknowledgement.
    async fn execute_action(&self, id: ActionId, action: &Action) -> Result<(), EngineError> {
        let client_order_id = id.to_string();
        let payload = match action {
            Action::CreateOrder { side, order_type, amount, price, .. } => {
                self.new_order_payload(*side, *order_type, *amount, *price, &client_order_id)
            }
            Action::CancelOrder { order_id } => json!({ "order_id": order_id }),
        };
        let path = match action {
            Action::CreateOrder { .. } => "/v1/order/new",
            Action::CancelOrder { .. } => "/v1/order/cancel",
        };
        self.post_signed(path, payload).await?;
        Ok(())
    }
}

#[async_trait]
impl VenueClient for VenueBClient {
    fn venue_id(&self) -> &'static str {
        "venue_b"
    }

    fn state(&self) -> Arc<RwLock<ExchangeState>> {
        Arc::clone(&self.state)
    }

    async fn run(&self) -> Result<(), EngineError> {
        let Some(user_ws_url) = self.endpoints.user_ws_url.clone() else {
            return Err(EngineError::ConfigMissing("VENUE_B_USER_WS_URL"));
        };

        let (market_stream, _) = connect_async(&self.endpoints.market_ws_url).await?;
        let (user_stream, _) = connect_async(&user_ws_url).await?;
        info!(venue = "venue_b", "both websockets connected");

        let (_market_write, mut market_read) = market_stream.split();
        let (_user_write, mut user_read) = user_stream.split();

        let mut market_socket = SocketState::default();
        let mut user_socket = SocketState::default();

        let mut action_rx = self
            .action_rx
            .lock()
            .await
            .take()
            .expect("run called more than once");

        loop {
            tokio::select! {
                frame = market_read.next() => {
                    let Some(frame) = frame else {
                        return Err(EngineError::Transport {
                            venue: "venue_b",
                            source: anyhow::anyhow!("market websocket closed"),
                        });
                    };
                    let Message::Text(text) = frame? else { continue };
                    let value: Value = serde_json::from_str(&text)?;
                    let msg_type = value.get("type").and_then(Value::as_str).unwrap_or_default();
                    let sequence = value.get("socket_sequence").and_then(Value::as_u64);
                    market_socket.check_sequence(sequence, msg_type == "subscription_ack")?;

                    if msg_type == "heartbeat" {
                        let heartbeat_sequence = value
                            .get("sequence")
                            .and_then(Value::as_u64)
                            .ok_or_else(|| EngineError::ProtocolViolation {
                                venue: "venue_b",
                                reason: "heartbeat missing sequence".to_owned(),
                            })?;
                        market_socket.check_heartbeat_sequence(heartbeat_sequence)?;
                        continue;
                    }
                    if msg_type == "subscription_ack" {
                        continue;
                    }
                    let events = value
                        .get("events")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default();
                    self.apply_market_update(events).await?;
                }
                frame = user_read.next() => {
                    let Some(frame) = frame else {
                        return Err(EngineError::Transport {
                            venue: "venue_b",
                            source: anyhow::anyhow!("user websocket closed"),
                        });
                    };
                    let Message::Text(text) = frame? else { continue };
                    let value: Value = serde_json::from_str(&text)?;

                    let events: Vec<Value> = if let Some(array) = value.as_array() {
                        array.clone()
                    } else {
                        vec![value]
                    };

                    for event in events {
                        let msg_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
                        let sequence = event.get("socket_sequence").and_then(Value::as_u64);
                        user_socket.check_sequence(sequence, msg_type == "subscription_ack")?;
                        if msg_type == "heartbeat" {
                            let heartbeat_sequence = event
                                .get("sequence")
                                .and_then(Value::as_u64)
                                .ok_or_else(|| EngineError::ProtocolViolation {
                                    venue: "venue_b",
                                    reason: "heartbeat missing sequence".to_owned(),
                                })?;
                            user_socket.check_heartbeat_sequence(heartbeat_sequence)?;
                            continue;
                        }
                        self.handle_order_event(&event).await?;
                    }
                }
                action = action_rx.recv() => {
                    let Some((id, action)) = action else {
                        continue;
                    };
                    self.execute_action(id, &action).await?;
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
                venue: "venue_b",
                source: anyhow::anyhow!("action channel closed"),
            })?;
        Ok(id)
    }
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    currency: String,
    available: Decimal,
    amount: Decimal,
}

impl VenueBClient {
    /// Poll `POST /v1/balances` and overwrite the tracked balance for every
    /// currency the venue reports. `on_hold` is derived as `amount -
    /// available`, matching the venue's own balance semantics.
    ///
    /// # Errors
    ///
    /// Returns `Err` on a transport failure or a non-success response.
    pub async fn update_balance(&self) -> Result<(), EngineError> {
        let response = self.post_signed("/v1/balances", json!({})).await?;
        let entries: Vec<BalanceEntry> = serde_json::from_value(response)?;

        let mut state = self.state.write().await;
        for entry in entries {
            state.balance.set(
                entry.currency,
                crate::model::balance::BalanceEntry {
                    free: entry.available,
                    on_hold: entry.amount - entry.available,
                },
            );
        }
        state.update_publisher.notify();
        Ok(())
    }
}
