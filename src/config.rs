//! Runtime configuration, populated by the embedding binary from environment
//! variables. No CLI argument parsing lives in this crate.

use std::env;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::EngineError;

/// Endpoint configuration for one venue, carrying both its standard and
/// sandbox URLs the way the original project's `GdaxExchange` class
/// constants did.
#[derive(Debug, Clone)]
pub struct VenueEndpoints {
    /// REST base URL.
    pub rest_url: url::Url,
    /// Market-data websocket URL.
    pub market_ws_url: url::Url,
    /// Order-events websocket URL, only present on venues with a separate
    /// private stream (Venue B).
    pub user_ws_url: Option<url::Url>,
}

/// Tunable parameters for the arbitrage strategy.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// BTC quantity to rest as the resting bid.
    pub bid_amount: Decimal,
    /// Minimum profit margin required to issue a new bid, expressed as a
    /// fraction (e.g. `0.10` for 10%).
    pub profit_target: Decimal,
    /// Minimum price drift, as a fraction of the current bid, before the
    /// strategy re-prices a resting bid.
    pub order_update_threshold: Decimal,
    /// How often the strategy re-evaluates its resting bid.
    pub poll_period: Duration,
}

/// Top-level configuration the coordinator is constructed from.
#[derive(Debug, Clone)]
pub struct Config {
    /// Venue A endpoints.
    pub venue_a: VenueEndpoints,
    /// Venue B endpoints.
    pub venue_b: VenueEndpoints,
    /// Strategy parameters.
    pub strategy: StrategyConfig,
    /// Path to the plaintext credentials file.
    pub credentials_path: String,
}

fn env_url(key: &'static str) -> Result<url::Url, EngineError> {
    let raw = env::var(key).map_err(|_| EngineError::ConfigMissing(key))?;
    url::Url::parse(&raw).map_err(|_| EngineError::ConfigMissing(key))
}

fn env_decimal(key: &'static str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Build configuration from environment variables.
    ///
    /// Required: `VENUE_A_REST_URL`, `VENUE_A_MARKET_WS_URL`,
    /// `VENUE_B_REST_URL`, `VENUE_B_MARKET_WS_URL`, `VENUE_B_USER_WS_URL`,
    /// `CREDENTIALS_PATH`. Strategy parameters fall back to sensible
    /// defaults if unset.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a required variable is missing or not a valid URL.
    pub fn from_env() -> Result<Self, EngineError> {
        use rust_decimal_macros::dec;

        Ok(Self {
            venue_a: VenueEndpoints {
                rest_url: env_url("VENUE_A_REST_URL")?,
                market_ws_url: env_url("VENUE_A_MARKET_WS_URL")?,
                user_ws_url: None,
            },
            venue_b: VenueEndpoints {
                rest_url: env_url("VENUE_B_REST_URL")?,
                market_ws_url: env_url("VENUE_B_MARKET_WS_URL")?,
                user_ws_url: Some(env_url("VENUE_B_USER_WS_URL")?),
            },
            strategy: StrategyConfig {
                bid_amount: env_decimal("STRATEGY_BID_AMOUNT", dec!(1.0)),
                profit_target: env_decimal("STRATEGY_PROFIT_TARGET", dec!(0.10)),
                order_update_threshold: env_decimal("STRATEGY_ORDER_UPDATE_THRESHOLD", dec!(0.005)),
                poll_period: Duration::from_secs(
                    env::var("STRATEGY_POLL_PERIOD_SECS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(5),
                ),
            },
            credentials_path: env::var("CREDENTIALS_PATH")
                .unwrap_or_else(|_| "api_credentials.json".to_owned()),
        })
    }
}
