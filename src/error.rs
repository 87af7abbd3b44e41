//! Main crate error.

use crate::model::order::OrderId;

/// Crate-wide error type. Every fatal path in the venue dispatch tables and
/// the strategy loop returns one of these variants; the coordinator treats
/// all of them as fail-fast (see [`crate::coordinator::Coordinator::run`]).
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// A transport-level failure (connection reset, timeout, DNS) that is
    /// expected to be transient but is still treated as fatal for the task
    /// that observed it, so the coordinator can restart the whole run.
    #[error("transport error on {venue}: {source}")]
    Transport {
        /// Venue identifier the error occurred on.
        venue: &'static str,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },
    /// The venue sent a message that violates the wire protocol's invariants
    /// (bad sequence number, unexpected subscription ack, heartbeat outside
    /// tolerance, order cancelled without our request).
    #[error("protocol violation on {venue}: {reason}")]
    ProtocolViolation {
        /// Venue identifier the error occurred on.
        venue: &'static str,
        /// Human-readable description of the violated invariant.
        reason: String,
    },
    /// A message could not be decoded into the expected shape.
    #[error("failed to parse wire message on {venue}: {source}")]
    WireParse {
        /// Venue identifier the error occurred on.
        venue: &'static str,
        /// Underlying parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// A REST call returned a non-success status or a body that the venue's
    /// own envelope marks as an error.
    #[error("REST call to {venue} failed: {reason}")]
    RestNonSuccess {
        /// Venue identifier the error occurred on.
        venue: &'static str,
        /// Reason extracted from the response envelope.
        reason: String,
    },
    /// A business-rule violation surfaced by a venue (reject, cancel-reject)
    /// that does not necessarily end the run but must be logged and
    /// accounted for against the affected order.
    #[error("order {order_id} rejected by {venue}: {reason}")]
    Business {
        /// Venue identifier the error occurred on.
        venue: &'static str,
        /// Order the rejection applies to.
        order_id: OrderId,
        /// Reason given by the venue.
        reason: String,
    },
    /// The strategy observed a state that violates one of its own sanity
    /// contracts (see spec.md §4.5) and must stop rather than act on it.
    #[error("strategy contract violated: {0}")]
    StrategyContract(String),
    /// An action would require more balance than is currently free.
    #[error("insufficient balance on {venue}: need {needed}, have {available}")]
    InsufficientBalance {
        /// Venue identifier the error occurred on.
        venue: &'static str,
        /// Amount required by the action.
        needed: rust_decimal::Decimal,
        /// Amount currently free.
        available: rust_decimal::Decimal,
    },
    /// Required configuration or credentials are missing.
    #[error("configuration missing: {0}")]
    ConfigMissing(&'static str),
}

impl From<reqwest::Error> for EngineError {
    fn from(source: reqwest::Error) -> Self {
        EngineError::Transport {
            venue: "unknown",
            source: source.into(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(source: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::Transport {
            venue: "unknown",
            source: source.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(source: serde_json::Error) -> Self {
        EngineError::WireParse {
            venue: "unknown",
            source,
        }
    }
}
