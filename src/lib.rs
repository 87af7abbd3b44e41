#![allow(clippy::module_name_repetitions, rustdoc::broken_intra_doc_links)]
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]
#![deny(unused_must_use)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! A cross-venue BTC/USD arbitrage engine.
//!
//! Two venue clients ([`venue::venue_a::VenueAClient`] and
//! [`venue::venue_b::VenueBClient`]) each own a single
//! [`model::exchange_state::ExchangeState`] and publish changes to it as
//! they process their websocket feeds. The [`strategy::ArbitrageStrategy`]
//! reads both states and issues [`model::action::Action`]s back at the venue
//! whose state it wants to change. The [`coordinator::Coordinator`] runs
//! both venue clients and the strategy loop concurrently and fails the whole
//! run fast if any of them errors.

pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod decimal_utils;
pub mod error;
pub mod model;
pub mod strategy;
pub mod timer;
pub mod venue;
