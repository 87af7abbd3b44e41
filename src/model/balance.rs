//! Per-currency balances.

use std::collections::HashMap;

use rust_decimal::Decimal;

/// Free and on-hold amounts of a single currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceEntry {
    /// Available to trade with.
    pub free: Decimal,
    /// Reserved against open orders.
    pub on_hold: Decimal,
}

/// A venue's balances, keyed by currency code (`"BTC"`, `"USD"`).
///
/// An unknown currency reads as a zero balance rather than `None`, matching
/// the convention that a venue we have never traded on has simply never
/// reported a nonzero figure for it.
#[derive(Debug, Clone, Default)]
pub struct Balance {
    entries: HashMap<String, BalanceEntry>,
}

impl Balance {
    /// An empty balance sheet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the entry for `currency`, defaulting to zero.
    #[must_use]
    pub fn get(&self, currency: &str) -> BalanceEntry {
        self.entries.get(currency).copied().unwrap_or_default()
    }

    /// Overwrite the entry for `currency` (the venue's balance snapshot is
    /// authoritative; there is no incremental delta-application here).
    pub fn set(&mut self, currency: impl Into<String>, entry: BalanceEntry) {
        self.entries.insert(currency.into(), entry);
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn unknown_currency_reads_as_zero() {
        let balance = Balance::new();
        assert_eq!(balance.get("BTC"), BalanceEntry::default());
    }

    #[test]
    fn set_overwrites_existing_entry() {
        let mut balance = Balance::new();
        balance.set(
            "USD",
            BalanceEntry {
                free: dec!(100),
                on_hold: dec!(0),
            },
        );
        balance.set(
            "USD",
            BalanceEntry {
                free: dec!(50),
                on_hold: dec!(50),
            },
        );
        assert_eq!(
            balance.get("USD"),
            BalanceEntry {
                free: dec!(50),
                on_hold: dec!(50)
            }
        );
    }
}
