#![deny(warnings)]

//! Core domain models and invariants for the trading round game.
//!
//! This crate defines serializable types shared by the economic helpers and
//! the authoritative runtime: identifiers, game phases, configuration, the
//! per-player ledger and the item-effect vocabulary.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

pub mod config;
pub mod effect;
pub mod ids;
pub mod ledger;
pub mod market;
pub mod phase;

pub use config::{
    ClockConfig, ConfigError, EffectConfig, GameConfig, HpConfig, ItemConfig, MarketConfig,
    TargetConfig,
};
pub use effect::EffectKind;
pub use ids::{PlayerId, Symbol};
pub use ledger::{LedgerError, Lot, PlayerLedger, PriceSource};
pub use market::{Candle, SentimentLabel, SentimentTarget, Side};
pub use phase::GamePhase;

/// Validation errors for domain inputs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Symbol is empty or whitespace.
    #[error("symbol must not be empty")]
    EmptySymbol,
    /// Symbol contains characters outside [A-Z0-9._-].
    #[error("symbol contains invalid characters: {0}")]
    InvalidSymbol(String),
    /// Unknown effect kind name.
    #[error("unknown effect kind: {0}")]
    UnknownEffect(String),
}

/// Convert USD to integer cents, rounding half away from zero.
///
/// Returns `None` when the result does not fit in an `i64`.
pub fn usd_to_cents(usd: Decimal) -> Option<i64> {
    usd.checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Round a cent amount that may carry fractions, half away from zero.
pub fn round_cents(cents: Decimal) -> Option<i64> {
    cents
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn usd_to_cents_rounds_half_away_from_zero() {
        assert_eq!(usd_to_cents(Decimal::new(190_000, 0)), Some(19_000_000));
        assert_eq!(usd_to_cents(Decimal::new(1005, 3)), Some(101)); // 1.005
        assert_eq!(usd_to_cents(Decimal::new(-1005, 3)), Some(-101));
        assert_eq!(usd_to_cents(Decimal::MAX), None);
    }

    proptest! {
        #[test]
        fn whole_cents_are_exact(c in -1_000_000_000i64..1_000_000_000) {
            prop_assert_eq!(usd_to_cents(Decimal::new(c, 2)), Some(c));
            prop_assert_eq!(round_cents(Decimal::from(c)), Some(c));
        }
    }
}
