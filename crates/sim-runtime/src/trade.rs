//! Inbound trade commands and their rejection reasons.

use serde::{Deserialize, Serialize};
use sim_core::{EffectKind, GamePhase, LedgerError, PlayerId, Side, Symbol};
use thiserror::Error;

/// Why a trade command was refused. A rejected command changes nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TradeRejection {
    #[error("trading is closed during {0}")]
    WrongPhase(GamePhase),
    #[error("trading is paused")]
    Paused,
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),
    #[error("quantity must be > 0")]
    NonPositiveQuantity,
    #[error("price must be > 0")]
    NonPositivePrice,
    #[error("quoted {quoted} cents but the market is at {current}")]
    StalePrice { quoted: i64, current: i64 },
    #[error("insufficient cash: need {needed} cents, have {available}")]
    InsufficientCash { needed: i64, available: i64 },
    #[error("insufficient holdings: have {held}, requested {requested}")]
    InsufficientHoldings { held: u32, requested: u32 },
    #[error("{caller} may not trade for {target}")]
    NotAuthorized { caller: PlayerId, target: PlayerId },
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("player {0} is eliminated")]
    Eliminated(PlayerId),
    #[error("amount out of range")]
    Overflow,
}

impl From<LedgerError> for TradeRejection {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NonPositiveQuantity => TradeRejection::NonPositiveQuantity,
            LedgerError::NonPositivePrice => TradeRejection::NonPositivePrice,
            LedgerError::InsufficientCash { needed, available } => {
                TradeRejection::InsufficientCash { needed, available }
            }
            LedgerError::InsufficientHoldings { held, requested, .. } => {
                TradeRejection::InsufficientHoldings { held, requested }
            }
            LedgerError::Overflow => TradeRejection::Overflow,
        }
    }
}

/// A buy or sell as received from a player session.
///
/// Fields are raw so validation happens in one place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCommand {
    /// Authenticated session issuing the command.
    pub caller: PlayerId,
    /// Ledger the trade applies to.
    pub target: PlayerId,
    pub side: Side,
    pub symbol: String,
    pub quantity: i64,
    /// Per-share price the client saw.
    pub unit_price_cents: i64,
}

impl TradeCommand {
    pub fn buy(player: PlayerId, symbol: &str, quantity: i64, unit_price_cents: i64) -> Self {
        Self::new(player, Side::Buy, symbol, quantity, unit_price_cents)
    }

    pub fn sell(player: PlayerId, symbol: &str, quantity: i64, unit_price_cents: i64) -> Self {
        Self::new(player, Side::Sell, symbol, quantity, unit_price_cents)
    }

    fn new(player: PlayerId, side: Side, symbol: &str, quantity: i64, unit_price_cents: i64) -> Self {
        Self {
            caller: player,
            target: player,
            side,
            symbol: symbol.to_string(),
            quantity,
            unit_price_cents,
        }
    }

    /// Stateless checks: authority, symbol syntax, quantity and price.
    pub fn validate(&self) -> Result<(Symbol, u32), TradeRejection> {
        if self.caller != self.target {
            return Err(TradeRejection::NotAuthorized {
                caller: self.caller,
                target: self.target,
            });
        }
        let symbol = Symbol::parse(&self.symbol)
            .map_err(|_| TradeRejection::InvalidSymbol(self.symbol.clone()))?;
        if self.quantity <= 0 {
            return Err(TradeRejection::NonPositiveQuantity);
        }
        let quantity = u32::try_from(self.quantity).map_err(|_| TradeRejection::Overflow)?;
        if self.unit_price_cents <= 0 {
            return Err(TradeRejection::NonPositivePrice);
        }
        Ok((symbol, quantity))
    }
}

/// What an executed trade did to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TradeReceipt {
    pub player: PlayerId,
    pub side: Side,
    pub symbol: Symbol,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub final_unit_cents: i64,
    pub total_cents: i64,
    pub cash_after_cents: i64,
    pub held_after: u32,
    pub effects: Vec<EffectKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_order_and_messages() {
        let mut cmd = TradeCommand::buy(PlayerId(1), " nova ", 3, 1_000);
        assert_eq!(cmd.validate().unwrap(), (Symbol::parse("NOVA").unwrap(), 3));

        cmd.target = PlayerId(2);
        assert_eq!(
            cmd.validate(),
            Err(TradeRejection::NotAuthorized {
                caller: PlayerId(1),
                target: PlayerId(2)
            })
        );

        let bad = TradeCommand::sell(PlayerId(1), "no va", 1, 1);
        assert!(matches!(bad.validate(), Err(TradeRejection::InvalidSymbol(_))));
        assert_eq!(
            TradeCommand::sell(PlayerId(1), "NOVA", 0, 1).validate(),
            Err(TradeRejection::NonPositiveQuantity)
        );
        assert_eq!(
            TradeCommand::sell(PlayerId(1), "NOVA", i64::MAX, 1).validate(),
            Err(TradeRejection::Overflow)
        );
        assert_eq!(
            TradeCommand::buy(PlayerId(1), "NOVA", 1, 0).validate(),
            Err(TradeRejection::NonPositivePrice)
        );
    }

    #[test]
    fn ledger_errors_map_to_rejections() {
        let err = LedgerError::InsufficientHoldings {
            symbol: Symbol::parse("NOVA").unwrap(),
            held: 1,
            requested: 2,
        };
        assert_eq!(
            TradeRejection::from(err).to_string(),
            "insufficient holdings: have 1, requested 2"
        );
        assert_eq!(
            TradeRejection::WrongPhase(GamePhase::Prep).to_string(),
            format!("trading is closed during {}", GamePhase::Prep)
        );
    }
}
