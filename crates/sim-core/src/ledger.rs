//! Per-player cash, holdings and HP.
//!
//! The ledger owns its invariants: cash never goes negative, lots never hold
//! zero shares, and the holdings map mirrors the portfolio. Callers get typed
//! errors instead of clamped surprises when a trade cannot be honoured.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::{round_cents, PlayerId, Symbol};

/// Price used for valuation when a symbol has no quote.
pub const FALLBACK_PRICE_USD: Decimal = Decimal::ONE_HUNDRED;

/// Read access to current market prices.
pub trait PriceSource {
    /// Latest price in USD, or `None` for an unknown symbol.
    fn price_usd(&self, symbol: &Symbol) -> Option<Decimal>;
}

impl PriceSource for BTreeMap<Symbol, Decimal> {
    fn price_usd(&self, symbol: &Symbol) -> Option<Decimal> {
        self.get(symbol).copied()
    }
}

/// Ledger operation failures. None of them mutate state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("quantity must be > 0")]
    NonPositiveQuantity,
    #[error("price must be > 0")]
    NonPositivePrice,
    #[error("insufficient cash: need {needed} cents, have {available}")]
    InsufficientCash { needed: i64, available: i64 },
    #[error("insufficient holdings of {symbol}: have {held}, requested {requested}")]
    InsufficientHoldings {
        symbol: Symbol,
        held: u32,
        requested: u32,
    },
    #[error("arithmetic overflow")]
    Overflow,
}

/// Holding of one symbol with its average cost basis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub symbol: Symbol,
    /// Always > 0 while the lot exists.
    pub quantity: u32,
    /// Average cost per share in cents; may carry fractional cents.
    pub avg_cost_cents: Decimal,
}

impl Lot {
    /// Cost basis of the whole lot in cents.
    pub fn invested_cents(&self) -> Decimal {
        self.avg_cost_cents * Decimal::from(self.quantity)
    }
}

/// Economic state of one player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerLedger {
    id: PlayerId,
    name: String,
    hp: i32,
    max_hp: i32,
    eliminated: bool,
    cash_cents: i64,
    equity_cents: i64,
    /// Capital floor applied at round start; ratchets upward.
    initial_cash_cents: i64,
    holdings: BTreeMap<Symbol, u32>,
    portfolio: Vec<Lot>,
    last_capital_round: u32,
}

impl PlayerLedger {
    pub fn new(id: PlayerId, name: impl Into<String>, max_hp: i32, initial_cash_cents: i64) -> Self {
        let max_hp = max_hp.max(1);
        let cash = initial_cash_cents.max(0);
        Self {
            id,
            name: name.into(),
            hp: max_hp,
            max_hp,
            eliminated: false,
            cash_cents: cash,
            equity_cents: cash,
            initial_cash_cents: cash,
            holdings: BTreeMap::new(),
            portfolio: Vec::new(),
            last_capital_round: 0,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hp(&self) -> i32 {
        self.hp
    }

    pub fn max_hp(&self) -> i32 {
        self.max_hp
    }

    pub fn is_eliminated(&self) -> bool {
        self.eliminated
    }

    /// Still in the game: not eliminated and HP above zero.
    pub fn is_alive(&self) -> bool {
        !self.eliminated && self.hp > 0
    }

    pub fn cash_cents(&self) -> i64 {
        self.cash_cents
    }

    /// Equity as of the last [`PlayerLedger::recalculate_valuation`].
    pub fn equity_cents(&self) -> i64 {
        self.equity_cents
    }

    pub fn initial_cash_cents(&self) -> i64 {
        self.initial_cash_cents
    }

    pub fn portfolio(&self) -> &[Lot] {
        &self.portfolio
    }

    pub fn holdings(&self) -> &BTreeMap<Symbol, u32> {
        &self.holdings
    }

    pub fn holding(&self, symbol: &Symbol) -> u32 {
        self.holdings.get(symbol).copied().unwrap_or(0)
    }

    pub fn lot(&self, symbol: &Symbol) -> Option<&Lot> {
        self.portfolio.iter().find(|l| &l.symbol == symbol)
    }

    pub fn average_cost_cents(&self, symbol: &Symbol) -> Option<Decimal> {
        self.lot(symbol).map(|l| l.avg_cost_cents)
    }

    /// Number of distinct symbols currently held.
    pub fn distinct_symbols(&self) -> usize {
        self.portfolio.len()
    }

    /// Total cost basis across all lots in cents.
    pub fn invested_cents(&self) -> Decimal {
        self.portfolio.iter().map(Lot::invested_cents).sum()
    }

    /// Overwrite cash; negative values clamp to zero.
    pub fn set_cash(&mut self, cents: i64) {
        self.cash_cents = cents.max(0);
    }

    /// Add a non-negative amount to cash.
    pub fn credit(&mut self, cents: i64) -> Result<i64, LedgerError> {
        if cents < 0 {
            return self.debit(cents.checked_neg().ok_or(LedgerError::Overflow)?);
        }
        self.cash_cents = self
            .cash_cents
            .checked_add(cents)
            .ok_or(LedgerError::Overflow)?;
        Ok(self.cash_cents)
    }

    /// Remove cash; fails rather than going negative.
    pub fn debit(&mut self, cents: i64) -> Result<i64, LedgerError> {
        if cents < 0 {
            return self.credit(cents.checked_neg().ok_or(LedgerError::Overflow)?);
        }
        if cents > self.cash_cents {
            return Err(LedgerError::InsufficientCash {
                needed: cents,
                available: self.cash_cents,
            });
        }
        self.cash_cents -= cents;
        Ok(self.cash_cents)
    }

    /// Set HP within `[0, max_hp]`; reaching zero eliminates the player.
    pub fn set_hp(&mut self, value: i32) {
        self.hp = value.clamp(0, self.max_hp);
        if self.hp <= 0 {
            self.eliminated = true;
        }
    }

    pub fn damage(&mut self, amount: i32) {
        if amount > 0 {
            self.set_hp(self.hp.saturating_sub(amount));
        }
    }

    pub fn heal(&mut self, amount: i32) {
        if amount > 0 && !self.eliminated {
            self.set_hp(self.hp.saturating_add(amount));
        }
    }

    pub fn mark_eliminated(&mut self) {
        self.eliminated = true;
    }

    /// Pay for and record a purchase at `unit_cents` per share.
    ///
    /// Returns the amount debited.
    pub fn buy(&mut self, symbol: &Symbol, qty: u32, unit_cents: i64) -> Result<i64, LedgerError> {
        if qty == 0 {
            return Err(LedgerError::NonPositiveQuantity);
        }
        if unit_cents <= 0 {
            return Err(LedgerError::NonPositivePrice);
        }
        let total = unit_cents
            .checked_mul(i64::from(qty))
            .ok_or(LedgerError::Overflow)?;
        let held = self.holding(symbol);
        let next_held = held.checked_add(qty).ok_or(LedgerError::Overflow)?;
        self.debit(total)?;

        let unit = Decimal::from(unit_cents);
        match self.portfolio.iter_mut().find(|l| &l.symbol == symbol) {
            Some(lot) => {
                let cost = lot.invested_cents() + unit * Decimal::from(qty);
                lot.quantity += qty;
                lot.avg_cost_cents = cost / Decimal::from(lot.quantity);
            }
            None => self.portfolio.push(Lot {
                symbol: symbol.clone(),
                quantity: qty,
                avg_cost_cents: unit,
            }),
        }
        self.holdings.insert(symbol.clone(), next_held);
        Ok(total)
    }

    /// Remove shares and credit the proceeds at `unit_cents` per share.
    ///
    /// Returns the amount credited. The average cost of the remaining shares
    /// is unchanged.
    pub fn sell(&mut self, symbol: &Symbol, qty: u32, unit_cents: i64) -> Result<i64, LedgerError> {
        if qty == 0 {
            return Err(LedgerError::NonPositiveQuantity);
        }
        if unit_cents < 0 {
            return Err(LedgerError::NonPositivePrice);
        }
        let held = self.holding(symbol);
        if held < qty {
            return Err(LedgerError::InsufficientHoldings {
                symbol: symbol.clone(),
                held,
                requested: qty,
            });
        }
        let total = unit_cents
            .checked_mul(i64::from(qty))
            .ok_or(LedgerError::Overflow)?;
        self.cash_cents.checked_add(total).ok_or(LedgerError::Overflow)?;

        self.remove_shares(symbol, qty);
        self.credit(total)?;
        Ok(total)
    }

    fn remove_shares(&mut self, symbol: &Symbol, qty: u32) {
        if let Some(idx) = self.portfolio.iter().position(|l| &l.symbol == symbol) {
            let lot = &mut self.portfolio[idx];
            lot.quantity = lot.quantity.saturating_sub(qty);
            if lot.quantity == 0 {
                self.portfolio.remove(idx);
            }
        }
        let left = self.holding(symbol).saturating_sub(qty);
        if left > 0 {
            self.holdings.insert(symbol.clone(), left);
        } else {
            self.holdings.remove(symbol);
        }
    }

    /// Sell every lot at the current price and credit the proceeds.
    ///
    /// Returns the realized amount. Running it on an empty portfolio is a
    /// no-op that returns zero.
    pub fn liquidate_all<P: PriceSource + ?Sized>(&mut self, prices: &P) -> i64 {
        let mut realized: i64 = 0;
        for lot in std::mem::take(&mut self.portfolio) {
            let value = position_value_cents(prices, &lot.symbol, lot.quantity);
            realized = realized.saturating_add(value);
        }
        self.holdings.clear();
        self.cash_cents = self.cash_cents.saturating_add(realized.max(0));
        self.recalculate_valuation(prices);
        realized
    }

    /// Recompute equity as cash plus the market value of all lots.
    pub fn recalculate_valuation<P: PriceSource + ?Sized>(&mut self, prices: &P) -> i64 {
        let held: i64 = self
            .portfolio
            .iter()
            .map(|l| position_value_cents(prices, &l.symbol, l.quantity))
            .fold(0i64, i64::saturating_add);
        self.equity_cents = self.cash_cents.saturating_add(held);
        self.equity_cents
    }

    /// Apply the round's starting capital once per round.
    ///
    /// Without downscale the capital floor and cash only move up; with it,
    /// cash resets to exactly `desired_cents`. Returns whether anything was
    /// applied.
    pub fn apply_round_capital(&mut self, round: u32, desired_cents: i64, allow_downscale: bool) -> bool {
        if round == 0 || self.last_capital_round == round || !self.is_alive() {
            return false;
        }
        let desired = desired_cents.max(0);
        if allow_downscale {
            self.initial_cash_cents = desired;
            self.cash_cents = desired;
        } else {
            self.initial_cash_cents = self.initial_cash_cents.max(desired);
            self.cash_cents = self.cash_cents.max(self.initial_cash_cents);
        }
        self.last_capital_round = round;
        true
    }

    pub fn last_capital_round(&self) -> u32 {
        self.last_capital_round
    }
}

/// Market value of `qty` shares in cents, rounded half away from zero.
pub fn position_value_cents<P: PriceSource + ?Sized>(prices: &P, symbol: &Symbol, qty: u32) -> i64 {
    let price = prices.price_usd(symbol).unwrap_or_else(|| {
        warn!(%symbol, "no quote for held symbol; using fallback price");
        FALLBACK_PRICE_USD
    });
    price
        .checked_mul(Decimal::from(qty))
        .and_then(|v| v.checked_mul(Decimal::ONE_HUNDRED))
        .and_then(round_cents)
        .unwrap_or(i64::MAX)
}
