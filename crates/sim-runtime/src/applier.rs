//! Trade-time composition of item effects.
//!
//! Quoting is pure: it reads the ledger and the effect store and returns the
//! final per-share price plus the list of effects that contributed. The
//! caller commits the ledger change first and only then calls
//! [`commit_buy`] or [`commit_sell`] to consume one-shot effects and update
//! counters, so a rejected trade never burns an effect.

use rust_decimal::Decimal;
use sim_core::{EffectConfig, EffectKind, PlayerLedger, Symbol};
use sim_econ::{apply_discount, apply_modifier, hp_loss_bonus, scarcity_bonus, EconError};
use tracing::debug;

use crate::effects::EffectTracker;

/// Game state a sell modifier may depend on.
#[derive(Clone, Copy, Debug)]
pub struct MarketMoment {
    /// Real seconds left in the current Round phase.
    pub round_remaining_secs: f32,
    /// Players neither eliminated nor at zero HP.
    pub alive_players: usize,
}

/// Result of running a pipeline over one per-share price.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceQuote {
    pub original_cents: i64,
    pub final_cents: i64,
    /// Sum of all contributions, e.g. 0.35 for +35%.
    pub net: Decimal,
    /// Effects that contributed a non-zero amount, in evaluation order.
    pub applied: Vec<EffectKind>,
}

impl PriceQuote {
    fn unmodified(cents: i64) -> Self {
        Self {
            original_cents: cents,
            final_cents: cents,
            net: Decimal::ZERO,
            applied: Vec::new(),
        }
    }

    pub fn applied(&self, kind: EffectKind) -> bool {
        self.applied.contains(&kind)
    }
}

/// Buy side: at most one discount.
pub fn quote_buy(
    ledger: &PlayerLedger,
    effects: &EffectTracker,
    cfg: &EffectConfig,
    unit_cents: i64,
) -> Result<PriceQuote, EconError> {
    let player = ledger.id();
    if !effects.has(player, EffectKind::SkipBuyDiscount) || cfg.skip_buy_discount.is_zero() {
        return Ok(PriceQuote::unmodified(unit_cents));
    }
    let final_cents = apply_discount(unit_cents, cfg.skip_buy_discount)?;
    debug!(%player, discount = %cfg.skip_buy_discount, "buy discount");
    Ok(PriceQuote {
        original_cents: unit_cents,
        final_cents,
        net: -cfg.skip_buy_discount,
        applied: vec![EffectKind::SkipBuyDiscount],
    })
}

/// Contribution of one sell-side effect, or `None` when its condition fails.
fn sell_contribution(
    kind: EffectKind,
    ledger: &PlayerLedger,
    effects: &EffectTracker,
    cfg: &EffectConfig,
    moment: MarketMoment,
    symbol: &Symbol,
    unit_cents: i64,
) -> Option<Decimal> {
    let player = ledger.id();
    let below_cost = || {
        ledger
            .average_cost_cents(symbol)
            .map(|avg| Decimal::from(unit_cents) < avg)
    };
    let flat = Some(cfg.flat_bonus);
    match kind {
        EffectKind::HpLossBonus => {
            Some(hp_loss_bonus(ledger.max_hp(), ledger.hp(), cfg.hp_loss_divisor))
        }
        EffectKind::Diversification => flat.filter(|_| ledger.distinct_symbols() >= 3),
        EffectKind::BuyLowStack => {
            flat.filter(|_| effects.value(player, kind) >= cfg.buy_low_threshold)
        }
        EffectKind::BuyHighStack => flat.filter(|_| effects.value(player, kind) > 0),
        EffectKind::LongHold => flat.filter(|_| effects.value(player, kind) >= cfg.long_hold_secs),
        EffectKind::ShortHold => {
            flat.filter(|_| effects.value(player, kind) <= cfg.short_hold_secs)
        }
        EffectKind::ClosingBell => {
            flat.filter(|_| moment.round_remaining_secs <= cfg.closing_window_secs)
        }
        EffectKind::Scarcity => Some(scarcity_bonus(cfg.scarcity_cap, moment.alive_players)),
        EffectKind::LossSale => flat.filter(|_| below_cost() == Some(true)),
        EffectKind::ReverseTrade => below_cost().map(|below| {
            if below {
                cfg.reverse_below_cost
            } else {
                cfg.reverse_above_cost
            }
        }),
        EffectKind::BonusCapital
        | EffectKind::Heal
        | EffectKind::Dividend
        | EffectKind::SkipBuyDiscount => None,
    }
}

/// Sell side: sum every applicable bonus or penalty, then apply once.
pub fn quote_sell(
    ledger: &PlayerLedger,
    effects: &EffectTracker,
    cfg: &EffectConfig,
    moment: MarketMoment,
    symbol: &Symbol,
    unit_cents: i64,
) -> Result<PriceQuote, EconError> {
    let player = ledger.id();
    let mut net = Decimal::ZERO;
    let mut applied = Vec::new();
    for kind in EffectKind::SELL_PIPELINE {
        if !effects.has(player, kind) {
            continue;
        }
        let Some(part) =
            sell_contribution(kind, ledger, effects, cfg, moment, symbol, unit_cents)
        else {
            continue;
        };
        if part.is_zero() {
            continue;
        }
        debug!(%player, effect = %kind, %part, "sell modifier");
        net += part;
        applied.push(kind);
    }
    if applied.is_empty() {
        return Ok(PriceQuote::unmodified(unit_cents));
    }
    Ok(PriceQuote {
        original_cents: unit_cents,
        final_cents: apply_modifier(unit_cents, net)?,
        net,
        applied,
    })
}

/// Effect bookkeeping after a successful buy.
///
/// `avg_before` is the symbol's average cost before this purchase; stacks
/// compare the market unit price against it.
pub fn commit_buy(
    effects: &mut EffectTracker,
    ledger: &PlayerLedger,
    quote: &PriceQuote,
    avg_before: Option<Decimal>,
) {
    let player = ledger.id();
    if quote.applied(EffectKind::SkipBuyDiscount) {
        effects.remove(player, EffectKind::SkipBuyDiscount);
    }
    if let Some(avg) = avg_before {
        let unit = Decimal::from(quote.original_cents);
        if unit < avg && effects.has(player, EffectKind::BuyLowStack) {
            let n = effects.value(player, EffectKind::BuyLowStack) + 1;
            effects.add(player, EffectKind::BuyLowStack, n);
        }
        if unit > avg && effects.has(player, EffectKind::BuyHighStack) {
            let n = effects.value(player, EffectKind::BuyHighStack) + 1;
            effects.add(player, EffectKind::BuyHighStack, n);
        }
    }
    effects.restart_hold_timers(player);
}

/// Effect bookkeeping after a successful sell: triggered stacks restart.
pub fn commit_sell(effects: &mut EffectTracker, ledger: &PlayerLedger, quote: &PriceQuote) {
    let player = ledger.id();
    for kind in [EffectKind::BuyLowStack, EffectKind::BuyHighStack] {
        if quote.applied(kind) {
            effects.add(player, kind, 0);
        }
    }
}

/// Dividend owed on the current cost basis, in cents.
pub fn dividend_cents(ledger: &PlayerLedger, cfg: &EffectConfig) -> i64 {
    let invested = ledger.invested_cents();
    if invested <= Decimal::ZERO {
        return 0;
    }
    sim_core::round_cents(invested * cfg.dividend_rate)
        .unwrap_or(0)
        .max(0)
}
