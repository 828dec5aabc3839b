#![deny(warnings)]

//! Economic models for the trading rounds.
//!
//! Everything here is a pure function of its inputs:
//! - Quadratic capital target per round and the initial capital derived from it
//! - Per-round HP damage
//! - Fixed-length calendar rules that bound a round to a quarter
//! - Additive price modifiers used by the item-effect pipeline
//! - Seeded daily candle generation with a sentiment-scaled drift

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sim_core::{round_cents, usd_to_cents, Candle, Symbol, TargetConfig};
use thiserror::Error;

/// Errors produced by economic helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Monetary input must be non-negative.
    #[error("invalid price or cost value")]
    InvalidPrice,
    /// Result does not fit the integer cent range.
    #[error("arithmetic overflow")]
    Overflow,
    /// A floating-point input was NaN or infinite.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Capital target in USD for `round`.
///
/// `R1` for round ≤ 1, otherwise `R1 + A*(r-1) + B*(r-1)^2`. Computed in
/// decimal arithmetic so the result is identical on every call.
///
/// Example:
/// let cfg = TargetConfig::default();
/// assert_eq!(target_usd(3, &cfg), Decimal::new(190_000, 0));
pub fn target_usd(round: u32, cfg: &TargetConfig) -> Decimal {
    if round <= 1 {
        return cfg.round1_usd;
    }
    let r = Decimal::from(round - 1);
    cfg.round1_usd
        .saturating_add(cfg.linear_a.saturating_mul(r))
        .saturating_add(cfg.quad_b.saturating_mul(r).saturating_mul(r))
}

/// Capital target in cents, saturating at `i64::MAX`.
pub fn target_cents(round: u32, cfg: &TargetConfig) -> i64 {
    usd_to_cents(target_usd(round, cfg)).unwrap_or(i64::MAX)
}

/// Starting capital for a round before the per-player ratchet.
///
/// `round(target * ratio)`, then raised by `bonus_percent` when a bonus
/// capital effect is active. Saturates instead of overflowing.
pub fn initial_capital_cents(target_cents: i64, ratio: Decimal, bonus_percent: Option<i64>) -> i64 {
    let base = Decimal::from(target_cents)
        .checked_mul(ratio)
        .and_then(round_cents)
        .unwrap_or(i64::MAX);
    match bonus_percent {
        Some(pct) if pct != 0 => {
            let factor = Decimal::ONE + Decimal::from(pct) / Decimal::ONE_HUNDRED;
            Decimal::from(base)
                .checked_mul(factor)
                .and_then(round_cents)
                .unwrap_or(i64::MAX)
                .max(0)
        }
        _ => base.max(0),
    }
}

/// HP lost by a player who misses the target in `round`; always at least 1.
pub fn round_hp_damage(round: u32, base: i32, inc_per_round: i32) -> i32 {
    if round <= 1 {
        return base.max(1);
    }
    let steps = i32::try_from(round - 1).unwrap_or(i32::MAX);
    base.saturating_add(steps.saturating_mul(inc_per_round.max(0)))
        .max(1)
}

/// Day count of `month` under the fixed calendar: 31 for
/// {1,3,5,7,8,10,12}, 28 for February, 30 otherwise.
pub fn fixed_month_days(month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        2 => 28,
        _ => 30,
    }
}

/// Last trading day of the quarter containing `date`.
///
/// Quarter-end months always have their fixed length in the real calendar,
/// so the date is valid for any year chrono supports.
pub fn quarter_end_fixed(date: NaiveDate) -> Option<NaiveDate> {
    let month = ((date.month() - 1) / 3 + 1) * 3;
    NaiveDate::from_ymd_opt(date.year(), month, fixed_month_days(month))
}

/// First day of the round following the one that started on `date`.
pub fn next_round_start(date: NaiveDate) -> Option<NaiveDate> {
    quarter_end_fixed(date)?.succ_opt()
}

/// Number of trading days in the round that starts on `date`.
pub fn round_day_count(date: NaiveDate) -> u32 {
    quarter_end_fixed(date)
        .map(|end| (end - date).num_days() + 1)
        .and_then(|d| u32::try_from(d).ok())
        .unwrap_or(1)
        .max(1)
}

/// Apply a summed net modifier to a price in cents.
///
/// `final = round(original * (1 + net))`, half away from zero and clamped
/// at zero.
///
/// Example:
/// assert_eq!(apply_modifier(1_000, Decimal::new(35, 2)), Ok(1_350));
pub fn apply_modifier(original_cents: i64, net: Decimal) -> Result<i64, EconError> {
    if original_cents < 0 {
        return Err(EconError::InvalidPrice);
    }
    let factor = Decimal::ONE + net;
    if factor <= Decimal::ZERO {
        return Ok(0);
    }
    Decimal::from(original_cents)
        .checked_mul(factor)
        .and_then(round_cents)
        .map(|v| v.max(0))
        .ok_or(EconError::Overflow)
}

/// Apply a single buy discount: `round(original * (1 - discount))`.
pub fn apply_discount(original_cents: i64, discount: Decimal) -> Result<i64, EconError> {
    apply_modifier(original_cents, -discount)
}

/// Sell bonus proportional to lost HP: `(max_hp - hp) / divisor`.
pub fn hp_loss_bonus(max_hp: i32, hp: i32, divisor: Decimal) -> Decimal {
    if divisor <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let lost = max_hp.saturating_sub(hp).max(0);
    Decimal::from(lost) / divisor
}

/// Sell bonus that grows as players drop out: `(cap - alive)%`, floor 0.
pub fn scarcity_bonus(cap: i64, alive: usize) -> Decimal {
    let alive = i64::try_from(alive).unwrap_or(i64::MAX);
    Decimal::from(cap.saturating_sub(alive).max(0)) / Decimal::ONE_HUNDRED
}

/// Absolute and percent change of a close against the previous close.
pub fn daily_change(prev_close: Decimal, close: Decimal) -> (Decimal, Decimal) {
    let abs = close - prev_close;
    let pct = if prev_close.is_zero() {
        Decimal::ZERO
    } else {
        (abs / prev_close * Decimal::ONE_HUNDRED).round_dp(4)
    };
    (abs, pct)
}

/// Lowest price a generated candle may print.
pub const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

const PRICE_DP: u32 = 4;
const HISTORY_WICK: f64 = 1.5;
const DAILY_WICK: f64 = 1.2;

/// Deterministic seed for a symbol's generator on a given day.
///
/// FNV-1a over the session seed, the symbol bytes and the date, so the
/// same inputs produce the same candle across processes.
pub fn candle_seed(base_seed: u64, symbol: &Symbol, date: Option<NaiveDate>) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET;
    let mut feed = |bytes: &[u8]| {
        for b in bytes {
            h ^= u64::from(*b);
            h = h.wrapping_mul(PRIME);
        }
    };
    feed(&base_seed.to_le_bytes());
    feed(symbol.as_str().as_bytes());
    if let Some(d) = date {
        feed(&d.num_days_from_ce().to_le_bytes());
    }
    h
}

fn to_price(v: f64) -> Result<Decimal, EconError> {
    if !v.is_finite() {
        return Err(EconError::NonFinite);
    }
    Decimal::from_f64(v)
        .map(|d| d.round_dp(PRICE_DP))
        .ok_or(EconError::NonFinite)
}

/// Generate one candle opening at `open`.
///
/// The base drift is uniform in [-2, 2) USD and scaled by
/// `drift_multiplier`; wicks extend up to `wick` USD past the body.
pub fn generate_candle<R: Rng>(
    rng: &mut R,
    date: NaiveDate,
    open: Decimal,
    drift_multiplier: f64,
    wick: f64,
) -> Result<Candle, EconError> {
    if open < Decimal::ZERO {
        return Err(EconError::InvalidPrice);
    }
    if !drift_multiplier.is_finite() || !wick.is_finite() {
        return Err(EconError::NonFinite);
    }
    let base_drift = (rng.gen::<f64>() - 0.5) * 4.0;
    let drift = to_price(base_drift * drift_multiplier)?;
    let close = (open + drift).max(MIN_PRICE);
    let high = open.max(close) + to_price(rng.gen::<f64>() * wick)?;
    let low = (open.min(close) - to_price(rng.gen::<f64>() * wick)?).max(MIN_PRICE);
    let volume = 50_000 + rng.gen_range(0..120_000u64);
    Ok(Candle {
        date,
        open,
        high,
        low,
        close,
        volume,
    })
}

/// Synthetic history of `days` candles ending on `as_of`.
///
/// Each symbol starts at `start_price` plus a small symbol-specific offset
/// so the books do not all print the same number.
pub fn generate_history(
    symbol: &Symbol,
    base_seed: u64,
    as_of: NaiveDate,
    days: u32,
    start_price: Decimal,
) -> Result<Vec<Candle>, EconError> {
    let seed = candle_seed(base_seed, symbol, None);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let offset = Decimal::from(seed % 50);
    let mut prev = (start_price + offset).max(MIN_PRICE);
    let first = as_of
        .checked_sub_signed(ChronoDuration::days(i64::from(days.saturating_sub(1))))
        .ok_or(EconError::Overflow)?;
    let mut out = Vec::with_capacity(days as usize);
    for date in first.iter_days().take(days as usize) {
        let candle = generate_candle(&mut rng, date, prev, 1.0, HISTORY_WICK)?;
        prev = candle.close;
        out.push(candle);
    }
    Ok(out)
}

/// Next daily candle for `symbol`, opening at the previous close.
pub fn daily_candle(
    symbol: &Symbol,
    base_seed: u64,
    date: NaiveDate,
    prev_close: Decimal,
    drift_multiplier: f64,
) -> Result<Candle, EconError> {
    let mut rng = ChaCha8Rng::seed_from_u64(candle_seed(base_seed, symbol, Some(date)));
    generate_candle(&mut rng, date, prev_close, drift_multiplier, DAILY_WICK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn target_scenario_round_three() {
        let cfg = TargetConfig::default();
        assert_eq!(target_usd(1, &cfg), Decimal::new(120_000, 0));
        assert_eq!(target_usd(0, &cfg), Decimal::new(120_000, 0));
        assert_eq!(target_usd(3, &cfg), Decimal::new(190_000, 0));
        assert_eq!(target_cents(3, &cfg), 19_000_000);
    }

    #[test]
    fn target_saturates_on_huge_terms() {
        let cfg = TargetConfig {
            quad_b: Decimal::MAX,
            ..TargetConfig::default()
        };
        assert_eq!(target_cents(10, &cfg), i64::MAX);
    }

    #[test]
    fn initial_capital_applies_ratio_and_bonus() {
        let ratio = Decimal::new(8, 1);
        assert_eq!(initial_capital_cents(12_000_000, ratio, None), 9_600_000);
        assert_eq!(initial_capital_cents(12_000_000, ratio, Some(10)), 10_560_000);
        assert_eq!(initial_capital_cents(12_000_000, ratio, Some(0)), 9_600_000);
        // 3 * 0.5 = 1.5 rounds away from zero
        assert_eq!(initial_capital_cents(3, Decimal::new(5, 1), None), 2);
    }

    #[test]
    fn damage_scenarios() {
        assert_eq!(round_hp_damage(3, 20, 10), 40);
        assert_eq!(round_hp_damage(1, 20, 10), 20);
        assert_eq!(round_hp_damage(1, 0, 10), 1);
        assert_eq!(round_hp_damage(4, 20, -10), 20);
        assert_eq!(round_hp_damage(2, -50, 10), 1);
    }

    #[test]
    fn quarter_end_uses_fixed_months() {
        assert_eq!(quarter_end_fixed(ymd(2026, 2, 15)), Some(ymd(2026, 3, 31)));
        assert_eq!(quarter_end_fixed(ymd(2026, 1, 1)), Some(ymd(2026, 3, 31)));
        assert_eq!(quarter_end_fixed(ymd(2026, 4, 1)), Some(ymd(2026, 6, 30)));
        assert_eq!(quarter_end_fixed(ymd(2026, 9, 30)), Some(ymd(2026, 9, 30)));
        assert_eq!(next_round_start(ymd(2026, 11, 2)), Some(ymd(2027, 1, 1)));
        assert_eq!(round_day_count(ymd(2026, 1, 1)), 90);
        assert_eq!(round_day_count(ymd(2026, 3, 31)), 1);
        assert_eq!(fixed_month_days(2), 28);
        assert_eq!(fixed_month_days(9), 30);
    }

    #[test]
    fn reverse_trade_scenario() {
        assert_eq!(apply_modifier(1_000, Decimal::new(35, 2)), Ok(1_350));
        assert_eq!(apply_modifier(1_001, Decimal::new(35, 2)), Ok(1_351)); // 1351.35
        assert_eq!(apply_modifier(1_000, Decimal::new(-15, 2)), Ok(850));
        assert_eq!(apply_modifier(1_000, Decimal::new(-3, 0)), Ok(0));
        assert_eq!(apply_modifier(-1, Decimal::ZERO), Err(EconError::InvalidPrice));
        assert_eq!(apply_discount(1_005, Decimal::new(10, 2)), Ok(905)); // 904.5
    }

    #[test]
    fn bonus_helpers() {
        assert_eq!(hp_loss_bonus(100, 40, Decimal::new(1000, 0)), Decimal::new(6, 2));
        assert_eq!(hp_loss_bonus(100, 100, Decimal::new(1000, 0)), Decimal::ZERO);
        assert_eq!(scarcity_bonus(8, 3), Decimal::new(5, 2));
        assert_eq!(scarcity_bonus(8, 12), Decimal::ZERO);
    }

    #[test]
    fn daily_change_handles_zero_base() {
        let (abs, pct) = daily_change(Decimal::new(100, 0), Decimal::new(105, 0));
        assert_eq!(abs, Decimal::new(5, 0));
        assert_eq!(pct, Decimal::new(5, 0));
        assert_eq!(daily_change(Decimal::ZERO, Decimal::ONE).1, Decimal::ZERO);
    }

    #[test]
    fn candles_are_deterministic_and_bounded() {
        let s = sym("NOVA");
        let a = daily_candle(&s, 42, ymd(2026, 1, 5), Decimal::new(1000, 0), 1.0).unwrap();
        let b = daily_candle(&s, 42, ymd(2026, 1, 5), Decimal::new(1000, 0), 1.0).unwrap();
        assert_eq!(a, b);
        assert!(a.high >= a.open.max(a.close));
        assert!(a.low <= a.open.min(a.close));
        assert!(a.close >= MIN_PRICE);
        assert!((50_000..170_000).contains(&a.volume));
        let other = daily_candle(&sym("ORBT"), 42, ymd(2026, 1, 5), Decimal::new(1000, 0), 1.0).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn history_ends_on_as_of_and_chains_closes() {
        let hist = generate_history(&sym("KRAK"), 42, ymd(2026, 1, 1), 60, Decimal::new(1000, 0)).unwrap();
        assert_eq!(hist.len(), 60);
        assert_eq!(hist.last().unwrap().date, ymd(2026, 1, 1));
        assert_eq!(hist[0].date, ymd(2025, 11, 3));
        for w in hist.windows(2) {
            assert_eq!(w[0].close, w[1].open);
        }
        assert!(generate_history(&sym("KRAK"), 42, ymd(2026, 1, 1), 0, Decimal::ONE)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn drift_multiplier_scales_the_move() {
        let s = sym("NOVA");
        let d = ymd(2026, 2, 2);
        let open = Decimal::new(1000, 0);
        let one = daily_candle(&s, 1, d, open, 1.0).unwrap();
        let two = daily_candle(&s, 1, d, open, 2.0).unwrap();
        let m1 = one.close - open;
        let m2 = two.close - open;
        assert!((m2 - m1 * Decimal::TWO).abs() <= Decimal::new(2, 4));
    }

    proptest! {
        #[test]
        fn target_is_non_decreasing(r in 1u32..10_000) {
            let cfg = TargetConfig::default();
            prop_assert!(target_usd(r + 1, &cfg) >= target_usd(r, &cfg));
            prop_assert!(target_cents(r + 1, &cfg) >= target_cents(r, &cfg));
        }

        #[test]
        fn damage_is_positive_and_monotone(r in 1u32..500, base in -50i32..200, inc in -20i32..50) {
            let d = round_hp_damage(r, base, inc);
            prop_assert!(d >= 1);
            prop_assert!(round_hp_damage(r + 1, base, inc) >= d);
        }

        #[test]
        fn modifier_never_negative(cents in 0i64..10_000_000_000, net_bp in -20_000i64..20_000) {
            let net = Decimal::new(net_bp, 4);
            prop_assert!(apply_modifier(cents, net).unwrap() >= 0);
            prop_assert_eq!(apply_modifier(cents, Decimal::ZERO).unwrap(), cents);
        }

        #[test]
        fn quarter_end_is_within_quarter(day in 0i64..3_650) {
            let d = ymd(2026, 1, 1) + ChronoDuration::days(day);
            let q = quarter_end_fixed(d).unwrap();
            prop_assert!(q >= d);
            prop_assert_eq!((q.month() - 1) / 3, (d.month() - 1) / 3);
            prop_assert_eq!(q.year(), d.year());
        }
    }
}
