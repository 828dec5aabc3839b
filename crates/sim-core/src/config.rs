//! Session configuration and its defaults.
//!
//! Every section carries `#[serde(default)]`, so a YAML file only needs the
//! keys it overrides. [`GameConfig::validate`] must pass before a session
//! is built; the runtime assumes a validated config.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::Symbol;

/// Configuration errors detected at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Value must be strictly positive.
    #[error("{0} must be > 0")]
    NonPositive(&'static str),
    /// Value must be non-negative.
    #[error("{0} must be >= 0")]
    Negative(&'static str),
    /// Value outside its allowed range.
    #[error("{0} is out of range")]
    OutOfRange(&'static str),
    /// The market has no symbols.
    #[error("market needs at least one symbol")]
    NoSymbols,
    /// A symbol is listed twice.
    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
    /// A symbol fails validation.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
    /// YAML could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
}

/// Phase timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Real seconds per in-game trading day.
    pub seconds_per_day: f32,
    /// Length of the Result phase in seconds.
    pub result_duration_secs: f32,
    /// Length of the Prep phase in seconds.
    pub prep_duration_secs: f32,
    /// In-game date of the first trading day.
    pub start_date: NaiveDate,
    /// Countdown granularity of the driver loop.
    pub tick_millis: u64,
    /// Interval of the item-effect timer tick.
    pub effect_tick_millis: u64,
    /// How long defeat/victory screens stay up before disconnect/reset.
    pub end_screen_secs: f32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            seconds_per_day: 3.0,
            result_duration_secs: 10.0,
            prep_duration_secs: 30.0,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or(NaiveDate::MIN),
            tick_millis: 250,
            effect_tick_millis: 1000,
            end_screen_secs: 5.0,
        }
    }
}

/// Upper bound for any configured duration. A whole round of such days still
/// fits in a `Duration`.
pub const MAX_PHASE_SECS: f32 = 86_400.0;

impl ClockConfig {
    pub fn day_length(&self) -> Duration {
        Duration::from_secs_f32(self.seconds_per_day.max(0.0))
    }

    pub fn result_length(&self) -> Duration {
        Duration::from_secs_f32(self.result_duration_secs.max(0.0))
    }

    pub fn prep_length(&self) -> Duration {
        Duration::from_secs_f32(self.prep_duration_secs.max(0.0))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn effect_tick_interval(&self) -> Duration {
        Duration::from_millis(self.effect_tick_millis)
    }

    pub fn end_screen(&self) -> Duration {
        Duration::from_secs_f32(self.end_screen_secs.max(0.1))
    }
}

/// Quadratic capital target and initial-capital policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Target in USD for round 1 (R1).
    pub round1_usd: Decimal,
    /// Linear growth term per round (A).
    pub linear_a: Decimal,
    /// Quadratic growth term per round (B).
    pub quad_b: Decimal,
    /// Share of the target handed out as starting cash, in [0, 1].
    pub initial_capital_ratio: Decimal,
    /// Reset cash to the computed capital each round instead of ratcheting.
    pub allow_downscale: bool,
    /// Cash granted on join before any round starts, in cents.
    pub initial_cash_cents: i64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            round1_usd: Decimal::new(120_000, 0),
            linear_a: Decimal::new(25_000, 0),
            quad_b: Decimal::new(5_000, 0),
            initial_capital_ratio: Decimal::new(8, 1),
            allow_downscale: false,
            initial_cash_cents: 100_00,
        }
    }
}

/// HP and damage policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HpConfig {
    pub max_hp: i32,
    pub base_damage: i32,
    pub damage_inc_per_round: i32,
}

impl Default for HpConfig {
    fn default() -> Self {
        Self {
            max_hp: 100,
            base_damage: 20,
            damage_inc_per_round: 10,
        }
    }
}

/// Magnitudes and thresholds of item effects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    /// Flat sell bonus used by most modifiers (0.05 = 5%).
    pub flat_bonus: Decimal,
    /// Lost HP is divided by this to get the HP-loss bonus.
    pub hp_loss_divisor: Decimal,
    /// Buy-low stacks needed to trigger the bonus.
    pub buy_low_threshold: i64,
    /// Minimum hold time for the long-hold bonus.
    pub long_hold_secs: i64,
    /// Maximum hold time for the short-hold bonus.
    pub short_hold_secs: i64,
    /// Remaining round time at or below which the closing-bell bonus applies.
    pub closing_window_secs: f32,
    /// Player cap in the scarcity bonus `(cap - alive)%`.
    pub scarcity_cap: i64,
    /// Reverse-trade modifier when selling under cost.
    pub reverse_below_cost: Decimal,
    /// Reverse-trade modifier when selling at or above cost.
    pub reverse_above_cost: Decimal,
    /// One-shot buy discount.
    pub skip_buy_discount: Decimal,
    /// Hold time at which dividends start.
    pub dividend_start_secs: i64,
    /// Seconds between dividend payouts.
    pub dividend_interval_secs: i64,
    /// Share of invested amount paid per dividend.
    pub dividend_rate: Decimal,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            flat_bonus: Decimal::new(5, 2),
            hp_loss_divisor: Decimal::new(1000, 0),
            buy_low_threshold: 3,
            long_hold_secs: 40,
            short_hold_secs: 15,
            closing_window_secs: 30.0,
            scarcity_cap: 8,
            reverse_below_cost: Decimal::new(35, 2),
            reverse_above_cost: Decimal::new(-15, 2),
            skip_buy_discount: Decimal::new(10, 2),
            dividend_start_secs: 30,
            dividend_interval_secs: 5,
            dividend_rate: Decimal::new(2, 2),
        }
    }
}

/// Synthetic market parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub symbols: Vec<String>,
    /// Starting price of generated histories in USD.
    pub base_price_usd: f64,
    /// Days of synthetic history generated at startup.
    pub initial_history_days: u32,
    /// Drift multiplier k for positive news (negative uses 1/k).
    pub sentiment_multiplier: f64,
    /// A sentiment signal older than this reverts to neutral.
    pub sentiment_freshness_secs: u64,
    /// Seed for deterministic price generation.
    pub rng_seed: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbols: ["NOVA", "ORBT", "KRAK", "LUMN", "ZEPH"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            base_price_usd: 1000.0,
            initial_history_days: 60,
            sentiment_multiplier: 2.0,
            sentiment_freshness_secs: 300,
            rng_seed: 42,
        }
    }
}

impl MarketConfig {
    pub fn sentiment_freshness(&self) -> Duration {
        Duration::from_secs(self.sentiment_freshness_secs)
    }
}

/// Item distribution policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemConfig {
    /// Items are offered in the Prep phases after rounds 1..=N.
    pub distribution_rounds: u32,
    /// Number of options offered to each player per distribution.
    pub offers_per_player: usize,
    /// Seed for offer shuffling and auto-selection.
    pub rng_seed: u64,
    /// YAML item catalog to use instead of the built-in one.
    pub catalog_path: Option<String>,
}

impl Default for ItemConfig {
    fn default() -> Self {
        Self {
            distribution_rounds: 3,
            offers_per_player: 3,
            rng_seed: 7,
            catalog_path: None,
        }
    }
}

/// Complete session configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub clock: ClockConfig,
    pub target: TargetConfig,
    pub hp: HpConfig,
    pub effects: EffectConfig,
    pub market: MarketConfig,
    pub items: ItemConfig,
}

impl GameConfig {
    /// Parse YAML and validate.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: GameConfig =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml_str(&text)
    }

    /// Parsed, normalized market symbols.
    pub fn symbols(&self) -> Result<Vec<Symbol>, ConfigError> {
        if self.market.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(self.market.symbols.len());
        for raw in &self.market.symbols {
            let s = Symbol::parse(raw).map_err(|_| ConfigError::InvalidSymbol(raw.clone()))?;
            if !seen.insert(s.clone()) {
                return Err(ConfigError::DuplicateSymbol(s.to_string()));
            }
            out.push(s);
        }
        Ok(out)
    }

    /// Reject configurations that would break the scheduler or economics.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.clock;
        if !(c.seconds_per_day.is_finite() && c.seconds_per_day > 0.0) {
            return Err(ConfigError::NonPositive("clock.seconds_per_day"));
        }
        if !(c.result_duration_secs.is_finite() && c.result_duration_secs >= 0.0) {
            return Err(ConfigError::Negative("clock.result_duration_secs"));
        }
        if !(c.prep_duration_secs.is_finite() && c.prep_duration_secs >= 0.0) {
            return Err(ConfigError::Negative("clock.prep_duration_secs"));
        }
        if !c.end_screen_secs.is_finite() {
            return Err(ConfigError::OutOfRange("clock.end_screen_secs"));
        }
        for (key, secs) in [
            ("clock.seconds_per_day", c.seconds_per_day),
            ("clock.result_duration_secs", c.result_duration_secs),
            ("clock.prep_duration_secs", c.prep_duration_secs),
            ("clock.end_screen_secs", c.end_screen_secs),
        ] {
            if secs > MAX_PHASE_SECS {
                return Err(ConfigError::OutOfRange(key));
            }
        }
        if c.tick_millis == 0 {
            return Err(ConfigError::NonPositive("clock.tick_millis"));
        }
        if c.effect_tick_millis == 0 {
            return Err(ConfigError::NonPositive("clock.effect_tick_millis"));
        }

        let t = &self.target;
        if t.round1_usd < Decimal::ZERO {
            return Err(ConfigError::Negative("target.round1_usd"));
        }
        // Negative growth terms would make the target decrease across rounds.
        if t.linear_a < Decimal::ZERO {
            return Err(ConfigError::Negative("target.linear_a"));
        }
        if t.quad_b < Decimal::ZERO {
            return Err(ConfigError::Negative("target.quad_b"));
        }
        if t.initial_capital_ratio < Decimal::ZERO || t.initial_capital_ratio > Decimal::ONE {
            return Err(ConfigError::OutOfRange("target.initial_capital_ratio"));
        }
        if t.initial_cash_cents < 0 {
            return Err(ConfigError::Negative("target.initial_cash_cents"));
        }

        let h = &self.hp;
        if h.max_hp <= 0 {
            return Err(ConfigError::NonPositive("hp.max_hp"));
        }
        if h.damage_inc_per_round < 0 {
            return Err(ConfigError::Negative("hp.damage_inc_per_round"));
        }

        let e = &self.effects;
        if e.hp_loss_divisor <= Decimal::ZERO {
            return Err(ConfigError::NonPositive("effects.hp_loss_divisor"));
        }
        if e.dividend_interval_secs <= 0 {
            return Err(ConfigError::NonPositive("effects.dividend_interval_secs"));
        }
        if e.skip_buy_discount < Decimal::ZERO || e.skip_buy_discount >= Decimal::ONE {
            return Err(ConfigError::OutOfRange("effects.skip_buy_discount"));
        }

        let m = &self.market;
        if !(m.base_price_usd.is_finite() && m.base_price_usd > 0.0) {
            return Err(ConfigError::NonPositive("market.base_price_usd"));
        }
        if !(m.sentiment_multiplier.is_finite() && m.sentiment_multiplier > 0.0) {
            return Err(ConfigError::NonPositive("market.sentiment_multiplier"));
        }
        self.symbols()?;

        if self.items.offers_per_player == 0 {
            return Err(ConfigError::NonPositive("items.offers_per_player"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = GameConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.clock.day_length(), Duration::from_secs(3));
        assert_eq!(cfg.target.round1_usd, Decimal::new(120_000, 0));
        assert_eq!(cfg.symbols().unwrap().len(), 5);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg = GameConfig::from_yaml_str(
            "clock:\n  seconds_per_day: 0.5\nhp:\n  base_damage: 30\nmarket:\n  symbols: [aaa, bbb]\n",
        )
        .unwrap();
        assert_eq!(cfg.clock.seconds_per_day, 0.5);
        assert_eq!(cfg.clock.prep_duration_secs, 30.0);
        assert_eq!(cfg.hp.base_damage, 30);
        assert_eq!(cfg.hp.max_hp, 100);
        assert_eq!(cfg.symbols().unwrap()[0].as_str(), "AAA");
    }

    #[test]
    fn zero_length_day_is_rejected() {
        let mut cfg = GameConfig::default();
        cfg.clock.seconds_per_day = 0.0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositive("clock.seconds_per_day"))
        );
    }

    #[test]
    fn huge_durations_are_rejected() {
        let mut cfg = GameConfig::default();
        cfg.clock.seconds_per_day = 1e20;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::OutOfRange("clock.seconds_per_day"))
        );

        let mut cfg = GameConfig::default();
        cfg.clock.prep_duration_secs = 1e18;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::OutOfRange("clock.prep_duration_secs"))
        );

        let mut cfg = GameConfig::default();
        cfg.clock.seconds_per_day = MAX_PHASE_SECS;
        cfg.validate().unwrap();
        let quarter = cfg.clock.day_length() * 92;
        assert_eq!(quarter, Duration::from_secs(86_400 * 92));
    }

    #[test]
    fn duplicate_symbols_are_rejected() {
        let mut cfg = GameConfig::default();
        cfg.market.symbols = vec!["nova".into(), "NOVA".into()];
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DuplicateSymbol("NOVA".into()))
        );
        cfg.market.symbols.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::NoSymbols));
    }

    #[test]
    fn ratio_and_growth_terms_are_checked() {
        let mut cfg = GameConfig::default();
        cfg.target.initial_capital_ratio = Decimal::new(11, 1);
        assert!(matches!(cfg.validate(), Err(ConfigError::OutOfRange(_))));
        let mut cfg = GameConfig::default();
        cfg.target.quad_b = Decimal::new(-1, 0);
        assert!(matches!(cfg.validate(), Err(ConfigError::Negative(_))));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        assert!(matches!(
            GameConfig::from_yaml_str("clock: [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn yaml_roundtrip() {
        let cfg = GameConfig::default();
        let text = serde_yaml::to_string(&cfg).unwrap();
        let back = GameConfig::from_yaml_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
