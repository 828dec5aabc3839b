//! Item effect vocabulary.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named modifier category granted by an item.
///
/// The integer value stored next to an active effect means different things
/// per kind: a percent (`BonusCapital`), a stack counter (`BuyLowStack`,
/// `BuyHighStack`), seconds since the last buy (`LongHold`, `ShortHold`,
/// `Dividend`) or an unused magnitude for flat bonuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Initial capital raised by a percentage at every round start.
    BonusCapital,
    /// Immediate HP restore; never stored.
    Heal,
    /// Sell bonus proportional to lost HP.
    HpLossBonus,
    /// Sell bonus when holding at least three symbols.
    Diversification,
    /// Stack gained by buying below the average cost.
    BuyLowStack,
    /// Stack gained by buying above the average cost.
    BuyHighStack,
    /// Sell bonus after holding for a long time.
    LongHold,
    /// Sell bonus when flipping quickly.
    ShortHold,
    /// Sell bonus near the end of a round.
    ClosingBell,
    /// Sell bonus growing as players get eliminated.
    Scarcity,
    /// Sell bonus when selling under cost.
    LossSale,
    /// Large bonus under cost, penalty above cost.
    ReverseTrade,
    /// Periodic payout on invested capital while holding.
    Dividend,
    /// One-shot discount on the next buy.
    SkipBuyDiscount,
}

impl EffectKind {
    /// Sell-side modifiers in evaluation order.
    pub const SELL_PIPELINE: [EffectKind; 10] = [
        EffectKind::HpLossBonus,
        EffectKind::Diversification,
        EffectKind::BuyLowStack,
        EffectKind::BuyHighStack,
        EffectKind::LongHold,
        EffectKind::ShortHold,
        EffectKind::ClosingBell,
        EffectKind::Scarcity,
        EffectKind::LossSale,
        EffectKind::ReverseTrade,
    ];

    /// Timers restarted on each buy and advanced by the per-second tick.
    pub const HOLD_TIMERS: [EffectKind; 3] =
        [EffectKind::LongHold, EffectKind::ShortHold, EffectKind::Dividend];

    pub const ALL: [EffectKind; 14] = [
        EffectKind::BonusCapital,
        EffectKind::Heal,
        EffectKind::HpLossBonus,
        EffectKind::Diversification,
        EffectKind::BuyLowStack,
        EffectKind::BuyHighStack,
        EffectKind::LongHold,
        EffectKind::ShortHold,
        EffectKind::ClosingBell,
        EffectKind::Scarcity,
        EffectKind::LossSale,
        EffectKind::ReverseTrade,
        EffectKind::Dividend,
        EffectKind::SkipBuyDiscount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EffectKind::BonusCapital => "bonus_capital",
            EffectKind::Heal => "heal",
            EffectKind::HpLossBonus => "hp_loss_bonus",
            EffectKind::Diversification => "diversification",
            EffectKind::BuyLowStack => "buy_low_stack",
            EffectKind::BuyHighStack => "buy_high_stack",
            EffectKind::LongHold => "long_hold",
            EffectKind::ShortHold => "short_hold",
            EffectKind::ClosingBell => "closing_bell",
            EffectKind::Scarcity => "scarcity",
            EffectKind::LossSale => "loss_sale",
            EffectKind::ReverseTrade => "reverse_trade",
            EffectKind::Dividend => "dividend",
            EffectKind::SkipBuyDiscount => "skip_buy_discount",
        }
    }

    /// Whether the stored value is a counter that starts at zero on activation.
    pub fn starts_at_zero(self) -> bool {
        matches!(
            self,
            EffectKind::BuyLowStack
                | EffectKind::BuyHighStack
                | EffectKind::LongHold
                | EffectKind::ShortHold
                | EffectKind::Dividend
        )
    }

    /// Whether activating the item changes player state immediately instead
    /// of being tracked as an ongoing effect.
    pub fn is_instant(self) -> bool {
        matches!(self, EffectKind::Heal)
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EffectKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        EffectKind::ALL
            .into_iter()
            .find(|k| k.name() == needle)
            .ok_or_else(|| ValidationError::UnknownEffect(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip_through_from_str() {
        for k in EffectKind::ALL {
            assert_eq!(k.name().parse::<EffectKind>().unwrap(), k);
        }
        assert_eq!(
            "Reverse_Trade".parse::<EffectKind>().unwrap(),
            EffectKind::ReverseTrade
        );
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert_eq!(
            "moon_shot".parse::<EffectKind>(),
            Err(ValidationError::UnknownEffect("moon_shot".into()))
        );
    }

    #[test]
    fn sell_pipeline_has_no_duplicates() {
        let mut seen = std::collections::BTreeSet::new();
        for k in EffectKind::SELL_PIPELINE {
            assert!(seen.insert(k));
            assert!(!k.is_instant());
        }
    }
}
