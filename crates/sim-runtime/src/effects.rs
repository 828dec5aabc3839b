//! Per-player store of active item effects.
//!
//! Presence of a key means the effect is active; the stored integer is a
//! magnitude, a stack counter or a seconds counter depending on the kind.

use sim_core::{EffectConfig, EffectKind, PlayerId};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default)]
pub struct EffectTracker {
    active: BTreeMap<PlayerId, BTreeMap<EffectKind, i64>>,
}

impl EffectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, player: PlayerId, kind: EffectKind) -> bool {
        self.active
            .get(&player)
            .is_some_and(|m| m.contains_key(&kind))
    }

    /// Stored value, or 0 when the effect is not active.
    pub fn value(&self, player: PlayerId, kind: EffectKind) -> i64 {
        self.active
            .get(&player)
            .and_then(|m| m.get(&kind))
            .copied()
            .unwrap_or(0)
    }

    /// Insert or overwrite an effect.
    pub fn add(&mut self, player: PlayerId, kind: EffectKind, value: i64) {
        self.active.entry(player).or_default().insert(kind, value);
        debug!(%player, effect = %kind, value, "effect set");
    }

    /// Activate an effect by its name; unknown names are ignored.
    pub fn add_by_name(&mut self, player: PlayerId, name: &str, value: i64) -> bool {
        match name.parse::<EffectKind>() {
            Ok(kind) => {
                self.add(player, kind, value);
                true
            }
            Err(err) => {
                warn!(%player, %err, "ignoring unknown effect");
                false
            }
        }
    }

    /// Remove an effect, returning its last value.
    pub fn remove(&mut self, player: PlayerId, kind: EffectKind) -> Option<i64> {
        let map = self.active.get_mut(&player)?;
        let old = map.remove(&kind);
        if map.is_empty() {
            self.active.remove(&player);
        }
        old
    }

    pub fn clear_player(&mut self, player: PlayerId) {
        self.active.remove(&player);
    }

    pub fn clear_all(&mut self) {
        self.active.clear();
    }

    /// Copy of a player's active effects in kind order.
    pub fn effects_of(&self, player: PlayerId) -> Vec<(EffectKind, i64)> {
        self.active
            .get(&player)
            .map(|m| m.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default()
    }

    /// Reset every active hold timer of `player` to zero.
    pub fn restart_hold_timers(&mut self, player: PlayerId) {
        if let Some(map) = self.active.get_mut(&player) {
            for kind in EffectKind::HOLD_TIMERS {
                if let Some(v) = map.get_mut(&kind) {
                    *v = 0;
                }
            }
        }
    }

    /// Advance every hold timer by one second.
    ///
    /// Returns the players whose dividend timer has just reached a payout
    /// point: `t >= start` and `(t - start) % interval == 0`.
    pub fn tick_hold_timers(&mut self, cfg: &EffectConfig) -> Vec<PlayerId> {
        let mut due = Vec::new();
        for (player, map) in self.active.iter_mut() {
            for kind in EffectKind::HOLD_TIMERS {
                let Some(t) = map.get_mut(&kind) else {
                    continue;
                };
                *t = t.saturating_add(1);
                if kind == EffectKind::Dividend
                    && *t >= cfg.dividend_start_secs
                    && (*t - cfg.dividend_start_secs) % cfg.dividend_interval_secs.max(1) == 0
                {
                    due.push(*player);
                }
            }
        }
        due
    }

    pub fn player_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: PlayerId = PlayerId(1);

    #[test]
    fn presence_is_activation() {
        let mut t = EffectTracker::new();
        assert!(!t.has(P, EffectKind::LossSale));
        assert_eq!(t.value(P, EffectKind::LossSale), 0);
        t.add(P, EffectKind::BuyLowStack, 0);
        assert!(t.has(P, EffectKind::BuyLowStack));
        t.add(P, EffectKind::BuyLowStack, 2);
        assert_eq!(t.value(P, EffectKind::BuyLowStack), 2);
        assert_eq!(t.remove(P, EffectKind::BuyLowStack), Some(2));
        assert_eq!(t.remove(P, EffectKind::BuyLowStack), None);
        assert_eq!(t.player_count(), 0);
    }

    #[test]
    fn unknown_names_are_a_no_op() {
        let mut t = EffectTracker::new();
        assert!(!t.add_by_name(P, "time_travel", 5));
        assert!(t.effects_of(P).is_empty());
        assert!(t.add_by_name(P, "Scarcity", 100));
        assert!(t.has(P, EffectKind::Scarcity));
    }

    #[test]
    fn dividend_pays_at_thirty_then_every_five() {
        let cfg = EffectConfig::default();
        let mut t = EffectTracker::new();
        t.add(P, EffectKind::Dividend, 0);
        t.add(P, EffectKind::LongHold, 0);
        let mut paid_at = Vec::new();
        for sec in 1..=41 {
            if t.tick_hold_timers(&cfg).contains(&P) {
                paid_at.push(sec);
            }
        }
        assert_eq!(paid_at, vec![30, 35, 40]);
        assert_eq!(t.value(P, EffectKind::LongHold), 41);

        t.restart_hold_timers(P);
        assert_eq!(t.value(P, EffectKind::Dividend), 0);
        assert_eq!(t.value(P, EffectKind::LongHold), 0);
        assert!(!t.has(P, EffectKind::ShortHold));
    }

    #[test]
    fn clear_removes_everything() {
        let mut t = EffectTracker::new();
        t.add(P, EffectKind::Scarcity, 100);
        t.add(PlayerId(2), EffectKind::Scarcity, 100);
        t.clear_player(P);
        assert!(!t.has(P, EffectKind::Scarcity));
        assert!(t.has(PlayerId(2), EffectKind::Scarcity));
        t.clear_all();
        assert_eq!(t.player_count(), 0);
    }
}
