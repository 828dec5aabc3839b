//! End-of-round settlement.
//!
//! Liquidates every surviving player at the current close, compares the
//! resulting equity with the round target and applies HP damage. The whole
//! pass runs under the session's exclusive borrow, which doubles as the
//! barrier against trades.

use serde::Serialize;
use sim_core::{HpConfig, PlayerId, PlayerLedger, PriceSource};
use sim_econ::round_hp_damage;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlayerOutcome {
    pub player: PlayerId,
    pub liquidated_cents: i64,
    pub equity_cents: i64,
    pub passed: bool,
    pub damage: i32,
    pub hp_after: i32,
    /// Eliminated by this settlement.
    pub eliminated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "player", rename_all = "snake_case")]
pub enum Verdict {
    /// Two or more players remain.
    Continue,
    Victory(PlayerId),
    NoSurvivors,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SettlementReport {
    pub round: u32,
    pub target_cents: i64,
    pub damage: i32,
    pub outcomes: Vec<PlayerOutcome>,
    pub survivors: Vec<PlayerId>,
    pub verdict: Verdict,
}

impl SettlementReport {
    pub fn newly_eliminated(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.eliminated)
            .map(|o| o.player)
    }
}

/// Settle one round for every ledger in `ledgers`.
///
/// Already-eliminated players are skipped. Liquidation uses the prices as
/// they are now; no new day is generated here.
pub fn settle_round<'a, P, I>(
    round: u32,
    target_cents: i64,
    hp: &HpConfig,
    ledgers: I,
    prices: &P,
) -> SettlementReport
where
    P: PriceSource + ?Sized,
    I: IntoIterator<Item = &'a mut PlayerLedger>,
{
    let damage = round_hp_damage(round, hp.base_damage, hp.damage_inc_per_round);
    let mut outcomes = Vec::new();
    let mut survivors = Vec::new();

    for ledger in ledgers {
        if ledger.is_eliminated() {
            continue;
        }
        let liquidated = ledger.liquidate_all(prices);
        let equity = ledger.recalculate_valuation(prices);
        let passed = equity >= target_cents;
        let mut dealt = 0;
        if !passed {
            ledger.damage(damage);
            dealt = damage;
        }
        let eliminated = !ledger.is_alive();
        if eliminated {
            ledger.mark_eliminated();
        } else {
            survivors.push(ledger.id());
        }
        info!(
            player = %ledger.id(),
            round,
            equity_cents = equity,
            target_cents,
            passed,
            hp = ledger.hp(),
            eliminated,
            "settled"
        );
        outcomes.push(PlayerOutcome {
            player: ledger.id(),
            liquidated_cents: liquidated,
            equity_cents: equity,
            passed,
            damage: dealt,
            hp_after: ledger.hp(),
            eliminated,
        });
    }

    let verdict = match survivors.as_slice() {
        [] => Verdict::NoSurvivors,
        [only] => Verdict::Victory(*only),
        _ => Verdict::Continue,
    };
    SettlementReport {
        round,
        target_cents,
        damage,
        outcomes,
        survivors,
        verdict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use sim_core::Symbol;
    use std::collections::BTreeMap;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn prices(usd: i64) -> BTreeMap<Symbol, Decimal> {
        [(sym("NOVA"), Decimal::new(usd, 0))].into_iter().collect()
    }

    #[test]
    fn liquidates_and_damages_below_target() {
        let hp = HpConfig::default();
        let mut rich = PlayerLedger::new(PlayerId(1), "rich", 100, 0);
        rich.set_cash(10_000_000);
        rich.buy(&sym("NOVA"), 100, 100_000).unwrap();
        let mut poor = PlayerLedger::new(PlayerId(2), "poor", 100, 1_000);
        let mut ledgers = vec![rich, poor.clone()];

        let report = settle_round(3, 19_000_000, &hp, ledgers.iter_mut(), &prices(2_000));
        assert_eq!(report.damage, 40);
        let r = &report.outcomes[0];
        assert_eq!(r.liquidated_cents, 20_000_000);
        assert!(r.passed);
        assert_eq!(r.hp_after, 100);
        assert!(ledgers[0].portfolio().is_empty());
        assert_eq!(ledgers[0].cash_cents(), 20_000_000);
        assert_eq!(ledgers[0].equity_cents(), 20_000_000);

        let p = &report.outcomes[1];
        assert!(!p.passed);
        assert_eq!(p.hp_after, 60);
        assert_eq!(report.verdict, Verdict::Continue);

        poor.set_hp(40);
        let mut solo = vec![poor];
        let report = settle_round(3, 19_000_000, &hp, solo.iter_mut(), &prices(1));
        assert!(report.outcomes[0].eliminated);
        assert_eq!(solo[0].hp(), 0);
        assert!(solo[0].is_eliminated());
        assert_eq!(report.verdict, Verdict::NoSurvivors);
        assert_eq!(report.newly_eliminated().collect::<Vec<_>>(), vec![PlayerId(2)]);
    }

    #[test]
    fn eliminated_players_are_skipped_and_second_pass_is_safe() {
        let hp = HpConfig::default();
        let mut out = PlayerLedger::new(PlayerId(1), "out", 100, 0);
        out.set_hp(0);
        let mut last = PlayerLedger::new(PlayerId(2), "last", 100, 0);
        last.set_cash(13_000_000);
        last.buy(&sym("NOVA"), 1, 1_000_000).unwrap();
        let mut ledgers = vec![out, last];
        let first = settle_round(1, 12_000_000, &hp, ledgers.iter_mut(), &prices(10_000));
        assert_eq!(first.outcomes.len(), 1);
        assert_eq!(first.verdict, Verdict::Victory(PlayerId(2)));
        let cash = ledgers[1].cash_cents();
        let again = settle_round(1, 12_000_000, &hp, ledgers.iter_mut(), &prices(10_000));
        assert_eq!(again.outcomes[0].liquidated_cents, 0);
        assert_eq!(ledgers[1].cash_cents(), cash);
    }
}
