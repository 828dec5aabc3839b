use criterion::{criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use sim_core::{EffectConfig, EffectKind, HpConfig, PlayerId, PlayerLedger, Symbol};
use sim_runtime::{applier, settle_round, EffectTracker, MarketMoment};
use std::collections::BTreeMap;

fn symbols() -> Vec<Symbol> {
    ["NOVA", "ORBT", "KRAK", "LUMN", "ZEPH"]
        .iter()
        .map(|s| Symbol::parse(s).unwrap())
        .collect()
}

fn prices() -> BTreeMap<Symbol, Decimal> {
    symbols()
        .into_iter()
        .enumerate()
        .map(|(i, s)| (s, Decimal::new(1_000 + i as i64 * 37, 0)))
        .collect()
}

fn loaded_ledgers(n: u64) -> Vec<PlayerLedger> {
    (1..=n)
        .map(|id| {
            let mut l = PlayerLedger::new(PlayerId(id), format!("p{id}"), 100, 50_000_000);
            for s in symbols() {
                l.buy(&s, 10, 100_000).unwrap();
            }
            l
        })
        .collect()
}

fn bench_settlement(c: &mut Criterion) {
    let hp = HpConfig::default();
    let prices = prices();
    let template = loaded_ledgers(8);
    c.bench_function("settle_round_8_players", |b| {
        b.iter(|| {
            let mut ledgers = template.clone();
            settle_round(3, 19_000_000, &hp, ledgers.iter_mut(), &prices)
        })
    });
}

fn bench_sell_pipeline(c: &mut Criterion) {
    let cfg = EffectConfig::default();
    let ledger = loaded_ledgers(1).remove(0);
    let mut effects = EffectTracker::new();
    for kind in EffectKind::SELL_PIPELINE {
        effects.add(ledger.id(), kind, 0);
    }
    let moment = MarketMoment {
        round_remaining_secs: 12.0,
        alive_players: 4,
    };
    let nova = Symbol::parse("NOVA").unwrap();
    c.bench_function("quote_sell_all_effects", |b| {
        b.iter(|| applier::quote_sell(&ledger, &effects, &cfg, moment, &nova, 93_500))
    });
}

criterion_group!(benches, bench_settlement, bench_sell_pipeline);
criterion_main!(benches);
