//! One game session: scheduler, ledgers, effects, items and the market.
//!
//! All mutation goes through `&mut GameSession`, so whoever owns the session
//! (normally [`crate::server::GameServer`] behind a mutex) serializes trades,
//! ticks and settlement. Settlement runs inside a scheduler step, so no trade
//! can interleave with it.

use chrono::NaiveDate;
use persistence::{TradeLog, TradeRecord};
use serde::Serialize;
use sim_core::{
    ConfigError, EffectKind, GameConfig, GamePhase, PlayerId, PlayerLedger, SentimentLabel,
    SentimentTarget, Side,
};
use sim_econ::{initial_capital_cents, EconError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::applier::{self, MarketMoment};
use crate::clock::{PhaseHooks, RoundClock, Scheduler};
use crate::effects::EffectTracker;
use crate::events::{EventBus, GameEvent};
use crate::items::{ItemCatalog, ItemDistributor, ItemError, ItemOption};
use crate::market::MarketData;
use crate::settlement::{settle_round, SettlementReport};
use crate::trade::{TradeCommand, TradeReceipt, TradeRejection};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("market: {0}")]
    Market(#[from] EconError),
    #[error(transparent)]
    Items(#[from] ItemError),
}

/// How the game ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct GameResult {
    pub round: u32,
    /// The sole survivor, if there is one.
    pub winner: Option<PlayerId>,
}

/// One row of the leaderboard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub player: PlayerId,
    pub name: String,
    pub hp: i32,
    pub cash_cents: i64,
    pub equity_cents: i64,
    pub eliminated: bool,
}

/// Session state the scheduler drives through [`PhaseHooks`].
pub struct SessionState {
    cfg: GameConfig,
    market: Arc<MarketData>,
    bus: EventBus,
    ledgers: BTreeMap<PlayerId, PlayerLedger>,
    effects: EffectTracker,
    items: ItemDistributor,
    trade_log: Arc<dyn TradeLog>,
    next_player: u64,
    last_settled_round: u32,
    defeated: Vec<PlayerId>,
    result: Option<GameResult>,
    reports: Vec<SettlementReport>,
}

impl SessionState {
    fn alive_ids(&self) -> Vec<PlayerId> {
        self.ledgers
            .values()
            .filter(|l| l.is_alive())
            .map(PlayerLedger::id)
            .collect()
    }

    fn revalue_all(&mut self) {
        let market = Arc::clone(&self.market);
        for ledger in self.ledgers.values_mut() {
            ledger.recalculate_valuation(&*market);
        }
    }

    fn capital_for(&self, player: PlayerId, target_cents: i64) -> i64 {
        let bonus = self
            .effects
            .has(player, EffectKind::BonusCapital)
            .then(|| self.effects.value(player, EffectKind::BonusCapital));
        initial_capital_cents(target_cents, self.cfg.target.initial_capital_ratio, bonus)
    }

    fn grant_capital(&mut self, player: PlayerId, round: u32, target_cents: i64) {
        let capital = self.capital_for(player, target_cents);
        let downscale = self.cfg.target.allow_downscale;
        let market = Arc::clone(&self.market);
        if let Some(ledger) = self.ledgers.get_mut(&player) {
            if ledger.apply_round_capital(round, capital, downscale) {
                ledger.recalculate_valuation(&*market);
                debug!(%player, round, capital_cents = capital, cash_cents = ledger.cash_cents(), "capital applied");
            }
        }
    }

    /// Turn a chosen item into player state.
    fn activate_item(&mut self, player: PlayerId, item: &ItemOption, auto_selected: bool) {
        let Some(ledger) = self.ledgers.get_mut(&player) else {
            warn!(%player, item = %item.id, "item for missing player ignored");
            return;
        };
        if item.effect.is_instant() {
            let amount = i32::try_from(item.value.max(0)).unwrap_or(i32::MAX);
            ledger.heal(amount);
        } else if item.effect.starts_at_zero() {
            self.effects.add(player, item.effect, 0);
        } else {
            self.effects.add(player, item.effect, item.value);
        }
        info!(%player, item = %item.id, effect = %item.effect, auto_selected, "item applied");
        self.bus.publish(GameEvent::ItemApplied {
            player,
            item_id: item.id.clone(),
            effect: item.effect,
            value: item.value,
            auto_selected,
        });
    }
}

impl PhaseHooks for SessionState {
    fn round_started(&mut self, round: u32, target_cents: i64) {
        let players: Vec<PlayerId> = self.ledgers.keys().copied().collect();
        for player in players {
            self.grant_capital(player, round, target_cents);
        }
    }

    fn new_day(&mut self, date: NaiveDate, round: u32, day_index: u32) {
        let closes = self.market.advance_day(date, Instant::now());
        debug!(round, %date, day_index, symbols = closes.len(), "market advanced");
        for c in closes {
            self.bus.publish(GameEvent::DailyClose {
                symbol: c.symbol,
                candle: c.candle,
                change_abs: c.change_abs,
                change_pct: c.change_pct,
            });
        }
        self.revalue_all();
    }

    fn round_ended(&mut self, round: u32, target_cents: i64) {
        if self.last_settled_round >= round {
            warn!(round, "round already settled; skipping");
            return;
        }
        let market = Arc::clone(&self.market);
        let report = settle_round(
            round,
            target_cents,
            &self.cfg.hp,
            self.ledgers.values_mut(),
            &*market,
        );
        self.last_settled_round = round;
        info!(round, survivors = report.survivors.len(), verdict = ?report.verdict, "round settled");
        self.bus.publish(GameEvent::Settled(report.clone()));
        for player in report.newly_eliminated() {
            self.effects.clear_player(player);
            self.defeated.push(player);
            self.bus.publish(GameEvent::PlayerDefeated { player });
        }
        self.reports.push(report);
    }

    fn prep_started(&mut self, round: u32) {
        let alive = self.alive_ids();
        for (player, offers) in self.items.distribute(round, &alive) {
            self.bus.publish(GameEvent::ItemOffers { player, offers });
        }
    }

    /// Close the selection window. Players who did not choose get a random
    /// pick, active before the next round's capital is granted.
    fn prep_ended(&mut self, next_round: u32, next_target_cents: i64) {
        let picks = self.items.auto_select();
        debug!(next_round, next_target_cents, auto_selected = picks.len(), "prep ended");
        for (player, item) in picks {
            self.activate_item(player, &item, true);
        }
    }

    fn alive_players(&self) -> usize {
        self.ledgers.values().filter(|l| l.is_alive()).count()
    }

    fn game_over(&mut self, round: u32) {
        let alive = self.alive_ids();
        let winner = match alive.as_slice() {
            [only] => Some(*only),
            _ => None,
        };
        info!(round, winner = ?winner, "game finished");
        self.result = Some(GameResult { round, winner });
        self.bus.publish(GameEvent::GameOver { winner });
    }
}

/// Authoritative state of one game.
pub struct GameSession {
    scheduler: Scheduler,
    state: SessionState,
}

impl GameSession {
    /// Build a session with the built-in item catalog.
    pub fn new(cfg: GameConfig, bus: EventBus, trade_log: Arc<dyn TradeLog>) -> Result<Self, SessionError> {
        let catalog = ItemCatalog::from_config(&cfg.items)?;
        Self::with_catalog(cfg, catalog, bus, trade_log)
    }

    pub fn with_catalog(
        cfg: GameConfig,
        catalog: ItemCatalog,
        bus: EventBus,
        trade_log: Arc<dyn TradeLog>,
    ) -> Result<Self, SessionError> {
        cfg.validate()?;
        let symbols = cfg.symbols()?;
        let market = MarketData::new(&cfg.market, &symbols, history_end(&cfg))?;
        let items = ItemDistributor::new(catalog, &cfg.items)?;
        let scheduler = Scheduler::new(cfg.clock.clone(), cfg.target.clone(), bus.clone());
        Ok(Self {
            scheduler,
            state: SessionState {
                cfg,
                market: Arc::new(market),
                bus,
                ledgers: BTreeMap::new(),
                effects: EffectTracker::new(),
                items,
                trade_log,
                next_player: 1,
                last_settled_round: 0,
                defeated: Vec::new(),
                result: None,
                reports: Vec::new(),
            },
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.state.cfg
    }

    pub fn bus(&self) -> &EventBus {
        &self.state.bus
    }

    pub fn market(&self) -> &Arc<MarketData> {
        &self.state.market
    }

    pub fn clock(&self) -> &RoundClock {
        self.scheduler.clock()
    }

    pub fn phase(&self) -> GamePhase {
        self.scheduler.phase()
    }

    pub fn round(&self) -> u32 {
        self.scheduler.round()
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    /// Register a player. Joining during a round grants that round's capital.
    pub fn join(&mut self, name: impl Into<String>) -> PlayerId {
        let st = &mut self.state;
        let player = PlayerId(st.next_player);
        st.next_player += 1;
        let name = name.into();
        let ledger = PlayerLedger::new(
            player,
            name.clone(),
            st.cfg.hp.max_hp,
            st.cfg.target.initial_cash_cents,
        );
        st.ledgers.insert(player, ledger);
        info!(%player, %name, phase = %self.scheduler.phase(), "player joined");
        st.bus.publish(GameEvent::PlayerJoined { player, name });
        if self.scheduler.phase() == GamePhase::Round {
            let clock = self.scheduler.clock();
            st.grant_capital(player, clock.round, clock.target_cents);
        }
        player
    }

    /// Drop a player's ledger, effects and offers. Returns whether they existed.
    pub fn leave(&mut self, player: PlayerId) -> bool {
        let st = &mut self.state;
        if st.ledgers.remove(&player).is_none() {
            return false;
        }
        st.effects.clear_player(player);
        st.items.forget(player);
        info!(%player, "player left");
        st.bus.publish(GameEvent::PlayerLeft { player });
        true
    }

    /// Leave Idle and start round 1.
    pub fn start(&mut self) {
        self.scheduler.start(&mut self.state);
    }

    pub fn pause(&mut self) -> bool {
        self.scheduler.set_paused(true)
    }

    pub fn resume(&mut self) -> bool {
        self.scheduler.set_paused(false)
    }

    /// Feed elapsed wall time to the scheduler.
    pub fn advance(&mut self, elapsed: Duration) {
        self.scheduler.advance(elapsed, &mut self.state);
    }

    /// One-second effect tick: hold timers and dividends.
    ///
    /// Only counts during an unpaused Round phase. Returns the dividends paid.
    pub fn tick_effects(&mut self) -> Vec<(PlayerId, i64)> {
        if self.scheduler.phase() != GamePhase::Round || self.scheduler.is_paused() {
            return Vec::new();
        }
        let st = &mut self.state;
        let due = st.effects.tick_hold_timers(&st.cfg.effects);
        let mut paid = Vec::new();
        for player in due {
            let Some(ledger) = st.ledgers.get_mut(&player) else {
                continue;
            };
            if !ledger.is_alive() {
                continue;
            }
            let cents = applier::dividend_cents(ledger, &st.cfg.effects);
            if cents <= 0 {
                continue;
            }
            if let Err(err) = ledger.credit(cents) {
                warn!(%player, %err, "dividend not credited");
                continue;
            }
            ledger.recalculate_valuation(&*st.market);
            info!(%player, cents, "dividend paid");
            st.bus.publish(GameEvent::DividendPaid { player, cents });
            paid.push((player, cents));
        }
        paid
    }

    /// Validate and execute a trade command.
    pub fn execute(&mut self, cmd: &TradeCommand) -> Result<TradeReceipt, TradeRejection> {
        let out = self.try_execute(cmd);
        if let Err(err) = &out {
            info!(player = %cmd.caller, side = %cmd.side, symbol = %cmd.symbol, %err, "trade rejected");
        }
        out
    }

    pub fn buy(&mut self, player: PlayerId, symbol: &str, quantity: i64, unit_price_cents: i64) -> Result<TradeReceipt, TradeRejection> {
        self.execute(&TradeCommand::buy(player, symbol, quantity, unit_price_cents))
    }

    pub fn sell(&mut self, player: PlayerId, symbol: &str, quantity: i64, unit_price_cents: i64) -> Result<TradeReceipt, TradeRejection> {
        self.execute(&TradeCommand::sell(player, symbol, quantity, unit_price_cents))
    }

    fn try_execute(&mut self, cmd: &TradeCommand) -> Result<TradeReceipt, TradeRejection> {
        let phase = self.scheduler.phase();
        if !phase.allows_trading() {
            return Err(TradeRejection::WrongPhase(phase));
        }
        if self.scheduler.is_paused() {
            return Err(TradeRejection::Paused);
        }
        let (symbol, quantity) = cmd.validate()?;
        let st = &mut self.state;
        let current = st
            .market
            .price_cents(&symbol)
            .ok_or_else(|| TradeRejection::UnknownSymbol(symbol.clone()))?;
        if cmd.unit_price_cents != current {
            return Err(TradeRejection::StalePrice {
                quoted: cmd.unit_price_cents,
                current,
            });
        }
        let moment = MarketMoment {
            round_remaining_secs: self.scheduler.round_remaining().as_secs_f32(),
            alive_players: st.alive_players(),
        };
        let ledger = st
            .ledgers
            .get_mut(&cmd.target)
            .ok_or(TradeRejection::UnknownPlayer(cmd.target))?;
        if !ledger.is_alive() {
            return Err(TradeRejection::Eliminated(cmd.target));
        }

        let (quote, total) = match cmd.side {
            Side::Buy => {
                let quote = applier::quote_buy(ledger, &st.effects, &st.cfg.effects, current)
                    .map_err(|_| TradeRejection::Overflow)?;
                let avg_before = ledger.average_cost_cents(&symbol);
                let total = ledger.buy(&symbol, quantity, quote.final_cents)?;
                applier::commit_buy(&mut st.effects, ledger, &quote, avg_before);
                (quote, total)
            }
            Side::Sell => {
                let quote = applier::quote_sell(
                    ledger,
                    &st.effects,
                    &st.cfg.effects,
                    moment,
                    &symbol,
                    current,
                )
                .map_err(|_| TradeRejection::Overflow)?;
                let total = ledger.sell(&symbol, quantity, quote.final_cents)?;
                applier::commit_sell(&mut st.effects, ledger, &quote);
                (quote, total)
            }
        };
        ledger.recalculate_valuation(&*st.market);

        let receipt = TradeReceipt {
            player: cmd.target,
            side: cmd.side,
            symbol: symbol.clone(),
            quantity,
            unit_price_cents: quote.original_cents,
            final_unit_cents: quote.final_cents,
            total_cents: total,
            cash_after_cents: ledger.cash_cents(),
            held_after: ledger.holding(&symbol),
            effects: quote.applied.clone(),
        };
        let clock = self.scheduler.clock();
        let record = TradeRecord {
            round: clock.round,
            date: clock.date,
            player: receipt.player,
            side: receipt.side,
            symbol,
            quantity,
            unit_price_cents: receipt.unit_price_cents,
            final_unit_cents: receipt.final_unit_cents,
            total_cents: total,
            effects: receipt.effects.clone(),
        };
        if let Err(err) = st.trade_log.record(&record) {
            warn!(player = %record.player, %err, "trade log write failed");
        }
        info!(
            player = %record.player,
            side = %record.side,
            symbol = %record.symbol,
            quantity,
            final_unit_cents = record.final_unit_cents,
            total_cents = total,
            "trade executed"
        );
        st.bus.publish(GameEvent::TradeExecuted(record));
        Ok(receipt)
    }

    /// Choose one of the player's offered items. Only open during Prep.
    pub fn select_item(&mut self, player: PlayerId, item_id: &str) -> Result<ItemOption, ItemError> {
        if self.scheduler.phase() != GamePhase::Prep {
            return Err(ItemError::SelectionClosed);
        }
        let item = self.state.items.select(player, item_id)?;
        self.state.activate_item(player, &item, false);
        Ok(item)
    }

    pub fn offer(&self, player: PlayerId) -> Option<&[ItemOption]> {
        self.state.items.offer(player)
    }

    pub fn effects_of(&self, player: PlayerId) -> Vec<(EffectKind, i64)> {
        self.state.effects.effects_of(player)
    }

    /// Feed one news sentiment signal. Returns how many symbols it touched.
    pub fn apply_sentiment(&mut self, raw_target: &str, raw_label: &str) -> usize {
        let Some(target) = SentimentTarget::parse(raw_target) else {
            warn!(target = raw_target, "unparseable sentiment target ignored");
            return 0;
        };
        let label = raw_label.parse::<SentimentLabel>().unwrap_or_default();
        self.state.market.apply_sentiment(&target, label, Instant::now())
    }

    pub fn ledger(&self, player: PlayerId) -> Option<&PlayerLedger> {
        self.state.ledgers.get(&player)
    }

    pub fn ledgers(&self) -> impl Iterator<Item = &PlayerLedger> {
        self.state.ledgers.values()
    }

    pub fn alive_players(&self) -> usize {
        self.state.alive_players()
    }

    /// Survivors first, then by equity, then by id.
    pub fn standings(&self) -> Vec<Standing> {
        let mut rows: Vec<Standing> = self
            .state
            .ledgers
            .values()
            .map(|l| Standing {
                player: l.id(),
                name: l.name().to_string(),
                hp: l.hp(),
                cash_cents: l.cash_cents(),
                equity_cents: l.equity_cents(),
                eliminated: l.is_eliminated(),
            })
            .collect();
        rows.sort_by(|a, b| {
            a.eliminated
                .cmp(&b.eliminated)
                .then(b.equity_cents.cmp(&a.equity_cents))
                .then(a.player.cmp(&b.player))
        });
        rows
    }

    pub fn reports(&self) -> &[SettlementReport] {
        &self.state.reports
    }

    /// Players eliminated since the last call.
    pub fn take_defeated(&mut self) -> Vec<PlayerId> {
        std::mem::take(&mut self.state.defeated)
    }

    pub fn result(&self) -> Option<GameResult> {
        self.state.result
    }

    /// Clear players, effects, offers and results and rewind market and clock.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        let st = &mut self.state;
        st.ledgers.clear();
        st.effects.clear_all();
        st.items.reset();
        st.defeated.clear();
        st.reports.clear();
        st.result = None;
        st.last_settled_round = 0;
        st.market.reset(history_end(&st.cfg))?;
        self.scheduler.reset();
        if let Err(err) = st.trade_log.flush() {
            warn!(%err, "trade log flush failed");
        }
        info!("session reset");
        st.bus.publish(GameEvent::SessionReset);
        Ok(())
    }
}

/// Synthetic history ends the day before the first trading day.
fn history_end(cfg: &GameConfig) -> NaiveDate {
    let start = cfg.clock.start_date;
    start.pred_opt().unwrap_or(start)
}
