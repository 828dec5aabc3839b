//! Round/phase scheduler.
//!
//! A plain state machine stepped with elapsed wall time. The driver calls
//! [`Scheduler::advance`] on every tick; waits are modelled as a remaining
//! duration that the accumulator drains, so pausing is just not draining.
//! Side effects of transitions (capital, settlement, item offers, the
//! market's daily step) are delegated to a [`PhaseHooks`] implementation.

use chrono::NaiveDate;
use serde::Serialize;
use sim_core::{ClockConfig, GamePhase, TargetConfig};
use sim_econ::{next_round_start, quarter_end_fixed, target_cents};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::events::{EventBus, GameEvent};

/// Callbacks run at phase boundaries, in this order for a full round:
/// `round_started`, `new_day` × days, `round_ended`, `prep_started`,
/// `prep_ended`. `game_over` replaces `prep_started` when the game ends and
/// runs before the Finished phase is published.
pub trait PhaseHooks {
    fn round_started(&mut self, round: u32, target_cents: i64);
    fn new_day(&mut self, date: NaiveDate, round: u32, day_index: u32);
    /// Settlement runs here, before the Result phase is entered.
    fn round_ended(&mut self, round: u32, target_cents: i64);
    fn prep_started(&mut self, round: u32);
    fn prep_ended(&mut self, next_round: u32, next_target_cents: i64);
    fn alive_players(&self) -> usize;
    fn game_over(&mut self, round: u32);
}

/// Observable scheduler state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoundClock {
    pub phase: GamePhase,
    pub round: u32,
    /// In-game date; only set while a round is running.
    pub date: Option<NaiveDate>,
    pub day_index: Option<u32>,
    pub round_start: NaiveDate,
    pub quarter_end: Option<NaiveDate>,
    #[serde(skip)]
    pub phase_total: Duration,
    #[serde(skip)]
    pub phase_remaining: Duration,
    pub daily_ticking: bool,
    pub paused: bool,
    pub target_cents: i64,
}

impl RoundClock {
    fn idle(start: NaiveDate) -> Self {
        Self {
            phase: GamePhase::Idle,
            round: 0,
            date: None,
            day_index: None,
            round_start: start,
            quarter_end: None,
            phase_total: Duration::ZERO,
            phase_remaining: Duration::ZERO,
            daily_ticking: false,
            paused: false,
            target_cents: 0,
        }
    }

    pub fn remaining_secs(&self) -> f32 {
        self.phase_remaining.as_secs_f32()
    }

    pub fn total_secs(&self) -> f32 {
        self.phase_total.as_secs_f32()
    }
}

#[derive(Debug)]
pub struct Scheduler {
    clock: RoundClock,
    cfg: ClockConfig,
    target: TargetConfig,
    bus: EventBus,
}

impl Scheduler {
    pub fn new(cfg: ClockConfig, target: TargetConfig, bus: EventBus) -> Self {
        Self {
            clock: RoundClock::idle(cfg.start_date),
            cfg,
            target,
            bus,
        }
    }

    pub fn clock(&self) -> &RoundClock {
        &self.clock
    }

    pub fn phase(&self) -> GamePhase {
        self.clock.phase
    }

    pub fn round(&self) -> u32 {
        self.clock.round
    }

    pub fn is_paused(&self) -> bool {
        self.clock.paused
    }

    /// Leave Idle and start round 1. No-op in any other phase.
    pub fn start<H: PhaseHooks>(&mut self, hooks: &mut H) {
        if self.clock.phase != GamePhase::Idle {
            return;
        }
        let start = self.cfg.start_date;
        self.start_round(1, start, hooks);
    }

    /// Set the pause flag; publishes only on change.
    pub fn set_paused(&mut self, paused: bool) -> bool {
        if self.clock.paused == paused {
            return false;
        }
        self.clock.paused = paused;
        info!(paused, "pause changed");
        self.bus.publish(GameEvent::PauseChanged { paused });
        true
    }

    /// Back to Idle, unpaused, with the configured start date.
    pub fn reset(&mut self) {
        let was_paused = self.clock.paused;
        self.clock = RoundClock::idle(self.cfg.start_date);
        self.publish_phase();
        if was_paused {
            self.bus.publish(GameEvent::PauseChanged { paused: false });
        }
    }

    /// Real seconds left in the current Round phase, across remaining days.
    pub fn round_remaining(&self) -> Duration {
        if self.clock.phase != GamePhase::Round {
            return Duration::ZERO;
        }
        let days_after = match (self.clock.date, self.clock.quarter_end) {
            (Some(d), Some(end)) => u32::try_from((end - d).num_days()).unwrap_or(0),
            _ => 0,
        };
        self.cfg.day_length() * days_after + self.clock.phase_remaining
    }

    /// Drain `elapsed` through the state machine.
    ///
    /// Several boundaries may be crossed in one call when `elapsed` is larger
    /// than the current wait. Paused, Idle and Finished sessions do not move.
    pub fn advance<H: PhaseHooks>(&mut self, elapsed: Duration, hooks: &mut H) {
        if self.clock.paused {
            return;
        }
        let mut budget = elapsed;
        let mut crossed = false;
        while self.clock.phase.is_running() {
            if budget < self.clock.phase_remaining {
                self.clock.phase_remaining -= budget;
                break;
            }
            budget -= self.clock.phase_remaining;
            self.clock.phase_remaining = Duration::ZERO;
            self.complete_segment(hooks);
            crossed = true;
            if budget.is_zero() {
                break;
            }
        }
        if !crossed && self.clock.phase.is_running() {
            self.bus.publish(GameEvent::Tick {
                remaining_secs: self.clock.remaining_secs(),
                total_secs: self.clock.total_secs(),
            });
        }
    }

    fn complete_segment<H: PhaseHooks>(&mut self, hooks: &mut H) {
        match self.clock.phase {
            GamePhase::Round => self.finish_day(hooks),
            GamePhase::Result => {
                let round = self.clock.round;
                let alive = hooks.alive_players();
                if alive <= 1 {
                    info!(round, alive, "game over");
                    hooks.game_over(round);
                    self.enter(GamePhase::Finished, Duration::ZERO);
                } else {
                    self.enter(GamePhase::Prep, self.cfg.prep_length());
                    hooks.prep_started(round);
                }
            }
            GamePhase::Prep => {
                let next = self.clock.round.saturating_add(1);
                let next_target = target_cents(next, &self.target);
                hooks.prep_ended(next, next_target);
                let start = match next_round_start(self.clock.round_start) {
                    Some(d) => d,
                    None => {
                        warn!("calendar exhausted; finishing game");
                        hooks.game_over(self.clock.round);
                        self.enter(GamePhase::Finished, Duration::ZERO);
                        return;
                    }
                };
                self.start_round(next, start, hooks);
            }
            GamePhase::Idle | GamePhase::Finished => {}
        }
    }

    fn start_round<H: PhaseHooks>(&mut self, round: u32, start: NaiveDate, hooks: &mut H) {
        let target = target_cents(round, &self.target);
        self.clock.round = round;
        self.clock.round_start = start;
        self.clock.quarter_end = quarter_end_fixed(start);
        self.clock.target_cents = target;
        self.bus.publish(GameEvent::TargetChanged {
            round,
            target_cents: target,
        });
        self.enter(GamePhase::Round, self.cfg.day_length());
        self.clock.daily_ticking = true;
        info!(round, %start, target_cents = target, "round started");
        hooks.round_started(round, target);
        self.begin_day(start, 0, hooks);
    }

    fn begin_day<H: PhaseHooks>(&mut self, date: NaiveDate, day_index: u32, hooks: &mut H) {
        let round = self.clock.round;
        self.clock.date = Some(date);
        self.clock.day_index = Some(day_index);
        self.clock.phase_total = self.cfg.day_length();
        self.clock.phase_remaining = self.clock.phase_total;
        debug!(round, %date, day_index, "new day");
        self.bus.publish(GameEvent::NewDay {
            date,
            round,
            day_index,
        });
        hooks.new_day(date, round, day_index);
    }

    fn finish_day<H: PhaseHooks>(&mut self, hooks: &mut H) {
        let next = self.clock.date.and_then(|d| d.succ_opt());
        let within = match (next, self.clock.quarter_end) {
            (Some(n), Some(end)) => n <= end,
            _ => false,
        };
        if let (true, Some(date)) = (within, next) {
            let idx = self.clock.day_index.map_or(0, |i| i + 1);
            self.begin_day(date, idx, hooks);
            return;
        }
        let round = self.clock.round;
        self.clock.daily_ticking = false;
        hooks.round_ended(round, self.clock.target_cents);
        self.clock.date = None;
        self.clock.day_index = None;
        self.enter(GamePhase::Result, self.cfg.result_length());
    }

    fn enter(&mut self, phase: GamePhase, duration: Duration) {
        self.clock.phase = phase;
        self.clock.phase_total = duration;
        self.clock.phase_remaining = duration;
        if phase != GamePhase::Round {
            self.clock.date = None;
            self.clock.day_index = None;
            self.clock.daily_ticking = false;
        }
        self.publish_phase();
    }

    fn publish_phase(&self) {
        debug!(phase = %self.clock.phase, round = self.clock.round, "phase changed");
        self.bus.publish(GameEvent::PhaseChanged {
            phase: self.clock.phase,
            round: self.clock.round,
            total_secs: self.clock.total_secs(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        alive: usize,
        days: u32,
    }

    impl PhaseHooks for Recorder {
        fn round_started(&mut self, round: u32, target_cents: i64) {
            self.calls.push(format!("start {round} {target_cents}"));
        }
        fn new_day(&mut self, _date: NaiveDate, _round: u32, _day_index: u32) {
            self.days += 1;
        }
        fn round_ended(&mut self, round: u32, _target_cents: i64) {
            self.calls.push(format!("end {round}"));
        }
        fn prep_started(&mut self, round: u32) {
            self.calls.push(format!("prep {round}"));
        }
        fn prep_ended(&mut self, next_round: u32, _next_target_cents: i64) {
            self.calls.push(format!("next {next_round}"));
        }
        fn alive_players(&self) -> usize {
            self.alive
        }
        fn game_over(&mut self, round: u32) {
            self.calls.push(format!("over {round}"));
        }
    }

    fn cfg() -> ClockConfig {
        ClockConfig {
            seconds_per_day: 1.0,
            result_duration_secs: 2.0,
            prep_duration_secs: 3.0,
            ..ClockConfig::default()
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn full_round_cycle() {
        let bus = EventBus::new(4096);
        let mut rx = bus.subscribe();
        let mut s = Scheduler::new(cfg(), TargetConfig::default(), bus);
        let mut h = Recorder {
            alive: 2,
            ..Recorder::default()
        };
        s.start(&mut h);
        assert_eq!(s.phase(), GamePhase::Round);
        assert_eq!(s.clock().date, Some(ymd(2026, 1, 1)));
        assert_eq!(s.clock().quarter_end, Some(ymd(2026, 3, 31)));
        assert_eq!(s.round_remaining(), Duration::from_secs(90));

        s.advance(Duration::from_secs(89), &mut h);
        assert_eq!(s.clock().date, Some(ymd(2026, 3, 31)));
        assert_eq!(s.clock().day_index, Some(89));
        s.advance(Duration::from_millis(500), &mut h);
        assert_eq!(s.round_remaining(), Duration::from_millis(500));
        s.advance(Duration::from_millis(500), &mut h);
        assert_eq!(s.phase(), GamePhase::Result);
        assert_eq!(h.days, 90);

        s.advance(Duration::from_secs(2), &mut h);
        assert_eq!(s.phase(), GamePhase::Prep);
        s.advance(Duration::from_secs(3), &mut h);
        assert_eq!(s.phase(), GamePhase::Round);
        assert_eq!(s.round(), 2);
        assert_eq!(s.clock().date, Some(ymd(2026, 4, 1)));
        assert_eq!(s.clock().target_cents, 15_000_000);
        assert_eq!(
            h.calls,
            vec!["start 1 12000000", "end 1", "prep 1", "next 2", "start 2 15000000"]
        );

        let mut last = 0;
        let mut phases = Vec::new();
        while let Ok(env) = rx.try_recv() {
            assert!(env.seq > last);
            last = env.seq;
            if let GameEvent::PhaseChanged { phase, .. } = env.event {
                phases.push(phase);
            }
        }
        assert_eq!(
            phases,
            vec![
                GamePhase::Round,
                GamePhase::Result,
                GamePhase::Prep,
                GamePhase::Round
            ]
        );
    }

    #[test]
    fn pause_excludes_elapsed_time() {
        let mut s = Scheduler::new(cfg(), TargetConfig::default(), EventBus::default());
        let mut h = Recorder {
            alive: 2,
            ..Recorder::default()
        };
        s.start(&mut h);
        assert!(s.set_paused(true));
        assert!(!s.set_paused(true));
        s.advance(Duration::from_secs(1_000), &mut h);
        assert_eq!(s.clock().day_index, Some(0));
        assert_eq!(s.phase(), GamePhase::Round);
        s.set_paused(false);
        s.advance(Duration::from_millis(1_500), &mut h);
        assert_eq!(s.clock().day_index, Some(1));
        assert_eq!(s.clock().phase_remaining, Duration::from_millis(500));
    }

    #[test]
    fn last_survivor_finishes_after_result() {
        let mut s = Scheduler::new(cfg(), TargetConfig::default(), EventBus::default());
        let mut h = Recorder {
            alive: 1,
            ..Recorder::default()
        };
        s.start(&mut h);
        s.advance(Duration::from_secs(90), &mut h);
        assert_eq!(s.phase(), GamePhase::Result);
        s.advance(Duration::from_secs(10), &mut h);
        assert_eq!(s.phase(), GamePhase::Finished);
        assert_eq!(h.calls.last().map(String::as_str), Some("over 1"));
        s.advance(Duration::from_secs(10), &mut h);
        assert_eq!(s.phase(), GamePhase::Finished);
    }

    #[test]
    fn large_step_crosses_many_boundaries() {
        let c = ClockConfig {
            seconds_per_day: 0.5,
            result_duration_secs: 0.0,
            prep_duration_secs: 0.0,
            ..ClockConfig::default()
        };
        let mut s = Scheduler::new(c, TargetConfig::default(), EventBus::default());
        let mut h = Recorder {
            alive: 3,
            ..Recorder::default()
        };
        s.start(&mut h);
        // Q1 has 90 fixed days, Q2 91 (30 + 31 + 30).
        s.advance(Duration::from_secs_f32(45.0 + 45.5 + 0.25), &mut h);
        assert_eq!(s.round(), 3);
        assert_eq!(s.clock().date, Some(ymd(2026, 7, 1)));
    }

    #[test]
    fn start_is_only_valid_from_idle() {
        let mut s = Scheduler::new(cfg(), TargetConfig::default(), EventBus::default());
        let mut h = Recorder::default();
        s.advance(Duration::from_secs(5), &mut h);
        assert_eq!(s.phase(), GamePhase::Idle);
        s.start(&mut h);
        s.start(&mut h);
        assert_eq!(h.calls, vec!["start 1 12000000"]);
        s.reset();
        assert_eq!(s.phase(), GamePhase::Idle);
        assert_eq!(s.round(), 0);
    }
}
