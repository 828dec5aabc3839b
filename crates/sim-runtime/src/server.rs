//! Tokio driver for a [`GameSession`].
//!
//! One task owns the timeline: a 250 ms tick feeds elapsed time to the
//! scheduler and a 1 s tick runs item-effect timers. Commands from player
//! connections lock the same session, so they are serialized with both ticks
//! and with settlement. The lock is never held across an `.await`.

use parking_lot::Mutex;
use serde::Serialize;
use sim_core::{ClockConfig, PlayerId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::events::{EventBus, GameEvent};
use crate::items::{ItemError, ItemOption};
use crate::session::{GameResult, GameSession, Standing};
use crate::settlement::SettlementReport;
use crate::trade::{TradeCommand, TradeReceipt, TradeRejection};

/// What a finished game looked like just before the session was reset.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GameSummary {
    pub winner: Option<PlayerId>,
    pub rounds: u32,
    pub standings: Vec<Standing>,
    pub final_report: Option<SettlementReport>,
}

#[derive(Clone)]
pub struct GameServer {
    session: Arc<Mutex<GameSession>>,
    bus: EventBus,
    clock: ClockConfig,
    shutdown_tx: Arc<watch::Sender<bool>>,
    disconnects: Arc<Mutex<PendingDisconnects>>,
}

/// Delayed disconnect tasks by player. Each entry carries the generation it
/// was spawned with, so a finishing task only removes its own entry.
#[derive(Default)]
struct PendingDisconnects {
    next: u64,
    tasks: HashMap<PlayerId, (u64, JoinHandle<()>)>,
}

impl GameServer {
    pub fn new(session: GameSession) -> Self {
        let bus = session.bus().clone();
        let clock = session.config().clock.clone();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            session: Arc::new(Mutex::new(session)),
            bus,
            clock,
            shutdown_tx: Arc::new(shutdown_tx),
            disconnects: Arc::new(Mutex::new(PendingDisconnects::default())),
        }
    }

    pub fn session(&self) -> Arc<Mutex<GameSession>> {
        Arc::clone(&self.session)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn join(&self, name: &str) -> PlayerId {
        self.session.lock().join(name)
    }

    pub fn execute(&self, cmd: &TradeCommand) -> Result<TradeReceipt, TradeRejection> {
        self.session.lock().execute(cmd)
    }

    pub fn select_item(&self, player: PlayerId, item_id: &str) -> Result<ItemOption, ItemError> {
        self.session.lock().select_item(player, item_id)
    }

    pub fn set_paused(&self, paused: bool) -> bool {
        let mut s = self.session.lock();
        if paused {
            s.pause()
        } else {
            s.resume()
        }
    }

    pub fn apply_sentiment(&self, target: &str, label: &str) -> usize {
        self.session.lock().apply_sentiment(target, label)
    }

    /// A player's connection went away: cancel their pending end-screen task
    /// and drop them from the session.
    pub fn disconnect(&self, player: PlayerId) {
        if let Some((_, task)) = self.disconnects.lock().tasks.remove(&player) {
            task.abort();
            debug!(%player, "pending disconnect cancelled");
        }
        self.session.lock().leave(player);
    }

    /// Ask [`GameServer::run`] to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Start the session and drive it until the game ends or shutdown.
    ///
    /// On game over the end screen is held for its configured duration, every
    /// remaining player is asked to disconnect and the session is reset.
    /// Returns `None` when stopped by [`GameServer::shutdown`].
    pub async fn run(&self) -> Option<GameSummary> {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return None;
        }
        let mut tick = interval(self.clock.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut effect_tick = interval(self.clock.effect_tick_interval());
        effect_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.session.lock().start();
        info!("game loop started");
        let mut last = Instant::now();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = Instant::now();
                    let elapsed = now.saturating_duration_since(last);
                    last = now;
                    let (defeated, result) = {
                        let mut s = self.session.lock();
                        s.advance(elapsed);
                        (s.take_defeated(), s.result())
                    };
                    for player in defeated {
                        self.schedule_disconnect(player);
                    }
                    if let Some(result) = result {
                        return self.finish(result, &mut shutdown).await;
                    }
                }
                _ = effect_tick.tick() => {
                    self.session.lock().tick_effects();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested");
                        self.abort_pending();
                        return None;
                    }
                }
            }
        }
    }

    async fn finish(&self, result: GameResult, shutdown: &mut watch::Receiver<bool>) -> Option<GameSummary> {
        let summary = {
            let s = self.session.lock();
            GameSummary {
                winner: result.winner,
                rounds: result.round,
                standings: s.standings(),
                final_report: s.reports().last().cloned(),
            }
        };
        tokio::select! {
            _ = sleep(self.clock.end_screen()) => {}
            _ = shutdown.changed() => {
                self.abort_pending();
                return None;
            }
        }
        self.abort_pending();
        {
            let mut s = self.session.lock();
            let remaining: Vec<PlayerId> = s.ledgers().map(|l| l.id()).collect();
            for player in remaining {
                self.bus.publish(GameEvent::DisconnectRequested { player });
            }
            if let Err(err) = s.reset() {
                error!(%err, "session reset failed");
            }
        }
        info!(winner = ?summary.winner, rounds = summary.rounds, "game loop finished");
        Some(summary)
    }

    /// Disconnect a defeated player once the end screen has been shown.
    fn schedule_disconnect(&self, player: PlayerId) {
        let session = Arc::clone(&self.session);
        let bus = self.bus.clone();
        let pending = Arc::clone(&self.disconnects);
        let delay = self.clock.end_screen();
        // Spawn under the lock: the task cannot deregister before it is registered.
        let mut guard = self.disconnects.lock();
        let generation = guard.next;
        guard.next += 1;
        let task = tokio::spawn(async move {
            sleep(delay).await;
            bus.publish(GameEvent::DisconnectRequested { player });
            session.lock().leave(player);
            let mut pending = pending.lock();
            if matches!(pending.tasks.get(&player), Some((g, _)) if *g == generation) {
                pending.tasks.remove(&player);
            }
        });
        if let Some((_, old)) = guard.tasks.insert(player, (generation, task)) {
            old.abort();
        }
    }

    fn abort_pending(&self) {
        for (player, (_, task)) in self.disconnects.lock().tasks.drain() {
            debug!(%player, "aborting pending disconnect");
            task.abort();
        }
    }
}
