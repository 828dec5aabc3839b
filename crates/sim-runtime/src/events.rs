//! Typed session events and the ordered bus that carries them.
//!
//! Every state change the scheduler or the session makes is published as a
//! [`GameEvent`] wrapped in an [`Envelope`] with a per-bus sequence number.
//! Delivery is fire-and-forget: with no subscribers an event is dropped and
//! the authoritative state moves on regardless.

use chrono::NaiveDate;
use parking_lot::Mutex;
use persistence::TradeRecord;
use rust_decimal::Decimal;
use serde::Serialize;
use sim_core::{Candle, EffectKind, GamePhase, PlayerId, Symbol};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::items::ItemOption;
use crate::settlement::SettlementReport;

/// Default capacity of the broadcast ring.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    PhaseChanged {
        phase: GamePhase,
        round: u32,
        total_secs: f32,
    },
    NewDay {
        date: NaiveDate,
        round: u32,
        day_index: u32,
    },
    Tick {
        remaining_secs: f32,
        total_secs: f32,
    },
    PauseChanged {
        paused: bool,
    },
    TargetChanged {
        round: u32,
        target_cents: i64,
    },
    DailyClose {
        symbol: Symbol,
        candle: Candle,
        change_abs: Decimal,
        change_pct: Decimal,
    },
    Settled(SettlementReport),
    PlayerJoined {
        player: PlayerId,
        name: String,
    },
    PlayerLeft {
        player: PlayerId,
    },
    PlayerDefeated {
        player: PlayerId,
    },
    /// The transport should drop this player's connection.
    DisconnectRequested {
        player: PlayerId,
    },
    GameOver {
        winner: Option<PlayerId>,
    },
    ItemOffers {
        player: PlayerId,
        offers: Vec<ItemOption>,
    },
    ItemApplied {
        player: PlayerId,
        item_id: String,
        effect: EffectKind,
        value: i64,
        auto_selected: bool,
    },
    DividendPaid {
        player: PlayerId,
        cents: i64,
    },
    TradeExecuted(TradeRecord),
    SessionReset,
}

/// An event stamped with its position in the bus's global order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    pub seq: u64,
    pub event: GameEvent,
}

/// Ordered fan-out of session events.
///
/// Sequence assignment and send happen under one lock, so receivers observe
/// envelopes in strictly increasing `seq` order.
#[derive(Clone, Debug)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    tx: broadcast::Sender<Envelope>,
    seq: Mutex<u64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                tx,
                seq: Mutex::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.tx.subscribe()
    }

    /// Publish an event and return its sequence number.
    pub fn publish(&self, event: GameEvent) -> u64 {
        let mut seq = self.inner.seq.lock();
        *seq += 1;
        // No receivers is not an error for the authoritative side.
        let _ = self.inner.tx.send(Envelope { seq: *seq, event });
        *seq
    }

    /// Sequence number of the most recent event, 0 before the first.
    pub fn last_seq(&self) -> u64 {
        *self.inner.seq.lock()
    }

    pub fn receiver_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}
