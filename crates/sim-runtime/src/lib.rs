#![deny(warnings)]

//! Authoritative runtime for the trading round game.
//!
//! [`GameSession`] owns the scheduler, the player ledgers, the item-effect
//! store and the market for one game. [`GameServer`] drives a session on
//! tokio timers and serializes player commands against it. State changes
//! leave as ordered [`GameEvent`]s on an [`EventBus`].

pub mod applier;
pub mod clock;
pub mod effects;
pub mod events;
pub mod items;
pub mod market;
pub mod server;
pub mod session;
pub mod settlement;
pub mod trade;

pub use applier::{MarketMoment, PriceQuote};
pub use clock::{PhaseHooks, RoundClock, Scheduler};
pub use effects::EffectTracker;
pub use events::{Envelope, EventBus, GameEvent};
pub use items::{ItemCatalog, ItemDistributor, ItemError, ItemOption};
pub use market::{MarketData, Quote};
pub use server::{GameServer, GameSummary};
pub use session::{GameResult, GameSession, SessionError, Standing};
pub use settlement::{settle_round, SettlementReport, Verdict};
pub use trade::{TradeCommand, TradeReceipt, TradeRejection};
