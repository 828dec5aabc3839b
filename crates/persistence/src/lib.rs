#![deny(warnings)]

//! Persistence layer: the executed-trade log.
//!
//! Nothing in the session depends on a durable store. Every executed trade is
//! handed to a [`TradeLog`] sink; failures are reported to the caller, which
//! logs them and carries on.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sim_core::{EffectKind, PlayerId, Side, Symbol};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default location of the JSON-lines trade log used by local runs.
pub fn default_trade_log_path() -> &'static str {
    "./saves/trades.jsonl"
}

/// One executed trade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub round: u32,
    /// In-game date the trade happened on.
    pub date: Option<NaiveDate>,
    pub player: PlayerId,
    pub side: Side,
    pub symbol: Symbol,
    pub quantity: u32,
    /// Market price per share before item effects.
    pub unit_price_cents: i64,
    /// Price per share actually charged or paid.
    pub final_unit_cents: i64,
    pub total_cents: i64,
    /// Effects that changed the price, in evaluation order.
    #[serde(default)]
    pub effects: Vec<EffectKind>,
}

/// Sink for executed trades.
pub trait TradeLog: Send + Sync {
    fn record(&self, trade: &TradeRecord) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTradeLog;

impl TradeLog for NullTradeLog {
    fn record(&self, _trade: &TradeRecord) -> Result<()> {
        Ok(())
    }
}

/// Keeps trades in memory; used by tests and the headless runner.
#[derive(Debug, Default)]
pub struct MemoryTradeLog {
    trades: Mutex<Vec<TradeRecord>>,
}

impl MemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.trades.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.lock().is_empty()
    }
}

impl TradeLog for MemoryTradeLog {
    fn record(&self, trade: &TradeRecord) -> Result<()> {
        self.trades.lock().push(trade.clone());
        Ok(())
    }
}

/// Appends one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesTradeLog {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl JsonLinesTradeLog {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening trade log {}", path.display()))?;
        debug!(path = %path.display(), "trade log opened");
        Ok(Self {
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeLog for JsonLinesTradeLog {
    fn record(&self, trade: &TradeRecord) -> Result<()> {
        let line = serde_json::to_string(trade)?;
        let mut out = self.out.lock();
        writeln!(out, "{line}")?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.out.lock().flush()?;
        Ok(())
    }
}

impl Drop for JsonLinesTradeLog {
    fn drop(&mut self) {
        if let Err(err) = self.out.lock().flush() {
            warn!(path = %self.path.display(), %err, "trade log flush failed");
        }
    }
}

/// Read every record of a JSON-lines log.
///
/// Blank lines are skipped; a malformed line is an error naming its number.
pub fn read_json_lines(path: impl AsRef<Path>) -> Result<Vec<TradeRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec: TradeRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed trade", path.display(), idx + 1))?;
        out.push(rec);
    }
    Ok(out)
}

/// Totals of one player's trades.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlayerTradeTotals {
    pub buys: u32,
    pub sells: u32,
    pub bought_cents: i64,
    pub sold_cents: i64,
    /// Trades whose price was changed by at least one effect.
    pub modified: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TradeSummary {
    pub trades: usize,
    pub last_round: u32,
    pub per_player: BTreeMap<PlayerId, PlayerTradeTotals>,
    pub per_symbol_volume: BTreeMap<Symbol, u64>,
}

pub fn summarize(trades: &[TradeRecord]) -> TradeSummary {
    let mut s = TradeSummary {
        trades: trades.len(),
        ..TradeSummary::default()
    };
    for t in trades {
        s.last_round = s.last_round.max(t.round);
        let p = s.per_player.entry(t.player).or_default();
        match t.side {
            Side::Buy => {
                p.buys += 1;
                p.bought_cents = p.bought_cents.saturating_add(t.total_cents);
            }
            Side::Sell => {
                p.sells += 1;
                p.sold_cents = p.sold_cents.saturating_add(t.total_cents);
            }
        }
        if !t.effects.is_empty() {
            p.modified += 1;
        }
        *s.per_symbol_volume.entry(t.symbol.clone()).or_default() += u64::from(t.quantity);
    }
    s
}
