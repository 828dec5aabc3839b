//! Authoritative per-symbol price books.
//!
//! The scheduler's daily step is the only writer. Readers go through the
//! current [`Quote`], which is swapped as a whole with `ArcSwap` so a reader
//! sees either yesterday's or today's close, never a mix.

use arc_swap::ArcSwap;
use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use sim_core::{Candle, MarketConfig, PriceSource, SentimentLabel, SentimentTarget, Symbol};
use sim_econ::{daily_candle, daily_change, generate_history, EconError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Latest close of one symbol.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Quote {
    pub date: NaiveDate,
    pub close: Decimal,
    pub prev_close: Decimal,
}

/// One symbol's close for a newly generated day.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DailyClose {
    pub symbol: Symbol,
    pub candle: Candle,
    pub change_abs: Decimal,
    pub change_pct: Decimal,
}

#[derive(Clone, Copy, Debug)]
struct SentimentState {
    label: SentimentLabel,
    multiplier: f64,
    updated_at: Option<Instant>,
}

impl Default for SentimentState {
    fn default() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            multiplier: 1.0,
            updated_at: None,
        }
    }
}

#[derive(Debug)]
struct SymbolBook {
    quote: ArcSwap<Quote>,
    history: RwLock<Vec<Candle>>,
    sentiment: Mutex<SentimentState>,
}

impl SymbolBook {
    fn from_history(history: Vec<Candle>, fallback: Decimal, as_of: NaiveDate) -> Self {
        let quote = quote_from_history(&history, fallback, as_of);
        Self {
            quote: ArcSwap::from_pointee(quote),
            history: RwLock::new(history),
            sentiment: Mutex::new(SentimentState::default()),
        }
    }
}

fn quote_from_history(history: &[Candle], fallback: Decimal, as_of: NaiveDate) -> Quote {
    match history {
        [] => Quote {
            date: as_of,
            close: fallback,
            prev_close: fallback,
        },
        [only] => Quote {
            date: only.date,
            close: only.close,
            prev_close: only.open,
        },
        [.., prev, last] => Quote {
            date: last.date,
            close: last.close,
            prev_close: prev.close,
        },
    }
}

/// Price source for one session.
#[derive(Debug)]
pub struct MarketData {
    books: BTreeMap<Symbol, SymbolBook>,
    seed: u64,
    base_price: Decimal,
    history_days: u32,
    sentiment_multiplier: f64,
    freshness: Duration,
}

impl MarketData {
    /// Build books with a synthetic history ending on `as_of`.
    pub fn new(cfg: &MarketConfig, symbols: &[Symbol], as_of: NaiveDate) -> Result<Self, EconError> {
        let base_price = Decimal::try_from(cfg.base_price_usd)
            .map_err(|_| EconError::NonFinite)?
            .round_dp(4);
        let mut market = Self {
            books: BTreeMap::new(),
            seed: cfg.rng_seed,
            base_price,
            history_days: cfg.initial_history_days,
            sentiment_multiplier: cfg.sentiment_multiplier,
            freshness: cfg.sentiment_freshness(),
        };
        for symbol in symbols {
            let history = market.seed_history(symbol, as_of)?;
            market.books.insert(
                symbol.clone(),
                SymbolBook::from_history(history, base_price, as_of),
            );
        }
        info!(symbols = market.books.len(), %as_of, "market initialized");
        Ok(market)
    }

    fn seed_history(&self, symbol: &Symbol, as_of: NaiveDate) -> Result<Vec<Candle>, EconError> {
        generate_history(symbol, self.seed, as_of, self.history_days, self.base_price)
    }

    /// Regenerate every book as of `as_of` and forget sentiment.
    pub fn reset(&self, as_of: NaiveDate) -> Result<(), EconError> {
        for (symbol, book) in &self.books {
            let history = self.seed_history(symbol, as_of)?;
            book.quote
                .store(Arc::new(quote_from_history(&history, self.base_price, as_of)));
            *book.history.write() = history;
            *book.sentiment.lock() = SentimentState::default();
        }
        debug!(%as_of, "market reset");
        Ok(())
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.books.keys()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.books.contains_key(symbol)
    }

    pub fn quote(&self, symbol: &Symbol) -> Option<Arc<Quote>> {
        self.books.get(symbol).map(|b| b.quote.load_full())
    }

    /// Current close in integer cents.
    pub fn price_cents(&self, symbol: &Symbol) -> Option<i64> {
        self.quote(symbol).and_then(|q| sim_core::usd_to_cents(q.close))
    }

    pub fn history(&self, symbol: &Symbol) -> Vec<Candle> {
        self.books
            .get(symbol)
            .map(|b| b.history.read().clone())
            .unwrap_or_default()
    }

    /// Current closes of every symbol.
    pub fn snapshot(&self) -> BTreeMap<Symbol, Decimal> {
        self.books
            .iter()
            .map(|(s, b)| (s.clone(), b.quote.load().close))
            .collect()
    }

    /// Record a news sentiment for one symbol or for all of them.
    ///
    /// Returns how many books were updated; an unknown symbol updates none.
    pub fn apply_sentiment(&self, target: &SentimentTarget, label: SentimentLabel, now: Instant) -> usize {
        let multiplier = match label {
            SentimentLabel::Positive => self.sentiment_multiplier,
            SentimentLabel::Negative => 1.0 / self.sentiment_multiplier,
            SentimentLabel::Neutral => 1.0,
        };
        let state = SentimentState {
            label,
            multiplier,
            updated_at: Some(now),
        };
        match target {
            SentimentTarget::Global => {
                for book in self.books.values() {
                    *book.sentiment.lock() = state;
                }
                info!(?label, multiplier, "global sentiment applied");
                self.books.len()
            }
            SentimentTarget::Symbol(symbol) => match self.books.get(symbol) {
                Some(book) => {
                    *book.sentiment.lock() = state;
                    info!(%symbol, ?label, multiplier, "sentiment applied");
                    1
                }
                None => {
                    warn!(%symbol, "sentiment for unknown symbol ignored");
                    0
                }
            },
        }
    }

    /// Drift multiplier for the next candle; stale signals count as neutral.
    pub fn drift_multiplier(&self, symbol: &Symbol, now: Instant) -> f64 {
        let Some(book) = self.books.get(symbol) else {
            return 1.0;
        };
        let s = *book.sentiment.lock();
        match s.updated_at {
            Some(at) if now.saturating_duration_since(at) < self.freshness => s.multiplier,
            _ => 1.0,
        }
    }

    pub fn sentiment(&self, symbol: &Symbol) -> Option<SentimentLabel> {
        self.books.get(symbol).map(|b| b.sentiment.lock().label)
    }

    /// Generate and publish one daily candle per symbol.
    ///
    /// Days that are not after the current quote date are skipped so a
    /// repeated call cannot append the same day twice.
    pub fn advance_day(&self, date: NaiveDate, now: Instant) -> Vec<DailyClose> {
        let mut closes = Vec::with_capacity(self.books.len());
        for (symbol, book) in &self.books {
            let current = book.quote.load_full();
            if date <= current.date {
                debug!(%symbol, %date, "day already generated");
                continue;
            }
            let multiplier = self.drift_multiplier(symbol, now);
            let candle = match daily_candle(symbol, self.seed, date, current.close, multiplier) {
                Ok(c) => c,
                Err(err) => {
                    warn!(%symbol, %err, "candle generation failed; keeping last close");
                    continue;
                }
            };
            let (change_abs, change_pct) = daily_change(current.close, candle.close);
            book.history.write().push(candle.clone());
            book.quote.store(Arc::new(Quote {
                date,
                close: candle.close,
                prev_close: current.close,
            }));
            debug!(
                %symbol,
                close = candle.close.to_f64().unwrap_or_default(),
                multiplier,
                "daily close"
            );
            closes.push(DailyClose {
                symbol: symbol.clone(),
                candle,
                change_abs,
                change_pct,
            });
        }
        closes
    }
}

impl PriceSource for MarketData {
    fn price_usd(&self, symbol: &Symbol) -> Option<Decimal> {
        self.books.get(symbol).map(|b| b.quote.load().close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn market() -> MarketData {
        let cfg = MarketConfig::default();
        let symbols: Vec<Symbol> = cfg.symbols.iter().map(|s| Symbol::parse(s).unwrap()).collect();
        MarketData::new(&cfg, &symbols, ymd(2025, 12, 31)).unwrap()
    }

    #[test]
    fn history_seeds_the_quote() {
        let m = market();
        let nova = Symbol::parse("NOVA").unwrap();
        let hist = m.history(&nova);
        assert_eq!(hist.len(), 60);
        let q = m.quote(&nova).unwrap();
        assert_eq!(q.close, hist[59].close);
        assert_eq!(q.prev_close, hist[58].close);
        assert_eq!(m.price_usd(&nova), Some(q.close));
        assert_eq!(m.price_usd(&Symbol::parse("NOPE").unwrap()), None);
    }

    #[test]
    fn advance_day_appends_once() {
        let m = market();
        let now = Instant::now();
        let closes = m.advance_day(ymd(2026, 1, 1), now);
        assert_eq!(closes.len(), 5);
        let c = &closes[0];
        assert_eq!(m.quote(&c.symbol).unwrap().close, c.candle.close);
        assert_eq!(c.change_abs, c.candle.close - c.candle.open);
        assert!(m.advance_day(ymd(2026, 1, 1), now).is_empty());
        assert_eq!(m.history(&c.symbol).len(), 61);
    }

    #[tokio::test(start_paused = true)]
    async fn sentiment_expires_after_freshness_window() {
        let m = market();
        let nova = Symbol::parse("NOVA").unwrap();
        let t0 = Instant::now();
        assert_eq!(m.apply_sentiment(&SentimentTarget::Global, SentimentLabel::Positive, t0), 5);
        assert_eq!(m.drift_multiplier(&nova, t0), 2.0);
        m.apply_sentiment(
            &SentimentTarget::Symbol(nova.clone()),
            SentimentLabel::Negative,
            t0,
        );
        assert_eq!(m.drift_multiplier(&nova, t0), 0.5);
        assert_eq!(m.sentiment(&nova), Some(SentimentLabel::Negative));
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(m.drift_multiplier(&nova, Instant::now()), 1.0);
        let unknown = SentimentTarget::Symbol(Symbol::parse("NOPE").unwrap());
        assert_eq!(m.apply_sentiment(&unknown, SentimentLabel::Positive, t0), 0);
    }

    #[test]
    fn reset_restores_initial_books() {
        let m = market();
        let nova = Symbol::parse("NOVA").unwrap();
        let before = m.quote(&nova).unwrap();
        m.advance_day(ymd(2026, 1, 1), Instant::now());
        m.reset(ymd(2025, 12, 31)).unwrap();
        assert_eq!(*m.quote(&nova).unwrap(), *before);
        assert_eq!(m.history(&nova).len(), 60);
    }
}
