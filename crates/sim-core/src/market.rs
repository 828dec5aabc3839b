//! Market value types shared by the price source and the ledger.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Symbol;

/// Daily OHLCV candle; prices in USD.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Direction of a trade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        })
    }
}

/// News sentiment label delivered by the external feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    #[default]
    Neutral,
    Negative,
}

impl FromStr for SentimentLabel {
    type Err = std::convert::Infallible;

    /// Unrecognized labels map to neutral; the feed is not trusted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "positive" => SentimentLabel::Positive,
            "negative" => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        })
    }
}

/// Which symbols a sentiment signal applies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentTarget {
    Global,
    Symbol(Symbol),
}

impl SentimentTarget {
    /// Marker used by the news feed for market-wide items.
    pub const GLOBAL_MARKER: &'static str = "GLOBAL";

    /// Interpret a raw feed target; `GLOBAL` (any case) addresses all symbols.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().eq_ignore_ascii_case(Self::GLOBAL_MARKER) {
            return Some(SentimentTarget::Global);
        }
        Symbol::parse(raw).ok().map(SentimentTarget::Symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_labels_parse_leniently() {
        assert_eq!("Positive".parse::<SentimentLabel>().unwrap(), SentimentLabel::Positive);
        assert_eq!(" negative".parse::<SentimentLabel>().unwrap(), SentimentLabel::Negative);
        assert_eq!("bullish".parse::<SentimentLabel>().unwrap(), SentimentLabel::Neutral);
    }

    #[test]
    fn global_marker_is_case_insensitive() {
        assert_eq!(SentimentTarget::parse("global"), Some(SentimentTarget::Global));
        assert_eq!(
            SentimentTarget::parse("acme"),
            Some(SentimentTarget::Symbol(Symbol::parse("ACME").unwrap()))
        );
        assert_eq!(SentimentTarget::parse(""), None);
    }
}
