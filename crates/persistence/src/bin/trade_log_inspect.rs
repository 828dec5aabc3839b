#![deny(warnings)]

//! Summarise a JSON-lines trade log.
//!
//! Usage: `trade_log_inspect [PATH] [--json]`

use anyhow::Result;
use persistence::{default_trade_log_path, read_json_lines, summarize};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut path = default_trade_log_path().to_string();
    let mut as_json = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => as_json = true,
            other => path = other.to_string(),
        }
    }

    let trades = read_json_lines(&path)?;
    info!(%path, trades = trades.len(), "trade log loaded");
    let summary = summarize(&trades);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Trades: {} | last round: {}", summary.trades, summary.last_round);
    for (player, t) in &summary.per_player {
        println!(
            "{player} | buys: {} (${:.2}) | sells: {} (${:.2}) | modified: {}",
            t.buys,
            t.bought_cents as f64 / 100.0,
            t.sells,
            t.sold_cents as f64 / 100.0,
            t.modified
        );
    }
    for (symbol, volume) in &summary.per_symbol_volume {
        println!("{symbol} | volume: {volume}");
    }
    Ok(())
}
