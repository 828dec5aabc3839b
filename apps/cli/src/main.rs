#![deny(warnings)]

//! Headless runner: plays one full game with simple bots and prints the result.

use anyhow::{Context, Result};
use persistence::{JsonLinesTradeLog, NullTradeLog, TradeLog};
use sim_core::{GameConfig, GamePhase, PlayerId};
use sim_runtime::{EventBus, GameEvent, GameServer, GameSession, GameSummary, TradeCommand};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    players: Option<usize>,
    seed: Option<u64>,
    seconds_per_day: Option<f32>,
    trade_log: Option<String>,
    items: Option<String>,
    json: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next(),
            "--players" => args.players = it.next().and_then(|s| s.parse().ok()),
            "--seed" => args.seed = it.next().and_then(|s| s.parse().ok()),
            "--seconds-per-day" => {
                args.seconds_per_day = it.next().and_then(|s| s.parse().ok())
            }
            "--trade-log" => args.trade_log = it.next(),
            "--items" => args.items = it.next(),
            "--json" => args.json = true,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

/// Momentum-free bot: rotates through symbols, buys with a tenth of its cash
/// and dumps a position every third day.
fn bot_trades(server: &GameServer, bots: &[PlayerId], day_index: u32) {
    let session = server.session();
    let mut s = session.lock();
    if s.phase() != GamePhase::Round {
        return;
    }
    let symbols: Vec<_> = s.market().symbols().cloned().collect();
    if symbols.is_empty() {
        return;
    }
    for (i, &bot) in bots.iter().enumerate() {
        let Some(ledger) = s.ledger(bot) else {
            continue;
        };
        if !ledger.is_alive() {
            continue;
        }
        let symbol = &symbols[(day_index as usize + i) % symbols.len()];
        let Some(price) = s.market().price_cents(symbol) else {
            continue;
        };
        let held = ledger.holding(symbol);
        let cmd = if held > 0 && day_index % 3 == 2 {
            TradeCommand::sell(bot, symbol.as_str(), i64::from(held), price)
        } else {
            let qty = ledger.cash_cents() / 10 / price.max(1);
            if qty == 0 {
                continue;
            }
            TradeCommand::buy(bot, symbol.as_str(), qty, price)
        };
        if let Err(err) = s.execute(&cmd) {
            debug!(player = %bot, %err, "bot trade rejected");
        }
    }
}

async fn run_bots(server: GameServer, bots: Vec<PlayerId>) {
    let mut rx = server.bus().subscribe();
    loop {
        match rx.recv().await {
            Ok(env) => match env.event {
                GameEvent::NewDay { day_index, .. } => bot_trades(&server, &bots, day_index),
                GameEvent::ItemOffers { player, offers } if bots.contains(&player) => {
                    if let Some(first) = offers.first() {
                        if let Err(err) = server.select_item(player, &first.id) {
                            warn!(%player, %err, "bot item selection failed");
                        }
                    }
                }
                GameEvent::SessionReset => break,
                _ => {}
            },
            Err(RecvError::Lagged(n)) => warn!(missed = n, "bot event stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(summary: &GameSummary) {
    match summary.winner {
        Some(w) => println!("Game over after {} rounds | winner: {w}", summary.rounds),
        None => println!("Game over after {} rounds | no survivors", summary.rounds),
    }
    for s in &summary.standings {
        println!(
            "{} {:<8} | hp: {:>3} | equity: ${:.2} | {}",
            s.player,
            s.name,
            s.hp,
            s.equity_cents as f64 / 100.0,
            if s.eliminated { "eliminated" } else { "alive" }
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args()?;
    let mut cfg = match &args.config {
        Some(path) => GameConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => GameConfig::default(),
    };
    if let Some(seed) = args.seed {
        cfg.market.rng_seed = seed;
        cfg.items.rng_seed = seed;
    }
    if let Some(spd) = args.seconds_per_day {
        cfg.clock.seconds_per_day = spd;
    }
    if let Some(path) = &args.items {
        cfg.items.catalog_path = Some(path.clone());
    }
    cfg.validate()?;

    let trade_log: Arc<dyn TradeLog> = match &args.trade_log {
        Some(path) => Arc::new(JsonLinesTradeLog::open(path)?),
        None => Arc::new(NullTradeLog),
    };
    let session = GameSession::new(cfg, EventBus::default(), Arc::clone(&trade_log))?;
    let server = GameServer::new(session);
    let players = args.players.unwrap_or(4).max(1);
    let bots: Vec<PlayerId> = (1..=players)
        .map(|i| server.join(&format!("bot-{i}")))
        .collect();
    info!(players, trade_log = ?args.trade_log, "starting headless game");

    let bot_task = tokio::spawn(run_bots(server.clone(), bots));
    let summary = server.run().await;
    if let Err(err) = bot_task.await {
        warn!(%err, "bot task failed");
    }
    trade_log.flush()?;

    match summary {
        Some(summary) if args.json => println!("{}", serde_json::to_string_pretty(&summary)?),
        Some(summary) => print_summary(&summary),
        None => println!("Game stopped before it finished"),
    }
    Ok(())
}
