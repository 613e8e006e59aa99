//! Prop evaluation simulator.
//!
//! Runs the evaluation lifecycle end to end against an in-memory store and a
//! manually driven clock: a passing evaluation that graduates to a funded
//! account, a missed checkpoint, a loss-triggered auto-close and a position flip.
//! `--live` additionally resolves a BTC quote through the configured network sources.

use anyhow::{Context, Result};
use prop_eval_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Sim {
    engine: Engine<MemoryStore>,
    clock: Arc<ManualClock>,
    feed: Arc<StaticPriceSource>,
}

impl Sim {
    fn new(platform: PlatformConfig, price: Decimal) -> Self {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1_700_000_000_000)));
        let feed = Arc::new(StaticPriceSource::new("sim").with_price("BTC", price));
        let oracle = PriceOracle::new(vec![Box::new(feed.clone())]);
        let engine = Engine::new(MemoryStore::new(), oracle, clock.clone(), EngineConfig::new(platform));
        Self { engine, clock, feed }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let platform = load_config()?;
    tracing::info!(
        fee_rate = %platform.ledger.taker_fee_rate,
        auto_close = %platform.risk.auto_close_ratio,
        "configuration loaded"
    );

    println!("Prop Evaluation Simulator\n");

    scenario_1_pass_and_fund(&platform)?;
    scenario_2_missed_checkpoint(&platform)?;
    scenario_3_auto_close(&platform)?;
    scenario_4_flip(&platform)?;

    if std::env::args().any(|a| a == "--live") {
        live_quote(&platform)?;
    }

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn load_config() -> Result<PlatformConfig> {
    let mut platform = match std::env::var("PROP_CONFIG") {
        Ok(path) => PlatformConfig::from_json_file(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => {
            let env: Environment = std::env::var("PROP_ENV")
                .unwrap_or_else(|_| "development".to_string())
                .parse()?;
            env.config()
        }
    };
    platform.apply_env_overrides().context("applying PROP_* overrides")?;
    Ok(platform)
}

/// 5000 account, one checkpoint at 8%: trade to 5400+ and graduate.
fn scenario_1_pass_and_fund(platform: &PlatformConfig) -> Result<()> {
    println!("Scenario 1: Pass and Fund\n");

    let sim = Sim::new(platform.clone(), dec!(50000));
    let params = AccountParams::new(UserId::new("alice"), Quote::new(dec!(5000))).with_checkpoints(1, 24, dec!(8));
    let account = sim.engine.open_account(params)?;
    println!("  Opened evaluation #{} with ${}", account.id, account.size_base);

    let buy = sim.engine.place_order(OrderRequest::market(account.id, "BTC-PERP", true, dec!(1)))?;
    println!("  Bought 1 BTC @ ${}, fee ${}", buy.fill_price, buy.fee);

    sim.feed.set_price("BTC", dec!(50600));
    let sell = sim
        .engine
        .place_order(OrderRequest::market(account.id, "BTC", false, dec!(1)).reduce_only())?;
    println!("  Sold 1 BTC @ ${}, realized ${}", sell.fill_price, sell.realized_pnl);
    println!("  Balance ${}\n", sell.new_balance);

    sim.clock.advance_hours(25);
    let result = sim.engine.evaluate_account(account.id)?;
    println!("  Evaluation status: {}", result.status);

    if let Some(funded_id) = result.funded_account {
        let funded = sim.engine.get_account(funded_id)?;
        println!(
            "  Funded account #{}: balance ${}, leverage {}, drawdown {:?}\n",
            funded.id, funded.virtual_balance, funded.leverage, funded.max_drawdown
        );
    }
    Ok(())
}

/// Balance short of target when the deadline passes.
fn scenario_2_missed_checkpoint(platform: &PlatformConfig) -> Result<()> {
    println!("Scenario 2: Missed Checkpoint\n");

    let sim = Sim::new(platform.clone(), dec!(100));
    let params = AccountParams::new(UserId::new("bob"), Quote::new(dec!(5000))).with_checkpoints(1, 24, dec!(8));
    let account = sim.engine.open_account(params)?;

    sim.engine.place_order(OrderRequest::limit(account.id, "BTC", true, dec!(10), dec!(100)))?;
    sim.engine
        .place_order(OrderRequest::limit(account.id, "BTC", false, dec!(10), dec!(120)))?;

    let early = sim.engine.evaluate_account(account.id)?;
    println!("  Before deadline: {} (balance ${})", early.status, early.virtual_balance);

    sim.clock.advance_hours(24);
    let result = sim.engine.evaluate_account(account.id)?;
    println!("  At deadline: {} ({:?})", result.status, result.failure_reason);
    for checkpoint in &result.checkpoints {
        println!(
            "    checkpoint {}: required ${}, recorded ${}, passed {:?}",
            checkpoint.checkpoint_number,
            checkpoint.required_balance,
            checkpoint.checkpoint_balance,
            checkpoint.checkpoint_passed
        );
    }
    println!();
    Ok(())
}

/// Loss on margin past the threshold closes the position.
fn scenario_3_auto_close(platform: &PlatformConfig) -> Result<()> {
    println!("Scenario 3: Auto-Close\n");

    let sim = Sim::new(platform.clone(), dec!(100));
    let params = AccountParams::new(UserId::new("carol"), Quote::new(dec!(5000))).with_leverage(
        Leverage::new(dec!(10)).context("leverage")?,
    );
    let account = sim.engine.open_account(params)?;

    let opened = sim.engine.place_order(OrderRequest::market(account.id, "BTC", true, dec!(10)))?;
    if let Some(position) = &opened.position {
        println!("  Long 10 @ $100, margin ${}", position.margin_used);
    }

    sim.feed.set_price("BTC", dec!(99.4));
    let summary = sim.engine.refresh_positions(account.id)?;
    println!("  Price $99.40: updated {}, closed {}", summary.updated, summary.closed);

    let after = sim.engine.get_account(account.id)?;
    println!("  Balance ${}\n", after.virtual_balance);
    Ok(())
}

/// Selling more than held flips the position.
fn scenario_4_flip(platform: &PlatformConfig) -> Result<()> {
    println!("Scenario 4: Flip\n");

    let sim = Sim::new(platform.clone(), dec!(100));
    let params = AccountParams::new(UserId::new("dave"), Quote::new(dec!(5000)));
    let account = sim.engine.open_account(params)?;

    sim.engine.place_order(OrderRequest::limit(account.id, "BTC", true, dec!(1), dec!(100)))?;
    let flip = sim
        .engine
        .place_order(OrderRequest::limit(account.id, "BTC", false, dec!(1.5), dec!(110)))?;

    println!("  Realized ${} (fees ${})", flip.realized_pnl, flip.fee);
    for position in sim.engine.get_positions(account.id)? {
        println!("  Now {} @ ${}", position.size, position.avg_entry_price);
    }
    println!();
    Ok(())
}

fn live_quote(platform: &PlatformConfig) -> Result<()> {
    println!("Live quote\n");

    let sources = build_sources(&platform.oracle)?;
    let oracle = PriceOracle::new(sources);
    match oracle.quote(&Symbol::new("BTC"), Decimal::ZERO, Timestamp::now()) {
        Ok(quote) => println!("  BTC ${} from {}", quote.price, quote.source),
        Err(err) => println!("  unavailable: {err}"),
    }
    Ok(())
}
