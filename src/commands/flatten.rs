//! Emergency close of every active trade

use anyhow::{Context, Result};
use tracing::{info, warn};

use bracket_trader::engine::{build_router, Trader};
use bracket_trader::ledger::create_ledger;
use bracket_trader::Config;

pub fn run(config_path: String, yes: bool) -> Result<()> {
    let config = Config::from_file(&config_path).context("Failed to load configuration")?;
    let ledger = create_ledger(&config.state_dir).context("Failed to open trade ledger")?;

    let active = ledger.active_trades()?;
    if active.is_empty() {
        println!("No active trades.");
        return Ok(());
    }
    for t in &active {
        println!("  {} {} {} on {} [{}]", t.side, t.position_size(), t.symbol, t.venue, t.state);
    }
    if !yes {
        anyhow::bail!("Refusing to flatten {} trades without --yes", active.len());
    }

    // paper trades need the paper venue, live trades need their own
    let router = build_router(&config, true)?;
    let trader = Trader::new(config, ledger, router)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        trader.recover().await?;
        trader.flatten_all().await
    })?;

    for t in &report.closed {
        info!(
            "Closed {} {} @ {:.5}: pnl {:.2}",
            t.symbol,
            t.venue,
            t.exit_price.unwrap_or_default(),
            t.realized_pnl.unwrap_or_default()
        );
    }
    for t in &report.skipped {
        warn!("Skipped pending {} on {}; check client order {}", t.symbol, t.venue, t.client_order_id);
    }
    for (t, e) in &report.failed {
        warn!("FAILED to close {} on {}: {}", t.symbol, t.venue, e);
    }
    println!(
        "Flatten: {} closed, {} skipped, {} failed",
        report.closed.len(),
        report.skipped.len(),
        report.failed.len()
    );
    if !report.failed.is_empty() {
        anyhow::bail!("{} positions could not be closed", report.failed.len());
    }
    Ok(())
}
