//! Live trading command

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use bracket_trader::engine::{build_router, Trader};
use bracket_trader::ledger::create_ledger;
use bracket_trader::Config;

pub fn run(config_path: String, paper: bool, live: bool, interval: Option<u64>) -> Result<()> {
    if !paper && !live {
        anyhow::bail!("Must specify either --paper or --live mode");
    }
    if paper && live {
        anyhow::bail!("--paper and --live are mutually exclusive");
    }

    let mut config = Config::from_file(&config_path).context("Failed to load configuration")?;
    if let Some(secs) = interval {
        config.engine.scan_interval_secs = secs;
    }
    config.validate()?;

    if live {
        warn!("LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within 5 seconds to abort...");
        std::thread::sleep(Duration::from_secs(5));
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async(config, paper))
}

async fn run_async(config: Config, paper: bool) -> Result<()> {
    info!("Starting trading engine");
    info!("Mode: {} trading", if paper { "PAPER" } else { "LIVE" });
    for inst in &config.instruments {
        info!("  {} on {}", inst.symbol, inst.venue);
    }
    info!(
        "Scan every {}s, monitor every {}s, scanners {:?}",
        config.engine.scan_interval_secs, config.monitor.interval_secs, config.scanner.enabled
    );

    let ledger = create_ledger(&config.state_dir).context("Failed to open trade ledger")?;
    let router = build_router(&config, paper)?;
    let trader = Arc::new(Trader::new(config, ledger, router)?);

    trader.run().await
}
