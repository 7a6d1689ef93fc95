//! One-shot signal scan, against venue data or a CSV file

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use bracket_trader::engine::connect_venue;
use bracket_trader::signals::{SignalScanner, Setup};
use bracket_trader::{data, Candle, Config, Symbol};

pub fn run(config_path: String, csv: Option<String>, symbol: Option<String>, save: Option<String>) -> Result<()> {
    let config = Config::from_file(&config_path).context("Failed to load configuration")?;
    let scanners = config.scanner.build()?;

    if let Some(path) = csv {
        let symbol = symbol
            .or_else(|| PathBuf::from(&path).file_stem().map(|s| s.to_string_lossy().into_owned()))
            .context("--symbol is required when the file name is not the symbol")?;
        let candles = data::load_csv(&path)?;
        info!("Loaded {} candles for {} from {}", candles.len(), symbol, path);
        report(&scanners, &Symbol::new(symbol), &candles);
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        for inst in &config.instruments {
            let sym = inst.symbol();
            if symbol.as_deref().is_some_and(|s| s != sym.as_str()) {
                continue;
            }
            let broker = match connect_venue(&config, inst.venue) {
                Ok(b) => b,
                Err(e) => {
                    warn!("Skipping {}: {:#}", sym, e);
                    continue;
                }
            };
            let candles = match broker.candles(&sym, config.scanner.lookback).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Failed to fetch candles for {}: {}", sym, e);
                    continue;
                }
            };
            if let Some(dir) = &save {
                let path = PathBuf::from(dir).join(format!("{}.csv", sym));
                data::save_csv(&candles, &path)?;
                info!("Saved {} candles to {}", candles.len(), path.display());
            }
            report(&scanners, &sym, &candles);
        }
        Ok(())
    })
}

fn report(scanners: &[Box<dyn SignalScanner>], symbol: &Symbol, candles: &[Candle]) {
    println!("\n{} ({} candles)", symbol, candles.len());
    for scanner in scanners {
        if candles.len() < scanner.min_candles() {
            println!("  {:<10} needs {} candles", scanner.name(), scanner.min_candles());
            continue;
        }
        match scanner.scan(symbol, candles) {
            Some(setup) => print_setup(scanner.name(), &setup),
            None => println!("  {:<10} no setup", scanner.name()),
        }
    }
}

fn print_setup(name: &str, s: &Setup) {
    println!(
        "  {:<10} {} {:<12} entry {:.5}  sl {:.5}  tp {:.5}  rr {:.2}  confidence {:.2}",
        name,
        s.side,
        s.kind,
        s.entry,
        s.stop_loss,
        s.take_profit,
        s.risk_reward(),
        s.confidence
    );
}
