//! Connection and credential check for each configured venue

use anyhow::{Context, Result};

use bracket_trader::engine::connect_venue;
use bracket_trader::Config;

pub fn run(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path).context("Failed to load configuration")?;
    let runtime = tokio::runtime::Runtime::new()?;

    let mut failures = 0;
    runtime.block_on(async {
        for venue in config.venues() {
            let broker = match connect_venue(&config, venue) {
                Ok(b) => b,
                Err(e) => {
                    println!("{:<10} FAIL  {:#}", venue.as_str(), e);
                    failures += 1;
                    continue;
                }
            };
            match broker.account_balance().await {
                Ok(balance) => println!("{:<10} OK    balance {:.2}", venue.as_str(), balance),
                Err(e) => {
                    println!("{:<10} FAIL  {}", venue.as_str(), e);
                    failures += 1;
                    continue;
                }
            }
            for inst in config.instruments.iter().filter(|i| i.venue == venue) {
                let symbol = inst.symbol();
                match (broker.quote(&symbol).await, broker.instrument(&symbol).await) {
                    (Ok(q), Ok(spec)) => println!(
                        "  {:<10} bid {} ask {}  size step {}  price step {}",
                        symbol.as_str(),
                        q.bid,
                        q.ask,
                        spec.size_increment,
                        spec.price_increment
                    ),
                    (Err(e), _) | (_, Err(e)) => {
                        println!("  {:<10} FAIL  {}", symbol.as_str(), e);
                        failures += 1;
                    }
                }
            }
        }
    });

    if failures > 0 {
        anyhow::bail!("{} checks failed", failures);
    }
    println!("All venues reachable");
    Ok(())
}
