//! Operator override of the emergency bailout or a disabled strategy

use anyhow::{Context, Result};

use bracket_trader::ledger::{create_ledger, GuardReset};
use bracket_trader::risk::Guards;
use bracket_trader::Config;

pub fn run(config_path: String, bailout: bool, strategy: Option<String>) -> Result<()> {
    if !bailout && strategy.is_none() {
        anyhow::bail!("Nothing to reset: pass --bailout and/or --strategy NAME");
    }
    let config = Config::from_file(&config_path).context("Failed to load configuration")?;
    let ledger = create_ledger(&config.state_dir).context("Failed to open trade ledger")?;

    if bailout {
        ledger.record_guard_reset(GuardReset::Bailout)?;
        println!("Emergency bailout reset");
    }
    if let Some(name) = strategy {
        ledger.record_guard_reset(GuardReset::Strategy(name.clone()))?;
        println!("Strategy '{}' re-enabled", name);
    }

    // a running engine applies these on its next scan cycle
    let mut guards = Guards::new(&config.guards, &config.risk);
    guards.replay(&ledger.all_trades()?, &ledger.guard_resets()?);
    println!(
        "Guards now: bailout {}, disabled strategies {:?}, capital {:.2}",
        if guards.is_halted() { "ACTIVE" } else { "off" },
        guards.health().disabled(),
        guards.capital().current()
    );
    Ok(())
}
