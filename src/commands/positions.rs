//! Ledger report

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use bracket_trader::ledger::{create_ledger, TradeRecord};
use bracket_trader::Config;

pub fn run(config_path: String, history: usize, export: Option<String>) -> Result<()> {
    let config = Config::from_file(&config_path).context("Failed to load configuration")?;
    let ledger = create_ledger(&config.state_dir).context("Failed to open trade ledger")?;

    let active = ledger.active_trades()?;
    let closed = ledger.closed_trades()?;
    let today = ledger.daily_stats(Utc::now().date_naive())?;

    println!("\n{}", "=".repeat(90));
    println!("ACTIVE TRADES ({})", active.len());
    println!("{}", "=".repeat(90));
    for t in &active {
        println!(
            "{:<10} {:<8} {:<4} {:>12} @ {:<12.5} sl {:<12.5} tp {:<12.5} [{}]{}",
            t.symbol.as_str(),
            t.venue.as_str(),
            t.side.as_str(),
            t.position_size(),
            t.entry(),
            t.stop_loss,
            t.take_profit,
            t.state,
            t.error.as_deref().map(|e| format!("  ! {}", e)).unwrap_or_default()
        );
    }

    println!("\nRECENT CLOSED TRADES");
    println!("{}", "-".repeat(90));
    for t in closed.iter().rev().take(history) {
        print_closed(t);
    }

    let wins = closed.iter().filter(|t| t.is_win()).count();
    println!("\n{}", "=".repeat(90));
    println!("Closed Trades:      {}", closed.len());
    if !closed.is_empty() {
        println!("Win Rate:           {:.2}%", wins as f64 / closed.len() as f64 * 100.0);
    }
    println!("Realized P&L:       {:.2} {}", ledger.realized_pnl()?, config.risk.account_currency);
    println!(
        "Today:              {} trades, {} wins, {} losses, P&L {:.2}, fees {:.2}",
        today.trades, today.wins, today.losses, today.realized_pnl, today.fees
    );
    if let Some(ckpt) = ledger.load_checkpoint()? {
        println!(
            "Last checkpoint:    cycle {} at {} ({}, capital {:.2}{})",
            ckpt.cycle_count,
            ckpt.timestamp.format("%Y-%m-%d %H:%M:%S"),
            if ckpt.paper_mode { "paper" } else { "live" },
            ckpt.capital,
            if ckpt.halted { ", HALTED" } else { "" }
        );
    }
    println!("{}", "=".repeat(90));

    if let Some(path) = export {
        ledger.export_json(Path::new(&path))?;
        println!("Ledger exported to {}", path);
    }
    Ok(())
}

fn print_closed(t: &TradeRecord) {
    println!(
        "{:<10} {:<8} {:<4} {:>12} {:<12.5} -> {:<12.5} {:>10.2}  {:<12} {}",
        t.symbol.as_str(),
        t.venue.as_str(),
        t.side.as_str(),
        t.position_size(),
        t.entry(),
        t.exit_price.unwrap_or_default(),
        t.realized_pnl.unwrap_or_default(),
        t.exit_reason.map(|r| r.to_string()).unwrap_or_default(),
        t.closed_at.map(|c| c.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default()
    );
}
