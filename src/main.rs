//! bracket-trader - main entry point
//!
//! Subcommands:
//! - live: run the scan and monitor loops (paper or real)
//! - scan: one-shot signal scan against venue data or a CSV file
//! - positions: ledger report
//! - flatten: close every active trade at market
//! - reset: clear the emergency bailout or re-enable a strategy
//! - verify: check credentials and connectivity per venue
//! - token: print a Coinbase JWT for a request

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bracket_trader::config::DEFAULT_CONFIG_PATH;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "bracket-trader")]
#[command(about = "OCO bracket trading on OANDA and Coinbase with a single trade ledger", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run live trading
    Live {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Paper trading mode (safe, no real money)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,

        /// Scan interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Scan for setups once and print them
    Scan {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Scan a CSV file (datetime,open,high,low,close,volume) instead of venue data
        #[arg(long)]
        csv: Option<String>,

        /// Only this symbol; names the CSV data when the file name doesn't
        #[arg(short, long)]
        symbol: Option<String>,

        /// Save fetched candles as CSV into this directory
        #[arg(long)]
        save: Option<String>,
    },

    /// Show active and recent trades from the ledger
    Positions {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Number of closed trades to list
        #[arg(long, default_value = "20")]
        history: usize,

        /// Also write the full ledger as JSON to this path
        #[arg(long)]
        export: Option<String>,
    },

    /// Close every active trade at market
    Flatten {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Confirm
        #[arg(long)]
        yes: bool,
    },

    /// Clear the emergency bailout or re-enable a disabled strategy
    Reset {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Clear the emergency bailout
        #[arg(long)]
        bailout: bool,

        /// Re-enable this strategy
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Check credentials and connectivity for each venue
    Verify {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },

    /// Print a Coinbase JWT for METHOD PATH
    Token {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// HTTP method
        #[arg(default_value = "GET")]
        method: String,

        /// Request path, e.g. /api/v3/brokerage/accounts
        #[arg(default_value = "/api/v3/brokerage/accounts")]
        path: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str, console: bool) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    // Create log file with naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    if console {
        let file_appender = tracing_appender::rolling::never("logs", &log_filename);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    } else {
        // stdout carries the command's output (a token, a report)
        let file_appender = tracing_appender::rolling::never("logs", &log_filename);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (command_name, console) = match &cli.command {
        Commands::Live { .. } => ("live", true),
        Commands::Scan { .. } => ("scan", true),
        Commands::Positions { .. } => ("positions", false),
        Commands::Flatten { .. } => ("flatten", true),
        Commands::Reset { .. } => ("reset", false),
        Commands::Verify { .. } => ("verify", true),
        Commands::Token { .. } => ("token", false),
    };

    setup_logging(cli.verbose, command_name, console)?;

    match cli.command {
        Commands::Live {
            config,
            paper,
            live,
            interval,
        } => commands::live::run(config, paper, live, interval),

        Commands::Scan {
            config,
            csv,
            symbol,
            save,
        } => commands::scan::run(config, csv, symbol, save),

        Commands::Positions {
            config,
            history,
            export,
        } => commands::positions::run(config, history, export),

        Commands::Flatten { config, yes } => commands::flatten::run(config, yes),

        Commands::Reset {
            config,
            bailout,
            strategy,
        } => commands::reset::run(config, bailout, strategy),

        Commands::Verify { config } => commands::verify::run(config),

        Commands::Token { config, method, path } => commands::token::run(config, method, path),
    }
}
