//! Trading engine
//!
//! Two loops share the ledger and the guards:
//! - the scan loop turns candles into setups and opens bracket trades
//! - the OCO monitor reconciles every active trade with its venue
//!
//! Ctrl+C (or any shutdown future) is broadcast to both. Each loop finishes
//! its current step, then a final checkpoint is written.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{Config, InstrumentConfig};
use crate::ledger::{Checkpoint, ExitReason, LedgerError, NewTrade, SqliteLedger, TradeRecord, TradeState};
use crate::oco::{flatten_and_close, OcoError, OcoExecutor, OcoMonitor, OpenOutcome};
use crate::risk::{Guards, PositionSizer, Rejection};
use crate::signals::{best_setup, Setup, SignalScanner};
use crate::types::{Side, Venue};
use crate::venues::{Broker, CoinbaseClient, OandaClient, PaperBroker, Router};

/// Client for one live venue, built from config and environment
pub fn connect_venue(config: &Config, venue: Venue) -> Result<Arc<dyn Broker>> {
    let transport = config.transport.client_config();
    match venue {
        Venue::Oanda => {
            let client = OandaClient::new(
                config.oanda_token()?,
                config.oanda_account()?,
                config.oanda.url(),
                transport,
            )?
            .with_granularity(config.oanda.granularity.clone());
            Ok(Arc::new(client))
        }
        Venue::Coinbase => {
            let mut client =
                CoinbaseClient::new(config.coinbase_auth()?, transport)?.with_account_currency(config.risk.account_currency.clone());
            if let Some(url) = &config.coinbase.base_url {
                client = client.with_base_url(url.clone());
            }
            Ok(Arc::new(client))
        }
        Venue::Paper => Ok(Arc::new(paper_broker(config, &[]))),
    }
}

fn paper_broker(config: &Config, feeds: &[Arc<dyn Broker>]) -> PaperBroker {
    let mut paper = PaperBroker::new(config.paper.initial_balance)
        .with_spread(config.paper.spread)
        .with_fee_rate(config.paper.fee_rate)
        .with_account_currency(config.risk.account_currency.clone());
    for feed in feeds {
        paper = paper.with_feed(feed.venue(), feed.clone());
    }
    for inst in &config.instruments {
        paper = paper.route(inst.symbol(), inst.venue);
    }
    paper
}

/// Venues for every configured instrument
///
/// Live mode needs credentials for each venue. Paper mode uses whatever
/// venues it can reach as price feeds and executes on the paper venue.
pub fn build_router(config: &Config, paper: bool) -> Result<Router> {
    let mut router = Router::new().paper_mode(paper);
    let mut feeds = Vec::new();
    for venue in config.venues() {
        match connect_venue(config, venue) {
            Ok(broker) => {
                info!("Connected to {}", venue);
                feeds.push(broker.clone());
                router = router.with_broker(broker);
            }
            Err(e) if paper => warn!("{} unavailable in paper mode, no live prices: {:#}", venue, e),
            Err(e) => return Err(e.context(format!("Failed to connect to {}", venue))),
        }
    }
    if paper {
        router = router.with_broker(Arc::new(paper_broker(config, &feeds)));
    }
    Ok(router)
}

/// What one scan cycle did
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub scanned: usize,
    pub setups: usize,
    pub opened: Vec<TradeRecord>,
    pub rejected: Vec<(String, Rejection)>,
    pub errors: usize,
}

#[derive(Debug, Default)]
pub struct FlattenReport {
    pub closed: Vec<TradeRecord>,
    pub failed: Vec<(TradeRecord, String)>,
    /// Pending trades have no known position to close
    pub skipped: Vec<TradeRecord>,
}

pub struct Trader {
    config: Config,
    ledger: SqliteLedger,
    router: Router,
    guards: Arc<Mutex<Guards>>,
    scanners: Vec<Box<dyn SignalScanner>>,
    sizer: PositionSizer,
    executor: OcoExecutor,
    cycles: AtomicU64,
    /// Operator resets already applied
    resets_applied: AtomicUsize,
    config_hash: String,
}

impl Trader {
    pub fn new(config: Config, ledger: SqliteLedger, router: Router) -> Result<Self> {
        let scanners = config.scanner.build()?;
        let guards = Guards::new(&config.guards, &config.risk);
        Ok(Self {
            sizer: PositionSizer::new(config.risk.clone()),
            executor: OcoExecutor::new(ledger.clone(), config.monitor.clone()),
            guards: Arc::new(Mutex::new(guards)),
            config_hash: config.fingerprint(),
            cycles: AtomicU64::new(0),
            resets_applied: AtomicUsize::new(0),
            scanners,
            config,
            ledger,
            router,
        })
    }

    pub fn ledger(&self) -> &SqliteLedger {
        &self.ledger
    }

    pub fn guards(&self) -> Arc<Mutex<Guards>> {
        self.guards.clone()
    }

    pub fn monitor(&self) -> OcoMonitor {
        OcoMonitor::new(self.executor.clone(), self.router.clone(), self.guards.clone())
    }

    /// Rebuild guard state from the ledger
    pub async fn recover(&self) -> Result<()> {
        let trades = self.ledger.all_trades()?;
        let resets = self.ledger.guard_resets()?;
        self.guards.lock().await.replay(&trades, &resets);
        self.resets_applied.store(resets.len(), Ordering::SeqCst);

        let active: Vec<&TradeRecord> = trades.iter().filter(|t| t.is_active()).collect();
        if !active.is_empty() {
            info!("Resuming {} active trades", active.len());
            for t in active {
                info!(trade_id = %t.id, "  {} {} {} on {} [{}]", t.side, t.position_size(), t.symbol, t.venue, t.state);
            }
        }
        if let Some(ckpt) = self.ledger.load_checkpoint()? {
            if ckpt.config_hash != self.config_hash {
                warn!("Trading parameters changed since last run ({} -> {})", ckpt.config_hash, self.config_hash);
            }
            self.cycles.store(ckpt.cycle_count, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Scan every instrument once and open what passes the guards
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        self.apply_new_resets().await?;
        if self.guards.lock().await.is_halted() {
            warn!("Emergency bailout active, skipping scan. Run `reset --bailout` to resume trading.");
            report.rejected.push(("*".to_string(), Rejection::Halted));
            self.checkpoint().await?;
            return Ok(report);
        }

        for inst in &self.config.instruments {
            report.scanned += 1;
            match self.scan_instrument(inst).await {
                Ok(None) => {}
                Ok(Some(Ok(trade))) => {
                    report.setups += 1;
                    report.opened.push(trade);
                }
                Ok(Some(Err(rejection))) => {
                    report.setups += 1;
                    info!(symbol = %inst.symbol, "Setup rejected: {}", rejection);
                    report.rejected.push((inst.symbol.clone(), rejection));
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(symbol = %inst.symbol, "Scan failed: {:#}", e);
                }
            }
        }

        let cycle = self.checkpoint().await?;
        info!(
            "Cycle {}: {} scanned, {} setups, {} opened, {} rejected, {} errors",
            cycle,
            report.scanned,
            report.setups,
            report.opened.len(),
            report.rejected.len(),
            report.errors
        );
        Ok(report)
    }

    /// Pick up resets recorded by the `reset` command while running
    async fn apply_new_resets(&self) -> Result<()> {
        let resets = self.ledger.guard_resets()?;
        let seen = self.resets_applied.load(Ordering::SeqCst);
        if resets.len() > seen {
            let mut guards = self.guards.lock().await;
            for entry in &resets[seen..] {
                info!("Applying operator reset {:?}", entry.reset);
                guards.apply_reset(&entry.reset);
            }
            self.resets_applied.store(resets.len(), Ordering::SeqCst);
        }
        Ok(())
    }

    /// `None` when there was no setup; the inner result is the trade or why not
    async fn scan_instrument(&self, inst: &InstrumentConfig) -> Result<Option<Result<TradeRecord, Rejection>>> {
        let symbol = inst.symbol();
        let broker = self.router.for_instrument(inst.venue)?;

        let candles = broker
            .candles(&symbol, self.config.scanner.lookback)
            .await
            .with_context(|| format!("Failed to fetch candles for {}", symbol))?;
        let Some(setup) = best_setup(&self.scanners, &symbol, &candles) else {
            debug!(symbol = %symbol, "No setup ({} candles)", candles.len());
            return Ok(None);
        };
        info!(
            symbol = %symbol,
            "{} {} {}: entry {} sl {} tp {} (confidence {:.2}, rr {:.2})",
            setup.strategy,
            setup.kind,
            setup.side,
            setup.entry,
            setup.stop_loss,
            setup.take_profit,
            setup.confidence,
            setup.risk_reward()
        );

        let verdict = self.guards.lock().await.check_entry(&setup, Utc::now());
        if let Err(rejection) = verdict {
            return Ok(Some(Err(rejection)));
        }
        if self.ledger.active_for(broker.venue(), &symbol)?.is_some() {
            return Ok(Some(Err(Rejection::ActiveTrade {
                symbol,
                venue: broker.venue(),
            })));
        }
        let open = self.ledger.active_trades()?.len();
        if open >= self.config.risk.max_open_trades {
            return Ok(Some(Err(Rejection::MaxOpenTrades(open))));
        }
        let shortable = broker.supports_short() && self.router.get(inst.venue).map_or(true, |b| b.supports_short());
        if setup.side == Side::Sell && !shortable {
            return Ok(Some(Err(Rejection::ShortUnsupported(inst.venue))));
        }

        let quote = broker.quote(&symbol).await?;
        let spec = broker.instrument(&symbol).await?;
        let live = setup.repriced(quote.entry_price(setup.side));
        let priced = Setup {
            stop_loss: spec
                .round_price_away(live.stop_loss, live.entry)
                .and_then(|d| d.to_f64())
                .unwrap_or(live.stop_loss),
            take_profit: spec.round_price_f64(live.take_profit).unwrap_or(live.take_profit),
            ..live
        };
        if !priced.is_well_formed() {
            warn!(symbol = %symbol, "Setup degenerate after repricing to {:?}", quote);
            return Ok(None);
        }

        let size = {
            let guards = self.guards.lock().await;
            self.sizer.size(
                &priced,
                guards.capital().sizing_capital(),
                guards.consecutive_losses(),
                &spec,
            )
        };
        let size = match size {
            Ok(size) => size,
            Err(rejection) => return Ok(Some(Err(rejection))),
        };

        let new = NewTrade {
            venue: broker.venue(),
            symbol: symbol.clone(),
            side: priced.side,
            size,
            entry_price: priced.entry,
            stop_loss: priced.stop_loss,
            take_profit: priced.take_profit,
            strategy: priced.strategy.clone(),
            confidence: priced.confidence,
        };
        let outcome = match self.executor.open(broker.as_ref(), new).await {
            Ok(outcome) => outcome,
            Err(OcoError::Ledger(LedgerError::DuplicateActive { venue, symbol })) => {
                return Ok(Some(Err(Rejection::ActiveTrade { symbol, venue })));
            }
            Err(e) => return Err(e.into()),
        };

        let mut guards = self.guards.lock().await;
        match &outcome {
            OpenOutcome::Protected(rec) => guards.record_open(rec),
            OpenOutcome::Compensated(rec) => {
                guards.record_open(rec);
                guards.record_close(rec);
            }
            OpenOutcome::Naked(rec) => {
                guards.record_open(rec);
                error!(trade_id = %rec.id, symbol = %symbol, "Trade left without protection");
            }
            OpenOutcome::Failed(rec) => guards.record_failure(rec),
            OpenOutcome::Unresolved(rec) => {
                guards.record_open(rec);
                warn!(trade_id = %rec.id, symbol = %symbol, "Entry outcome unknown, left pending for the monitor");
            }
        }
        Ok(Some(Ok(outcome.record().clone())))
    }

    /// Record engine state; returns the cycle number
    pub async fn checkpoint(&self) -> Result<u64> {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let (capital, halted) = {
            let guards = self.guards.lock().await;
            (guards.capital().current(), guards.is_halted())
        };
        self.ledger.save_checkpoint(&Checkpoint {
            timestamp: Utc::now(),
            cycle_count: cycle,
            capital,
            active_trades: self.ledger.active_trades()?.len(),
            halted,
            paper_mode: self.router.is_paper(),
            config_hash: self.config_hash.clone(),
        })?;
        Ok(cycle)
    }

    async fn scan_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.engine.scan_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Scan loop started ({}s interval)", self.config.engine.scan_interval_secs);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Error in trading cycle: {:#}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Scan loop stopping");
                    break;
                }
            }
        }
    }

    /// Run both loops until Ctrl+C
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => warn!("Ctrl+C received - initiating graceful shutdown"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        })
        .await
    }

    /// Run both loops until `shutdown` completes
    pub async fn run_until<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.recover().await?;
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let monitor = self.monitor();
        let monitor_rx = shutdown_tx.subscribe();
        let monitor_task = tokio::spawn(async move { monitor.run(monitor_rx).await });

        let scanner = self.clone();
        let scan_rx = shutdown_tx.subscribe();
        let scan_task = tokio::spawn(async move { scanner.scan_loop(scan_rx).await });

        shutdown.await;
        // receivers may already be gone if a task panicked
        let _ = shutdown_tx.send(());

        for (name, task) in [("scan", scan_task), ("monitor", monitor_task)] {
            if let Err(e) = task.await {
                error!("{} task ended abnormally: {}", name, e);
            }
        }

        let cycle = self.checkpoint().await?;
        let active = self.ledger.active_trades()?;
        info!("Shutdown complete at cycle {}: {} active trades remain at their venues", cycle, active.len());
        Ok(())
    }

    /// Close every active trade at market
    pub async fn flatten_all(&self) -> Result<FlattenReport> {
        let mut report = FlattenReport::default();
        for trade in self.ledger.active_trades()? {
            if trade.state == TradeState::Pending {
                warn!(trade_id = %trade.id, "Pending trade skipped; check {} for client order {}", trade.venue, trade.client_order_id);
                report.skipped.push(trade);
                continue;
            }
            let broker = match self.router.for_trade(&trade) {
                Ok(b) => b,
                Err(e) => {
                    report.failed.push((trade, e.to_string()));
                    continue;
                }
            };
            match flatten_and_close(&self.ledger, broker.as_ref(), &trade, ExitReason::Flattened).await {
                Ok(closed) => {
                    self.guards.lock().await.record_close(&closed);
                    report.closed.push(closed);
                }
                Err(e) => {
                    error!(trade_id = %trade.id, symbol = %trade.symbol, "Flatten failed: {}", e);
                    report.failed.push((trade, e.to_string()));
                }
            }
        }
        self.checkpoint().await?;
        Ok(report)
    }
}
