//! Active trade monitor
//!
//! Each tick walks every active trade in the ledger and reconciles it with
//! its venue. Venue-side exits are recorded, lost protection is re-attached,
//! positions that cannot be protected are flattened, pending entries are
//! looked up by client order id, and stops trail profitable trades.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use super::{close_update, flatten_and_close, MonitorConfig, OcoExecutor, OcoResult, OpenOutcome};
use crate::ledger::{ExitReason, SqliteLedger, TradeRecord, TradeState};
use crate::risk::Guards;
use crate::venues::{Broker, EntryStatus, ExitFill, Router, TradeStatus};

/// What one tick did
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MonitorReport {
    pub checked: usize,
    /// Left alone because the executor is still opening them
    pub in_flight: usize,
    pub closed: usize,
    pub repaired: usize,
    pub compensated: usize,
    pub expired: usize,
    pub trailed: usize,
    /// Trades still without protection after the tick
    pub naked: usize,
    pub errors: usize,
}

pub struct OcoMonitor {
    ledger: SqliteLedger,
    router: Router,
    guards: Arc<Mutex<Guards>>,
    executor: OcoExecutor,
    config: MonitorConfig,
}

impl OcoMonitor {
    /// `executor` must be the one opening trades, so the monitor can see
    /// which trades it still owns
    pub fn new(executor: OcoExecutor, router: Router, guards: Arc<Mutex<Guards>>) -> Self {
        Self {
            ledger: executor.ledger().clone(),
            config: executor.config().clone(),
            router,
            guards,
            executor,
        }
    }

    /// Reconcile every active trade once
    pub async fn tick(&self) -> OcoResult<MonitorReport> {
        let mut report = MonitorReport::default();
        for listed in self.ledger.active_trades()? {
            if self.executor.is_in_flight(&listed.id) {
                debug!(trade_id = %listed.id, "Still being opened, skipped");
                report.in_flight += 1;
                continue;
            }
            // the listing may predate the executor's last write
            let trade = match self.ledger.get(&listed.id)? {
                Some(trade) if trade.state.is_active() => trade,
                _ => continue,
            };
            report.checked += 1;
            let broker = match self.router.for_trade(&trade) {
                Ok(b) => b,
                Err(e) => {
                    warn!(trade_id = %trade.id, "No venue for trade: {}", e);
                    report.errors += 1;
                    continue;
                }
            };
            let result = match trade.state {
                TradeState::Pending => self.check_pending(broker.as_ref(), &trade, &mut report).await,
                TradeState::Protected => self.check_protected(broker.as_ref(), &trade, &mut report).await,
                TradeState::Filled => self.repair(broker.as_ref(), &trade, &mut report).await,
                TradeState::Closed | TradeState::Failed => Ok(()),
            };
            if let Err(e) = result {
                warn!(trade_id = %trade.id, symbol = %trade.symbol, "Monitor check failed: {}", e);
                report.errors += 1;
            }
        }

        let acted = report.closed + report.repaired + report.compensated + report.expired + report.trailed;
        if acted + report.naked > 0 {
            info!(
                "Monitor: {} checked, {} closed, {} repaired, {} compensated, {} expired, {} trailed, {} naked",
                report.checked,
                report.closed,
                report.repaired,
                report.compensated,
                report.expired,
                report.trailed,
                report.naked
            );
        } else {
            debug!("Monitor: {} checked, {} in flight", report.checked, report.in_flight);
        }
        Ok(report)
    }

    /// Tick on an interval until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("OCO monitor started ({}s interval)", self.config.interval_secs);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Monitor tick failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("OCO monitor stopping");
                    break;
                }
            }
        }
    }

    /// Settle an entry whose outcome never reached the ledger
    ///
    /// Only the venue's answer moves the trade: a fill is taken over and
    /// protected, an order that ended unfilled fails the trade. A venue with
    /// no order at all gets `pending_timeout_secs` before the trade fails.
    async fn check_pending(&self, broker: &dyn Broker, trade: &TradeRecord, report: &mut MonitorReport) -> OcoResult<()> {
        let age = Utc::now() - trade.created_at;
        let timed_out = age >= Duration::seconds(self.config.pending_timeout_secs);

        let status = match broker.lookup_entry(trade).await {
            Ok(status) => status,
            Err(e) => {
                if timed_out {
                    error!(
                        trade_id = %trade.id,
                        client_order_id = %trade.client_order_id,
                        "Entry pending for {}s and {} cannot be asked about it: {}",
                        age.num_seconds(),
                        trade.venue,
                        e
                    );
                }
                return Err(e.into());
            }
        };

        match status {
            EntryStatus::Filled(fill) => {
                warn!(trade_id = %trade.id, symbol = %trade.symbol, "Pending entry found filled at {}", trade.venue);
                match self.executor.settle(broker, trade, fill).await? {
                    OpenOutcome::Protected(_) => report.repaired += 1,
                    OpenOutcome::Compensated(closed) => {
                        report.compensated += 1;
                        self.guards.lock().await.record_close(&closed);
                    }
                    OpenOutcome::Naked(_) => report.naked += 1,
                    OpenOutcome::Failed(_) | OpenOutcome::Unresolved(_) => {}
                }
                Ok(())
            }
            EntryStatus::Unfilled { reason } => self.expire(trade, &reason, report).await,
            EntryStatus::NotFound if timed_out => {
                self.expire(trade, "venue has no order under this client order id", report).await
            }
            EntryStatus::Working { order_id } if timed_out => {
                warn!(
                    trade_id = %trade.id,
                    order_id = %order_id,
                    "Entry still working after {}s, cancelling",
                    age.num_seconds()
                );
                broker.cancel_order(&trade.symbol, &order_id).await?;
                Ok(())
            }
            EntryStatus::NotFound | EntryStatus::Working { .. } => {
                debug!(trade_id = %trade.id, "Entry not settled yet ({}s)", age.num_seconds());
                Ok(())
            }
        }
    }

    async fn expire(&self, trade: &TradeRecord, reason: &str, report: &mut MonitorReport) -> OcoResult<()> {
        warn!(trade_id = %trade.id, symbol = %trade.symbol, "Pending entry failed: {}", reason);
        let failed = self.ledger.mark_failed(&trade.id, reason)?;
        report.expired += 1;
        self.guards.lock().await.record_failure(&failed);
        Ok(())
    }

    async fn check_protected(
        &self,
        broker: &dyn Broker,
        trade: &TradeRecord,
        report: &mut MonitorReport,
    ) -> OcoResult<()> {
        match broker.poll_trade(trade).await? {
            TradeStatus::Protected(_) => self.trail(broker, trade, report).await,
            TradeStatus::Closed(exit) => self.record_exit(trade, &exit, report).await,
            TradeStatus::Unprotected { reason } => {
                warn!(trade_id = %trade.id, symbol = %trade.symbol, "Protection lost: {}", reason);
                let filled = self.ledger.mark_unprotected(&trade.id, &reason)?;
                self.repair(broker, &filled, report).await
            }
        }
    }

    /// Move the stop behind a profitable trade
    ///
    /// A failed replace is left to the next poll: a venue that lost the old
    /// protection shows the trade unprotected and it gets repaired.
    async fn trail(&self, broker: &dyn Broker, trade: &TradeRecord, report: &mut MonitorReport) -> OcoResult<()> {
        if !self.config.trailing.enabled {
            return Ok(());
        }
        let price = broker.quote(&trade.symbol).await?.exit_price(trade.side);
        let Some(stop) = self.config.trailing.stop_for(trade, price) else {
            return Ok(());
        };

        let mut moved = trade.clone();
        moved.stop_loss = stop;
        match broker.replace_protection(&moved).await {
            Ok(ids) if ids.is_complete() => {
                self.ledger.move_stop(&trade.id, stop, ids)?;
                info!(
                    trade_id = %trade.id,
                    symbol = %trade.symbol,
                    "Trailing stop {:.5} -> {:.5} (price {:.5})",
                    trade.stop_loss,
                    stop,
                    price
                );
                report.trailed += 1;
            }
            Ok(ids) => warn!(trade_id = %trade.id, "Trailing stop left protection incomplete: {:?}", ids),
            Err(e) => warn!(trade_id = %trade.id, symbol = %trade.symbol, "Trailing stop not moved: {}", e),
        }
        Ok(())
    }

    /// Protect a filled trade, or flatten it
    async fn repair(&self, broker: &dyn Broker, trade: &TradeRecord, report: &mut MonitorReport) -> OcoResult<()> {
        match broker.poll_trade(trade).await {
            Ok(TradeStatus::Closed(exit)) => return self.record_exit(trade, &exit, report).await,
            Ok(TradeStatus::Protected(ids)) if ids.is_complete() => {
                self.ledger.mark_protected(&trade.id, ids)?;
                info!(trade_id = %trade.id, "Protection confirmed at venue");
                report.repaired += 1;
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => debug!(trade_id = %trade.id, "Poll before repair failed: {}", e),
        }

        if let Some(ids) = self.executor.protect(broker, trade).await {
            self.ledger.mark_protected(&trade.id, ids)?;
            info!(trade_id = %trade.id, symbol = %trade.symbol, "Protection re-attached");
            report.repaired += 1;
            return Ok(());
        }

        match flatten_and_close(&self.ledger, broker, trade, ExitReason::Compensated).await {
            Ok(closed) => {
                report.compensated += 1;
                self.guards.lock().await.record_close(&closed);
                Ok(())
            }
            Err(e) => {
                error!(
                    trade_id = %trade.id,
                    symbol = %trade.symbol,
                    "NAKED POSITION: cannot protect or flatten: {}",
                    e
                );
                self.ledger.annotate(&trade.id, &format!("naked: {}", e))?;
                report.naked += 1;
                Ok(())
            }
        }
    }

    async fn record_exit(&self, trade: &TradeRecord, exit: &ExitFill, report: &mut MonitorReport) -> OcoResult<()> {
        let closed = self.ledger.mark_closed(&trade.id, close_update(trade, exit))?;
        info!(
            trade_id = %trade.id,
            symbol = %trade.symbol,
            "Closed by venue ({}) @ {}: pnl {:.2}",
            exit.reason,
            exit.exit_price,
            closed.realized_pnl.unwrap_or_default()
        );
        report.closed += 1;
        self.guards.lock().await.record_close(&closed);
        Ok(())
    }
}
