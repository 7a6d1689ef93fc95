//! Opening saga
//!
//! ```text
//! open_pending ─> submit_entry ─┬─ rejected ────────────> FAILED
//!                               ├─ lost response ─> lookup_entry
//!                               │                    ├─ filled ─> (as a fill)
//!                               │                    ├─ unfilled ─> FAILED
//!                               │                    └─ unknown ─> stays PENDING
//!                               └─ fill ─> FILLED ─┬─ protection ─> PROTECTED
//!                                                  └─ no protection
//!                                                       ├─ flatten ok ─> CLOSED (compensated)
//!                                                       └─ flatten err ─> stays FILLED
//! ```
//!
//! A trade left `Filled` is naked and one left `Pending` has an entry the
//! venue may or may not have filled; the monitor settles both on its next
//! tick.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use super::{flatten_and_close, MonitorConfig, OcoResult};
use crate::error::BrokerError;
use crate::ledger::{ExitReason, FillUpdate, NewTrade, ProtectionIds, SqliteLedger, TradeRecord};
use crate::venues::{BracketRequest, Broker, EntryFill, EntryStatus};

/// How an opening saga ended
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    Protected(TradeRecord),
    /// Filled, protection failed, position flattened
    Compensated(TradeRecord),
    /// Filled, protection and flatten both failed
    Naked(TradeRecord),
    /// Entry never filled
    Failed(TradeRecord),
    /// The venue may have filled the entry; left pending for the monitor
    Unresolved(TradeRecord),
}

impl OpenOutcome {
    pub fn record(&self) -> &TradeRecord {
        match self {
            OpenOutcome::Protected(r)
            | OpenOutcome::Compensated(r)
            | OpenOutcome::Naked(r)
            | OpenOutcome::Failed(r)
            | OpenOutcome::Unresolved(r) => r,
        }
    }
}

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock(set: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases a trade back to the monitor when dropped
struct Claim {
    set: InFlight,
    id: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.id);
    }
}

/// Clones share the set of trades still being opened
#[derive(Clone)]
pub struct OcoExecutor {
    ledger: SqliteLedger,
    config: MonitorConfig,
    in_flight: InFlight,
}

impl OcoExecutor {
    pub fn new(ledger: SqliteLedger, config: MonitorConfig) -> Self {
        Self {
            ledger,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn ledger(&self) -> &SqliteLedger {
        &self.ledger
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Whether an `open` call still owns this trade
    pub fn is_in_flight(&self, trade_id: &str) -> bool {
        lock(&self.in_flight).contains(trade_id)
    }

    /// Open a bracket trade
    ///
    /// Errors only when the ledger refuses the trade up front (invalid or a
    /// duplicate) or a ledger write fails; venue failures are outcomes.
    pub async fn open(&self, broker: &dyn Broker, new: NewTrade) -> OcoResult<OpenOutcome> {
        let (pending, _claim) = self.claim_new(new)?;
        let request = BracketRequest::from_record(&pending);

        match broker.submit_entry(&request).await {
            Ok(fill) => self.settle(broker, &pending, fill).await,
            Err(e) if e.is_transient() => self.resolve_lost_entry(broker, pending, &e).await,
            Err(e) => {
                warn!(trade_id = %pending.id, symbol = %pending.symbol, "Entry rejected: {}", e);
                let failed = self.ledger.mark_failed(&pending.id, &e.to_string())?;
                Ok(OpenOutcome::Failed(failed))
            }
        }
    }

    /// Record the trade as pending and claim it in one step, so the monitor
    /// never sees it unclaimed
    fn claim_new(&self, new: NewTrade) -> OcoResult<(TradeRecord, Claim)> {
        let mut set = lock(&self.in_flight);
        let pending = self.ledger.open_pending(new)?;
        set.insert(pending.id.clone());
        drop(set);

        let claim = Claim {
            set: self.in_flight.clone(),
            id: pending.id.clone(),
        };
        Ok((pending, claim))
    }

    /// The entry request failed in a way that says nothing about the order
    async fn resolve_lost_entry(
        &self,
        broker: &dyn Broker,
        pending: TradeRecord,
        cause: &BrokerError,
    ) -> OcoResult<OpenOutcome> {
        error!(
            trade_id = %pending.id,
            client_order_id = %pending.client_order_id,
            "Entry outcome unknown ({}); looking it up at {}",
            cause,
            broker.venue()
        );
        let status = broker.lookup_entry(&pending).await;
        match status {
            Ok(EntryStatus::Filled(fill)) => {
                info!(trade_id = %pending.id, "Entry found filled at {}", broker.venue());
                self.settle(broker, &pending, fill).await
            }
            Ok(EntryStatus::Unfilled { reason }) => {
                warn!(trade_id = %pending.id, "Entry did not fill: {}", reason);
                let failed = self.ledger.mark_failed(&pending.id, &reason)?;
                Ok(OpenOutcome::Failed(failed))
            }
            other => {
                let seen = match other {
                    Ok(status) => format!("{:?}", status),
                    Err(e) => e.to_string(),
                };
                let note = format!("entry outcome unknown: {}; lookup: {}", cause, seen);
                let unresolved = self.ledger.annotate(&pending.id, &note)?;
                Ok(OpenOutcome::Unresolved(unresolved))
            }
        }
    }

    /// Record a fill, then protect the position or flatten it
    pub async fn settle(&self, broker: &dyn Broker, pending: &TradeRecord, fill: EntryFill) -> OcoResult<OpenOutcome> {
        let venue_protection = fill.protection.clone();
        let filled = self.ledger.mark_filled(
            &pending.id,
            FillUpdate {
                fill_price: fill.fill_price,
                filled_size: fill.filled_size,
                venue_order_id: Some(fill.venue_order_id.clone()),
                venue_trade_id: fill.venue_trade_id.clone(),
                fees: fill.fees,
            },
        )?;
        info!(
            trade_id = %filled.id,
            symbol = %filled.symbol,
            "Filled {} {} @ {}",
            filled.side,
            fill.filled_size,
            fill.fill_price
        );

        if let Some(ids) = venue_protection.filter(ProtectionIds::is_complete) {
            let protected = self.ledger.mark_protected(&filled.id, ids)?;
            info!(trade_id = %protected.id, "Protected on fill: sl={} tp={}", protected.stop_loss, protected.take_profit);
            return Ok(OpenOutcome::Protected(protected));
        }

        if let Some(ids) = self.protect(broker, &filled).await {
            let protected = self.ledger.mark_protected(&filled.id, ids)?;
            info!(trade_id = %protected.id, "Protection attached: sl={} tp={}", protected.stop_loss, protected.take_profit);
            return Ok(OpenOutcome::Protected(protected));
        }

        self.compensate(broker, filled).await
    }

    /// Attach protection with bounded retries
    pub async fn protect(&self, broker: &dyn Broker, trade: &TradeRecord) -> Option<ProtectionIds> {
        let attempts = self.config.protection_attempts.max(1);
        for attempt in 1..=attempts {
            match broker.attach_protection(trade).await {
                Ok(ids) if ids.is_complete() => return Some(ids),
                Ok(ids) => warn!(
                    trade_id = %trade.id,
                    "Protection incomplete (attempt {}/{}): {:?}",
                    attempt,
                    attempts,
                    ids
                ),
                Err(e) => {
                    warn!(trade_id = %trade.id, "Protection failed (attempt {}/{}): {}", attempt, attempts, e);
                    if !e.is_transient() {
                        break;
                    }
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.protection_retry()).await;
            }
        }
        None
    }

    async fn compensate(&self, broker: &dyn Broker, filled: TradeRecord) -> OcoResult<OpenOutcome> {
        error!(
            trade_id = %filled.id,
            symbol = %filled.symbol,
            "No protection after fill, flattening"
        );
        match flatten_and_close(&self.ledger, broker, &filled, ExitReason::Compensated).await {
            Ok(closed) => Ok(OpenOutcome::Compensated(closed)),
            Err(super::OcoError::Broker(e)) => {
                error!(
                    trade_id = %filled.id,
                    symbol = %filled.symbol,
                    "NAKED POSITION: flatten failed: {}. Monitor will retry.",
                    e
                );
                self.ledger
                    .annotate(&filled.id, &format!("naked: protection and flatten failed: {}", e))?;
                Ok(OpenOutcome::Naked(filled))
            }
            Err(e) => Err(e),
        }
    }
}
