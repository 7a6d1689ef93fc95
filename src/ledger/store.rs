// Trade ledger
// SQLite-backed, append-only event log with a current-state projection
//
// Every state change writes one `events` row and rewrites the matching
// `trades` row inside a single transaction, so the projection can never
// drift from the log.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::types::*;
use crate::types::{Symbol, Venue};

const ACTIVE_STATES_SQL: &str = "('pending', 'filled', 'protected')";

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    json_backup_path: Option<PathBuf>,
}

impl SqliteLedger {
    pub fn open<P: AsRef<Path>>(db_path: P, json_backup_path: Option<PathBuf>) -> LedgerResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        let ledger = Self::from_connection(conn, json_backup_path)?;
        info!("Trade ledger opened at {}", db_path.display());
        Ok(ledger)
    }

    pub fn in_memory() -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, json_backup_path: Option<PathBuf>) -> LedgerResult<Self> {
        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
            json_backup_path,
        };
        ledger.create_tables()?;
        Ok(ledger)
    }

    fn conn(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    fn create_tables(&self) -> LedgerResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                state TEXT NOT NULL,
                realized_pnl REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id TEXT NOT NULL REFERENCES trades(id),
                from_state TEXT,
                to_state TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{{}}',
                at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS guard_resets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                at TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_trades_one_active
                ON trades(venue, symbol) WHERE state IN {active};
            CREATE INDEX IF NOT EXISTS idx_trades_state ON trades(state);
            CREATE INDEX IF NOT EXISTS idx_events_trade ON events(trade_id);",
            active = ACTIVE_STATES_SQL
        ))?;
        debug!("Ledger schema created/verified");
        Ok(())
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Validate and record a new trade in `Pending`
    pub fn open_pending(&self, new: NewTrade) -> LedgerResult<TradeRecord> {
        new.validate()?;
        let record = TradeRecord::from_new(new, Utc::now());
        let data = serde_json::to_string(&record)?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO trades (id, venue, symbol, state, realized_pnl, created_at, updated_at, closed_at, data)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?5, NULL, ?6)",
            params![
                record.id,
                record.venue.as_str(),
                record.symbol.as_str(),
                record.state.as_str(),
                record.created_at.to_rfc3339(),
                data,
            ],
        );
        if let Err(e) = inserted {
            return Err(if is_unique_violation(&e) {
                LedgerError::DuplicateActive {
                    venue: record.venue,
                    symbol: record.symbol.clone(),
                }
            } else {
                e.into()
            });
        }
        insert_event(&tx, &record.id, None, TradeState::Pending, &serde_json::to_value(&record)?, record.created_at)?;
        tx.commit()?;

        info!(
            trade_id = %record.id,
            "Ledger: {} {} {} size={} entry={} sl={} tp={} [pending]",
            record.venue, record.side, record.symbol, record.size,
            record.entry_price, record.stop_loss, record.take_profit
        );
        drop(conn);
        self.backup();
        Ok(record)
    }

    pub fn mark_filled(&self, id: &str, fill: FillUpdate) -> LedgerResult<TradeRecord> {
        let payload = serde_json::to_value(&fill)?;
        self.transition(id, TradeState::Filled, payload, |rec, now| {
            rec.fill_price = Some(fill.fill_price);
            rec.filled_size = Some(fill.filled_size);
            rec.venue_order_id = fill.venue_order_id.clone().or(rec.venue_order_id.take());
            rec.venue_trade_id = fill.venue_trade_id.clone().or(rec.venue_trade_id.take());
            rec.fees += fill.fees;
            rec.filled_at = Some(now);
        })
    }

    pub fn mark_protected(&self, id: &str, protection: ProtectionIds) -> LedgerResult<TradeRecord> {
        if !protection.is_complete() {
            return Err(LedgerError::InvalidTrade(format!(
                "trade {}: protection must cover both stop loss and take profit",
                id
            )));
        }
        let payload = serde_json::to_value(&protection)?;
        self.transition(id, TradeState::Protected, payload, |rec, _| {
            rec.protection = protection.clone();
            rec.error = None;
        })
    }

    /// Protected trade lost one or both protective orders
    pub fn mark_unprotected(&self, id: &str, reason: &str) -> LedgerResult<TradeRecord> {
        let payload = serde_json::json!({ "reason": reason });
        self.transition(id, TradeState::Filled, payload, |rec, _| {
            rec.protection = ProtectionIds::default();
            rec.error = Some(reason.to_string());
        })
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> LedgerResult<TradeRecord> {
        let payload = serde_json::json!({ "error": error });
        self.transition(id, TradeState::Failed, payload, |rec, now| {
            rec.error = Some(error.to_string());
            rec.closed_at = Some(now);
        })
    }

    pub fn mark_closed(&self, id: &str, close: CloseUpdate) -> LedgerResult<TradeRecord> {
        let payload = serde_json::to_value(&close)?;
        self.transition(id, TradeState::Closed, payload, |rec, now| {
            rec.exit_price = Some(close.exit_price);
            rec.realized_pnl = Some(close.realized_pnl);
            rec.exit_reason = Some(close.reason);
            rec.fees += close.fees;
            rec.closed_at = Some(now);
        })
    }

    /// Note an error on an active trade without changing its state
    pub fn annotate(&self, id: &str, note: &str) -> LedgerResult<TradeRecord> {
        self.amend(id, serde_json::json!({ "note": note }), |rec| {
            rec.error = Some(note.to_string());
            Ok(())
        })
    }

    /// Record a protected trade's stop moved to `stop_loss`
    ///
    /// The stop may only tighten: it moves toward the take profit, never
    /// across it.
    pub fn move_stop(&self, id: &str, stop_loss: f64, protection: ProtectionIds) -> LedgerResult<TradeRecord> {
        let payload = serde_json::json!({ "stop_loss": stop_loss, "protection": protection });
        let moved = self.amend(id, payload, |rec| {
            if rec.state != TradeState::Protected {
                return Err(LedgerError::InvalidTrade(format!(
                    "trade {}: stop can only move while protected, state is {}",
                    id, rec.state
                )));
            }
            if !protection.is_complete() {
                return Err(LedgerError::InvalidTrade(format!(
                    "trade {}: protection must cover both stop loss and take profit",
                    id
                )));
            }
            let dir = rec.side.sign();
            let tightens = (stop_loss - rec.stop_loss) * dir > 0.0;
            let below_target = (rec.take_profit - stop_loss) * dir > 0.0;
            if !stop_loss.is_finite() || !tightens || !below_target {
                return Err(LedgerError::InvalidTrade(format!(
                    "trade {}: stop {} does not tighten {} toward {}",
                    id, stop_loss, rec.stop_loss, rec.take_profit
                )));
            }
            rec.stop_loss = stop_loss;
            rec.protection = protection.clone();
            Ok(())
        })?;
        info!(trade_id = %id, "Ledger: {} {} stop -> {}", moved.venue, moved.symbol, stop_loss);
        self.backup();
        Ok(moved)
    }

    /// Rewrite a trade in place and log the change as a same-state event
    fn amend<F>(&self, id: &str, payload: serde_json::Value, apply: F) -> LedgerResult<TradeRecord>
    where
        F: FnOnce(&mut TradeRecord) -> LedgerResult<()>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut record = load_record(&tx, id)?;
        apply(&mut record)?;
        let now = Utc::now();
        record.updated_at = now;
        write_projection(&tx, &record)?;
        insert_event(&tx, id, Some(record.state), record.state, &payload, now)?;
        tx.commit()?;
        Ok(record)
    }

    fn transition<F>(
        &self,
        id: &str,
        to: TradeState,
        payload: serde_json::Value,
        apply: F,
    ) -> LedgerResult<TradeRecord>
    where
        F: FnOnce(&mut TradeRecord, DateTime<Utc>),
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut record = load_record(&tx, id)?;
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }

        let now = Utc::now();
        apply(&mut record, now);
        record.state = to;
        record.updated_at = now;

        write_projection(&tx, &record)?;
        insert_event(&tx, id, Some(from), to, &payload, now)?;
        tx.commit()?;

        info!(
            trade_id = %id,
            "Ledger: {} {} {} -> {}",
            record.venue, record.symbol, from, to
        );
        drop(conn);
        self.backup();
        Ok(record)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get(&self, id: &str) -> LedgerResult<Option<TradeRecord>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row("SELECT data FROM trades WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(LedgerError::from))
            .transpose()
    }

    pub fn active_trades(&self) -> LedgerResult<Vec<TradeRecord>> {
        self.query_records(
            &format!(
                "SELECT data FROM trades WHERE state IN {} ORDER BY created_at",
                ACTIVE_STATES_SQL
            ),
            [],
        )
    }

    pub fn active_for(&self, venue: Venue, symbol: &Symbol) -> LedgerResult<Option<TradeRecord>> {
        let mut found = self.query_records(
            &format!(
                "SELECT data FROM trades WHERE venue = ?1 AND symbol = ?2 AND state IN {}",
                ACTIVE_STATES_SQL
            ),
            params![venue.as_str(), symbol.as_str()],
        )?;
        Ok(found.pop())
    }

    pub fn trades_in_state(&self, state: TradeState) -> LedgerResult<Vec<TradeRecord>> {
        self.query_records(
            "SELECT data FROM trades WHERE state = ?1 ORDER BY created_at",
            params![state.as_str()],
        )
    }

    /// Closed trades, oldest close first
    pub fn closed_trades(&self) -> LedgerResult<Vec<TradeRecord>> {
        self.query_records(
            "SELECT data FROM trades WHERE state = 'closed' ORDER BY closed_at",
            [],
        )
    }

    /// Closed and failed trades in the order they ended
    pub fn finished_trades(&self) -> LedgerResult<Vec<TradeRecord>> {
        self.query_records(
            "SELECT data FROM trades WHERE state IN ('closed', 'failed') ORDER BY closed_at",
            [],
        )
    }

    pub fn all_trades(&self) -> LedgerResult<Vec<TradeRecord>> {
        self.query_records("SELECT data FROM trades ORDER BY created_at", [])
    }

    fn query_records<P: rusqlite::Params>(&self, sql: &str, params: P) -> LedgerResult<Vec<TradeRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|d| serde_json::from_str(d).map_err(LedgerError::from))
            .collect()
    }

    pub fn events_for(&self, trade_id: &str) -> LedgerResult<Vec<TradeEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT seq, trade_id, from_state, to_state, payload, at
             FROM events WHERE trade_id = ?1 ORDER BY seq",
        )?;
        let raw = stmt
            .query_map(params![trade_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(seq, trade_id, from, to, payload, at)| -> LedgerResult<TradeEvent> {
                Ok(TradeEvent {
                    seq,
                    trade_id,
                    from_state: from.map(|s| s.parse()).transpose()?,
                    to_state: to.parse()?,
                    payload: serde_json::from_str(&payload)?,
                    at: parse_time(&at)?,
                })
            })
            .collect()
    }

    /// Sum of realized P&L over closed trades
    pub fn realized_pnl(&self) -> LedgerResult<f64> {
        let conn = self.conn()?;
        let total: Option<f64> = conn.query_row(
            "SELECT SUM(realized_pnl) FROM trades WHERE state = 'closed'",
            [],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0.0))
    }

    /// Stats for trades closed on `date` (UTC)
    pub fn daily_stats(&self, date: NaiveDate) -> LedgerResult<DailyStats> {
        let mut stats = DailyStats {
            date: Some(date),
            ..Default::default()
        };
        for trade in self.closed_trades()? {
            if trade.closed_at.map(|t| t.date_naive()) != Some(date) {
                continue;
            }
            let pnl = trade.realized_pnl.unwrap_or(0.0);
            stats.trades += 1;
            if pnl > 0.0 {
                stats.wins += 1;
            } else if pnl < 0.0 {
                stats.losses += 1;
            }
            stats.realized_pnl += pnl;
            stats.fees += trade.fees;
        }
        Ok(stats)
    }

    // =========================================================================
    // Checkpoints and backup
    // =========================================================================

    pub fn save_checkpoint(&self, ckpt: &Checkpoint) -> LedgerResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO checkpoints (timestamp, data) VALUES (?1, ?2)",
            params![ckpt.timestamp.to_rfc3339(), serde_json::to_string(ckpt)?],
        )?;
        debug!(
            "Checkpoint saved: cycle={}, capital={:.2}",
            ckpt.cycle_count, ckpt.capital
        );
        Ok(())
    }

    pub fn load_checkpoint(&self) -> LedgerResult<Option<Checkpoint>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM checkpoints ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).map_err(LedgerError::from))
            .transpose()
    }

    pub fn record_guard_reset(&self, reset: GuardReset) -> LedgerResult<GuardResetEntry> {
        let entry = GuardResetEntry { reset, at: Utc::now() };
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO guard_resets (at, data) VALUES (?1, ?2)",
            params![entry.at.to_rfc3339(), serde_json::to_string(&entry)?],
        )?;
        info!("Ledger: guard reset {:?}", entry.reset);
        Ok(entry)
    }

    /// Every operator reset, oldest first
    pub fn guard_resets(&self) -> LedgerResult<Vec<GuardResetEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM guard_resets ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|d| serde_json::from_str(d).map_err(LedgerError::from))
            .collect()
    }

    pub fn export_json(&self, path: &Path) -> LedgerResult<()> {
        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "trades": self.all_trades()?,
            "checkpoint": self.load_checkpoint()?,
        });
        std::fs::write(path, serde_json::to_string_pretty(&state)?)?;
        debug!("Ledger exported to: {}", path.display());
        Ok(())
    }

    fn backup(&self) {
        if let Some(path) = &self.json_backup_path {
            if let Err(e) = self.export_json(path) {
                warn!("Ledger JSON backup failed: {}", e);
            }
        }
    }
}

fn load_record(conn: &Connection, id: &str) -> LedgerResult<TradeRecord> {
    let data: Option<String> = conn
        .query_row("SELECT data FROM trades WHERE id = ?1", params![id], |row| row.get(0))
        .optional()?;
    match data {
        Some(d) => Ok(serde_json::from_str(&d)?),
        None => Err(LedgerError::NotFound(id.to_string())),
    }
}

fn write_projection(conn: &Connection, record: &TradeRecord) -> LedgerResult<()> {
    conn.execute(
        "UPDATE trades SET state = ?2, realized_pnl = ?3, updated_at = ?4, closed_at = ?5, data = ?6
         WHERE id = ?1",
        params![
            record.id,
            record.state.as_str(),
            record.realized_pnl,
            record.updated_at.to_rfc3339(),
            record.closed_at.map(|t| t.to_rfc3339()),
            serde_json::to_string(record)?,
        ],
    )?;
    Ok(())
}

fn insert_event(
    conn: &Connection,
    trade_id: &str,
    from: Option<TradeState>,
    to: TradeState,
    payload: &serde_json::Value,
    at: DateTime<Utc>,
) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO events (trade_id, from_state, to_state, payload, at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            trade_id,
            from.map(|s| s.as_str()),
            to.as_str(),
            payload.to_string(),
            at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn parse_time(s: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::InvalidTrade(format!("bad timestamp '{}': {}", s, e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Open `trade_ledger.db` (with a JSON mirror) under `state_dir`
pub fn create_ledger<P: AsRef<Path>>(state_dir: P) -> LedgerResult<SqliteLedger> {
    let state_dir = state_dir.as_ref();
    std::fs::create_dir_all(state_dir)?;
    SqliteLedger::open(
        state_dir.join("trade_ledger.db"),
        Some(state_dir.join("trade_ledger.json")),
    )
}
