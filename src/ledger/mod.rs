//! Single source of truth for every trade the system has placed
//!
//! Nothing else holds position state: the executor, the monitor and the
//! guards all read and write through [`SqliteLedger`].

pub mod store;
pub mod types;

pub use store::{create_ledger, SqliteLedger};
pub use types::{
    Checkpoint, CloseUpdate, DailyStats, ExitReason, FillUpdate, GuardReset, GuardResetEntry,
    LedgerError, LedgerResult, NewTrade, ProtectionIds, TradeEvent, TradeRecord, TradeState,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, Symbol, Venue};
    use chrono::Utc;

    fn eur_usd_long() -> NewTrade {
        NewTrade {
            venue: Venue::Oanda,
            symbol: Symbol::new("EUR_USD"),
            side: Side::Buy,
            size: 10_000.0,
            entry_price: 1.1000,
            stop_loss: 1.0950,
            take_profit: 1.1150,
            strategy: "fvg".into(),
            confidence: 0.9,
        }
    }

    fn fill(price: f64) -> FillUpdate {
        FillUpdate {
            fill_price: price,
            filled_size: 10_000.0,
            venue_order_id: Some("101".into()),
            venue_trade_id: Some("102".into()),
            fees: 0.0,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn test_full_lifecycle_writes_events() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let rec = ledger.open_pending(eur_usd_long()).unwrap();
        assert_eq!(rec.state, TradeState::Pending);

        ledger.mark_filled(&rec.id, fill(1.1002)).unwrap();
        ledger
            .mark_protected(&rec.id, ProtectionIds::legs("103", "104"))
            .unwrap();
        let closed = ledger
            .mark_closed(
                &rec.id,
                CloseUpdate {
                    exit_price: 1.1150,
                    realized_pnl: 14.8,
                    fees: 0.0,
                    reason: ExitReason::TakeProfit,
                },
            )
            .unwrap();

        assert_eq!(closed.state, TradeState::Closed);
        assert_eq!(closed.fill_price, Some(1.1002));
        assert_eq!(closed.venue_trade_id.as_deref(), Some("102"));
        assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
        assert!(closed.closed_at.is_some());

        let events = ledger.events_for(&rec.id).unwrap();
        let path: Vec<_> = events.iter().map(|e| e.to_state).collect();
        assert_eq!(
            path,
            vec![
                TradeState::Pending,
                TradeState::Filled,
                TradeState::Protected,
                TradeState::Closed
            ]
        );
        assert_eq!(events[0].from_state, None);
        assert_eq!(events[3].from_state, Some(TradeState::Protected));
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn test_invalid_transitions_rejected_and_not_logged() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let rec = ledger.open_pending(eur_usd_long()).unwrap();

        let err = ledger
            .mark_protected(&rec.id, ProtectionIds::bracket("b"))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                from: TradeState::Pending,
                to: TradeState::Protected,
                ..
            }
        ));

        ledger.mark_failed(&rec.id, "FOK not filled").unwrap();
        assert!(ledger.mark_filled(&rec.id, fill(1.1)).is_err());
        assert_eq!(ledger.events_for(&rec.id).unwrap().len(), 2);
    }

    #[test]
    fn test_incomplete_protection_rejected() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let rec = ledger.open_pending(eur_usd_long()).unwrap();
        ledger.mark_filled(&rec.id, fill(1.1)).unwrap();

        let half = ProtectionIds {
            stop_loss_id: Some("sl".into()),
            ..Default::default()
        };
        assert!(ledger.mark_protected(&rec.id, half).is_err());
        assert_eq!(ledger.get(&rec.id).unwrap().unwrap().state, TradeState::Filled);
    }

    #[test]
    fn test_protection_lost_returns_to_filled() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let rec = ledger.open_pending(eur_usd_long()).unwrap();
        ledger.mark_filled(&rec.id, fill(1.1)).unwrap();
        ledger
            .mark_protected(&rec.id, ProtectionIds::legs("sl", "tp"))
            .unwrap();

        let naked = ledger.mark_unprotected(&rec.id, "stop loss cancelled").unwrap();
        assert_eq!(naked.state, TradeState::Filled);
        assert!(!naked.protection.is_complete());
        assert_eq!(naked.error.as_deref(), Some("stop loss cancelled"));
    }

    #[test]
    fn test_stop_only_tightens_while_protected() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let rec = ledger.open_pending(eur_usd_long()).unwrap();
        ledger.mark_filled(&rec.id, fill(1.1)).unwrap();
        assert!(ledger.move_stop(&rec.id, 1.0990, ProtectionIds::legs("sl", "tp")).is_err());

        ledger
            .mark_protected(&rec.id, ProtectionIds::legs("sl", "tp"))
            .unwrap();
        let moved = ledger
            .move_stop(&rec.id, 1.1040, ProtectionIds::legs("sl2", "tp"))
            .unwrap();
        assert_eq!(moved.state, TradeState::Protected);
        assert_eq!(moved.stop_loss, 1.1040);
        assert_eq!(moved.protection, ProtectionIds::legs("sl2", "tp"));

        // looser, or past the target
        assert!(ledger.move_stop(&rec.id, 1.1000, ProtectionIds::legs("sl3", "tp")).is_err());
        assert!(ledger.move_stop(&rec.id, 1.1200, ProtectionIds::legs("sl3", "tp")).is_err());

        let stored = ledger.get(&rec.id).unwrap().unwrap();
        assert_eq!(stored.stop_loss, 1.1040);
        let events = ledger.events_for(&rec.id).unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.from_state, Some(TradeState::Protected));
        assert_eq!(last.to_state, TradeState::Protected);
    }

    #[test]
    fn test_unknown_trade() {
        let ledger = SqliteLedger::in_memory().unwrap();
        assert!(matches!(
            ledger.mark_failed("nope", "x"),
            Err(LedgerError::NotFound(_))
        ));
        assert!(ledger.get("nope").unwrap().is_none());
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    #[test]
    fn test_one_active_trade_per_venue_symbol() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let first = ledger.open_pending(eur_usd_long()).unwrap();

        let dup = ledger.open_pending(eur_usd_long()).unwrap_err();
        assert!(matches!(dup, LedgerError::DuplicateActive { venue: Venue::Oanda, .. }));

        // same symbol on another venue is a different position
        let mut paper = eur_usd_long();
        paper.venue = Venue::Paper;
        assert!(ledger.open_pending(paper).is_ok());

        // once the first one ends the pair is free again
        ledger.mark_failed(&first.id, "rejected").unwrap();
        assert!(ledger.open_pending(eur_usd_long()).is_ok());
    }

    #[test]
    fn test_invalid_trade_never_recorded() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let mut bad = eur_usd_long();
        bad.take_profit = bad.stop_loss;
        assert!(matches!(
            ledger.open_pending(bad),
            Err(LedgerError::InvalidTrade(_))
        ));
        assert!(ledger.all_trades().unwrap().is_empty());
    }

    // =========================================================================
    // Queries and persistence
    // =========================================================================

    #[test]
    fn test_pnl_and_daily_stats() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let symbols = ["EUR_USD", "GBP_USD", "USD_JPY", "AUD_USD"];
        // the last one closes at breakeven
        let pnls = [25.0, -10.0, 5.0, 0.0];

        for (sym, pnl) in symbols.iter().zip(pnls) {
            let mut t = eur_usd_long();
            t.symbol = Symbol::new(sym);
            if *sym == "USD_JPY" {
                t.entry_price = 150.0;
                t.stop_loss = 149.0;
                t.take_profit = 153.0;
            }
            let rec = ledger.open_pending(t).unwrap();
            ledger.mark_filled(&rec.id, fill(rec.entry_price)).unwrap();
            ledger
                .mark_closed(
                    &rec.id,
                    CloseUpdate {
                        exit_price: rec.entry_price,
                        realized_pnl: pnl,
                        fees: 0.5,
                        reason: ExitReason::Flattened,
                    },
                )
                .unwrap();
        }

        assert!((ledger.realized_pnl().unwrap() - 20.0).abs() < 1e-9);
        let stats = ledger.daily_stats(Utc::now().date_naive()).unwrap();
        assert_eq!(stats.trades, 4);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert!((stats.fees - 2.0).abs() < 1e-9);
        assert!(ledger.active_trades().unwrap().is_empty());
        assert_eq!(ledger.closed_trades().unwrap().len(), 4);
    }

    #[test]
    fn test_reopen_from_disk_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let ledger = create_ledger(dir.path()).unwrap();
            let rec = ledger.open_pending(eur_usd_long()).unwrap();
            ledger.mark_filled(&rec.id, fill(1.1001)).unwrap();
            ledger
                .save_checkpoint(&Checkpoint {
                    timestamp: Utc::now(),
                    cycle_count: 7,
                    capital: 3000.0,
                    active_trades: 1,
                    halted: false,
                    paper_mode: true,
                    config_hash: "abc".into(),
                })
                .unwrap();
            rec.id
        };

        let ledger = create_ledger(dir.path()).unwrap();
        let active = ledger.active_trades().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        assert_eq!(active[0].state, TradeState::Filled);
        assert_eq!(ledger.load_checkpoint().unwrap().unwrap().cycle_count, 7);

        let exported = std::fs::read_to_string(dir.path().join("trade_ledger.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(json["trades"].as_array().unwrap().len(), 1);
    }
}
