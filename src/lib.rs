//! Bracket Trader
//!
//! Automated trading of OANDA forex and Coinbase Advanced Trade crypto.
//! Signal scanners propose setups, guards and the position sizer decide
//! whether and how much to trade, and every entry is opened as an OCO
//! bracket (stop loss + take profit) recorded in a single SQLite ledger.

pub mod auth;
pub mod common;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod oco;
pub mod risk;
pub mod signals;
pub mod types;
pub mod venues;

pub use config::Config;
pub use error::{BrokerError, BrokerResult};
pub use types::*;
