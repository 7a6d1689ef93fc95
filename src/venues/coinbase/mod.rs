//! Coinbase Advanced Trade REST v3 (spot crypto)

pub mod client;
pub mod types;

pub use client::{CoinbaseClient, API_BASE_URL};
