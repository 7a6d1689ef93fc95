//! OANDA v3 REST (forex)

pub mod client;
pub mod types;

pub use client::{OandaClient, LIVE_URL, PRACTICE_URL};
