//! Venue credentials
//!
//! Secrets are only ever read from the environment (or `.env`), and every
//! credential type redacts itself in `Debug` output.

pub mod coinbase;
pub mod hmac;
pub mod oanda;

pub use self::coinbase::{CoinbaseJwtSigner, KeyError};
pub use self::hmac::HmacSigner;
pub use self::oanda::{OandaToken, TokenError};

/// How Coinbase requests are authenticated
#[derive(Debug, Clone)]
pub enum CoinbaseAuth {
    /// CDP API key: per-request Ed25519 JWT bearer token
    Jwt(CoinbaseJwtSigner),
    /// Legacy API key/secret: `CB-ACCESS-*` HMAC headers
    Hmac(HmacSigner),
}
