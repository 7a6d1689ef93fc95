//! Legacy Coinbase API key signing (HMAC-SHA256)
//!
//! Older Coinbase keys sign `timestamp + METHOD + path + body` with the API
//! secret and send the hex digest in `CB-ACCESS-SIGN`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `message` under `secret`
pub fn sign(message: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_signature(message: &str, secret: &str, signature: &str) -> bool {
    constant_time_eq(sign(message, secret).as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Headers for one signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub access_key: String,
    pub signature: String,
    pub timestamp: String,
}

#[derive(Clone)]
pub struct HmacSigner {
    api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl HmacSigner {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn sign_request(&self, method: &str, path: &str, body: &str) -> SignedHeaders {
        self.sign_request_at(method, path, body, chrono::Utc::now().timestamp())
    }

    pub fn sign_request_at(
        &self,
        method: &str,
        path: &str,
        body: &str,
        timestamp: i64,
    ) -> SignedHeaders {
        let timestamp = timestamp.to_string();
        let message = format!(
            "{}{}{}{}",
            timestamp,
            method.to_ascii_uppercase(),
            path,
            body
        );
        SignedHeaders {
            access_key: self.api_key.clone(),
            signature: sign(&message, &self.api_secret),
            timestamp,
        }
    }
}
