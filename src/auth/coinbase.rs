//! Coinbase Advanced Trade JWT signing (CDP API keys, Ed25519)
//!
//! Every request carries `Authorization: Bearer <jwt>` where the token is
//! minted for exactly that request: the `uri` claim binds method, host and
//! path, and the token lives for two minutes.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::Serialize;
use thiserror::Error;

pub const COINBASE_API_HOST: &str = "api.coinbase.com";

/// Token lifetime in seconds
pub const JWT_TTL_SECS: i64 = 120;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("private key is empty")]
    Empty,

    #[error("invalid PEM private key: {0}")]
    Pem(String),

    #[error("invalid base64 private key: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("expected a 32-byte seed or 64-byte keypair, got {0} bytes")]
    Length(usize),

    #[error("keypair bytes are inconsistent: {0}")]
    Keypair(String),
}

#[derive(Serialize)]
struct Header<'a> {
    alg: &'static str,
    typ: &'static str,
    kid: &'a str,
    nonce: &'a str,
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    iss: &'static str,
    nbf: i64,
    exp: i64,
    uri: String,
}

/// Parse an Ed25519 key as PKCS#8 PEM, or base64 of a 32-byte seed or
/// 64-byte `seed || public` pair (the format the CDP portal exports)
pub fn parse_signing_key(raw: &str) -> Result<SigningKey, KeyError> {
    // .env files often carry PEMs with literal "\n"
    let raw = raw.trim().replace("\\n", "\n");
    if raw.is_empty() {
        return Err(KeyError::Empty);
    }

    if raw.starts_with("-----BEGIN") {
        return SigningKey::from_pkcs8_pem(&raw).map_err(|e| KeyError::Pem(e.to_string()));
    }

    let bytes = STANDARD.decode(raw.as_bytes())?;
    match bytes.len() {
        32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            Ok(SigningKey::from_bytes(&seed))
        }
        64 => {
            let mut pair = [0u8; 64];
            pair.copy_from_slice(&bytes);
            SigningKey::from_keypair_bytes(&pair).map_err(|e| KeyError::Keypair(e.to_string()))
        }
        n => Err(KeyError::Length(n)),
    }
}

/// `uri` claim for a request: query strings are not part of it
pub fn format_uri(method: &str, path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    format!("{} {}{}", method.to_ascii_uppercase(), COINBASE_API_HOST, path)
}

/// Mints per-request bearer tokens for a CDP API key
#[derive(Clone)]
pub struct CoinbaseJwtSigner {
    key_name: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for CoinbaseJwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinbaseJwtSigner")
            .field("key_name", &self.key_name)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

impl CoinbaseJwtSigner {
    pub fn new(key_name: impl Into<String>, private_key: &str) -> Result<Self, KeyError> {
        Ok(Self {
            key_name: key_name.into(),
            signing_key: parse_signing_key(private_key)?,
        })
    }

    pub fn from_signing_key(key_name: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            key_name: key_name.into(),
            signing_key,
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Token for `method path`, valid from now for [`JWT_TTL_SECS`]
    pub fn token(&self, method: &str, path: &str) -> String {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.token_at(method, path, chrono::Utc::now().timestamp(), &nonce)
    }

    /// Deterministic variant of [`Self::token`] for a fixed clock and nonce
    pub fn token_at(&self, method: &str, path: &str, now: i64, nonce: &str) -> String {
        let header = Header {
            alg: "EdDSA",
            typ: "JWT",
            kid: &self.key_name,
            nonce,
        };
        let claims = Claims {
            sub: &self.key_name,
            iss: "cdp",
            nbf: now,
            exp: now + JWT_TTL_SECS,
            uri: format_uri(method, path),
        };

        // Serializing these structs cannot fail: only strings and integers
        let header = serde_json::to_vec(&header).unwrap_or_default();
        let claims = serde_json::to_vec(&claims).unwrap_or_default();
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let signature = self.signing_key.sign(signing_input.as_bytes());
        format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        )
    }
}
