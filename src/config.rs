//! Configuration management
//!
//! Loads the JSON config file and fills credentials from the environment
//! (`.env` is read first). Secrets are never read from the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{CoinbaseAuth, CoinbaseJwtSigner, HmacSigner, OandaToken};
use crate::common::ClientConfig;
use crate::oco::MonitorConfig;
use crate::risk::{GuardConfig, RiskConfig};
use crate::signals::ScannerConfig;
use crate::types::{Symbol, Venue};
use crate::venues::oanda::{LIVE_URL, PRACTICE_URL};

pub const DEFAULT_CONFIG_PATH: &str = "configs/live.json";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oanda: OandaConfig,
    pub coinbase: CoinbaseConfig,
    pub instruments: Vec<InstrumentConfig>,
    pub risk: RiskConfig,
    pub guards: GuardConfig,
    pub scanner: ScannerConfig,
    pub monitor: MonitorConfig,
    pub engine: EngineConfig,
    pub paper: PaperConfig,
    pub transport: TransportConfig,
    /// Ledger database, JSON backup and logs of past runs
    pub state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            oanda: OandaConfig::default(),
            coinbase: CoinbaseConfig::default(),
            instruments: Vec::new(),
            risk: RiskConfig::default(),
            guards: GuardConfig::default(),
            scanner: ScannerConfig::default(),
            monitor: MonitorConfig::default(),
            engine: EngineConfig::default(),
            paper: PaperConfig::default(),
            transport: TransportConfig::default(),
            state_dir: PathBuf::from("state"),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.load_env();
        Ok(config)
    }

    /// Fill credentials from the environment
    pub fn load_env(&mut self) {
        dotenv::dotenv().ok();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(token) = var("OANDA_API_TOKEN") {
            self.oanda.api_token = Some(token);
        }
        if let Some(account) = var("OANDA_ACCOUNT_ID") {
            self.oanda.account_id = Some(account);
        }
        if let Some(name) = var("COINBASE_API_KEY_NAME") {
            self.coinbase.key_name = Some(name);
        }
        if let Some(key) = var("COINBASE_PRIVATE_KEY") {
            // .env files usually hold the PEM on one line
            self.coinbase.private_key = Some(key.replace("\\n", "\n"));
        }
        if let Some(key) = var("COINBASE_API_KEY") {
            self.coinbase.api_key = Some(key);
        }
        if let Some(secret) = var("COINBASE_API_SECRET") {
            self.coinbase.api_secret = Some(secret);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.instruments.is_empty() {
            bail!("No instruments configured");
        }
        for inst in &self.instruments {
            if inst.symbol.trim().is_empty() {
                bail!("Instrument with empty symbol");
            }
            if inst.venue == Venue::Paper {
                bail!("Instrument {}: venue must be oanda or coinbase (paper is a run mode)", inst.symbol);
            }
        }
        let r = &self.risk;
        if !(r.risk_per_trade > 0.0 && r.risk_per_trade <= 1.0) {
            bail!("risk.risk_per_trade must be in (0, 1], got {}", r.risk_per_trade);
        }
        if !(r.max_position_pct > 0.0 && r.max_position_pct <= 1.0) {
            bail!("risk.max_position_pct must be in (0, 1], got {}", r.max_position_pct);
        }
        if r.initial_capital <= 0.0 {
            bail!("risk.initial_capital must be positive");
        }
        if r.max_capital.is_some_and(|m| m <= 0.0) {
            bail!("risk.max_capital must be positive when set");
        }
        if r.min_risk_reward <= 0.0 {
            bail!("risk.min_risk_reward must be positive");
        }
        if r.max_open_trades == 0 {
            bail!("risk.max_open_trades must be at least 1");
        }
        if self.guards.bailout_window == 0 || !(0.0..=1.0).contains(&self.guards.bailout_win_rate) {
            bail!("guards: bailout window must be positive and win rate in [0, 1]");
        }
        if self.engine.scan_interval_secs == 0 || self.monitor.interval_secs == 0 {
            bail!("scan and monitor intervals must be positive");
        }
        let t = &self.monitor.trailing;
        if t.activation < 0.0 || !(t.lock > 0.0 && t.lock < 1.0) || t.min_step < 0.0 {
            bail!("monitor.trailing: activation and min_step must be >= 0, lock in (0, 1)");
        }
        if self.scanner.enabled.is_empty() {
            bail!("scanner.enabled is empty");
        }
        self.scanner.build().context("Invalid scanner configuration")?;
        Ok(())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.instruments.iter().map(InstrumentConfig::symbol).collect()
    }

    pub fn venues(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self.instruments.iter().map(|i| i.venue).collect();
        venues.sort();
        venues.dedup();
        venues
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("trade_ledger.db")
    }

    pub fn oanda_token(&self) -> Result<OandaToken> {
        let raw = self
            .oanda
            .api_token
            .as_deref()
            .context("OANDA_API_TOKEN not found in environment")?;
        Ok(OandaToken::new(raw)?)
    }

    pub fn oanda_account(&self) -> Result<&str> {
        self.oanda
            .account_id
            .as_deref()
            .context("OANDA_ACCOUNT_ID not found in environment")
    }

    /// JWT credentials win over legacy HMAC ones
    pub fn coinbase_auth(&self) -> Result<CoinbaseAuth> {
        let c = &self.coinbase;
        if let (Some(name), Some(key)) = (&c.key_name, &c.private_key) {
            let signer = CoinbaseJwtSigner::new(name.clone(), key).context("Invalid COINBASE_PRIVATE_KEY")?;
            return Ok(CoinbaseAuth::Jwt(signer));
        }
        if let (Some(key), Some(secret)) = (&c.api_key, &c.api_secret) {
            return Ok(CoinbaseAuth::Hmac(HmacSigner::new(key.clone(), secret.clone())));
        }
        bail!("Coinbase credentials missing: set COINBASE_API_KEY_NAME and COINBASE_PRIVATE_KEY")
    }

    /// Short fingerprint of the trading parameters, stored in checkpoints
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let params = serde_json::json!({
            "instruments": self.instruments,
            "risk": self.risk,
            "guards": self.guards,
            "scanner": self.scanner,
        });
        let digest = Sha256::digest(params.to_string().as_bytes());
        hex::encode(&digest[..8])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OandaConfig {
    /// fxTrade practice environment
    pub practice: bool,
    /// Overrides the practice/live URL
    pub base_url: Option<String>,
    pub granularity: String,
    #[serde(skip)]
    pub api_token: Option<String>,
    #[serde(skip)]
    pub account_id: Option<String>,
}

impl Default for OandaConfig {
    fn default() -> Self {
        Self {
            practice: true,
            base_url: None,
            granularity: "M15".to_string(),
            api_token: None,
            account_id: None,
        }
    }
}

impl OandaConfig {
    pub fn url(&self) -> &str {
        match &self.base_url {
            Some(url) => url,
            None if self.practice => PRACTICE_URL,
            None => LIVE_URL,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinbaseConfig {
    pub base_url: Option<String>,
    #[serde(skip)]
    pub key_name: Option<String>,
    #[serde(skip)]
    pub private_key: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub api_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub venue: Venue,
}

impl InstrumentConfig {
    pub fn symbol(&self) -> Symbol {
        Symbol::new(&self.symbol)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scan_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { scan_interval_secs: 300 }
    }
}

impl EngineConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }
}

/// Simulated execution used by `live --paper`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub initial_balance: f64,
    /// Full spread as a fraction of the mark, for symbols without a live feed
    pub spread: f64,
    /// Fee per side as a fraction of notional
    pub fee_rate: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: 3000.0,
            spread: 0.0002,
            fee_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub rate_limit: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            rate_limit: 10,
        }
    }
}

impl TransportConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_retries(self.max_retries)
            .with_rate_limit(self.rate_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        serde_json::from_str(
            r#"{
                "oanda": { "practice": true, "granularity": "M15" },
                "instruments": [
                    { "symbol": "EUR_USD", "venue": "oanda" },
                    { "symbol": "BTC-USD", "venue": "coinbase" }
                ],
                "risk": { "initial_capital": 5000, "risk_per_trade": 0.02 },
                "scanner": { "enabled": ["fvg"] },
                "state_dir": "state"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.risk.initial_capital, 5000.0);
        assert_eq!(config.risk.min_risk_reward, 1.5);
        assert_eq!(config.guards.cooldown_hours, 12);
        assert_eq!(config.monitor.interval_secs, 30);
        assert!(config.monitor.trailing.enabled);
        assert_eq!(config.venues(), vec![Venue::Oanda, Venue::Coinbase]);
        assert_eq!(config.oanda.url(), PRACTICE_URL);
        assert_eq!(config.ledger_path(), PathBuf::from("state/trade_ledger.db"));
    }

    #[test]
    fn test_validation() {
        let mut config = sample();
        config.risk.risk_per_trade = 1.5;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.instruments.clear();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.scanner.enabled = vec!["martingale".into()];
        assert!(config.validate().is_err());

        let mut config = sample();
        config.monitor.trailing.lock = 1.0;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.instruments[0].venue = Venue::Paper;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = sample();
        config.oanda.api_token = Some("secret-token".into());
        config.coinbase.private_key = Some("secret-key".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_fingerprint_tracks_trading_params() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.risk.risk_per_trade = 0.01;
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }
}
