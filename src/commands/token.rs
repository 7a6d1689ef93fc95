//! Print a Coinbase JWT for one request, for debugging with curl

use anyhow::{Context, Result};

use bracket_trader::auth::CoinbaseJwtSigner;
use bracket_trader::Config;

pub fn run(config_path: String, method: String, path: String) -> Result<()> {
    let mut config = Config::from_file(&config_path).unwrap_or_default();
    config.load_env();

    let name = config
        .coinbase
        .key_name
        .context("COINBASE_API_KEY_NAME not found in environment")?;
    let key = config
        .coinbase
        .private_key
        .context("COINBASE_PRIVATE_KEY not found in environment")?;
    let signer = CoinbaseJwtSigner::new(name, &key).context("Invalid COINBASE_PRIVATE_KEY")?;

    println!("{}", signer.token(&method, &path));
    Ok(())
}
