//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;
use crate::usecases::bootstrap::OracleSource;

/// Upper bound on RPC retries; the backoff doubles per attempt.
const MAX_RPC_RETRIES: u32 = 16;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    name = %config.workflow.name,
    assets = config.assets.len(),
    dry_run = config.workflow.dry_run,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Unique asset symbols and pinned token indexes
/// - Positive stub oracle prices
/// - Market and operation assets that reference configured assets
/// - Sensible ledger client limits
fn validate_config(config: &AppConfig) -> Result<()> {
  // Asset validation
  anyhow::ensure!(
    !config.assets.is_empty(),
    "At least one asset must be configured"
  );

  let mut symbols = HashSet::new();
  let mut token_indexes = HashSet::new();
  for asset in &config.assets {
    anyhow::ensure!(!asset.symbol.is_empty(), "Asset symbol must not be empty");
    anyhow::ensure!(
      symbols.insert(asset.symbol.as_str()),
      "Asset {} is configured twice",
      asset.symbol
    );
    anyhow::ensure!(
      asset.decimals <= 18,
      "Asset {} decimals must be at most 18, got {}",
      asset.symbol,
      asset.decimals
    );
    if let Some(index) = asset.token_index {
      anyhow::ensure!(
        token_indexes.insert(index),
        "Token index {} is pinned by more than one asset",
        index
      );
    }
    if let OracleSource::Stub { price } = &asset.oracle {
      anyhow::ensure!(
        price.is_sign_positive() && !price.is_zero(),
        "Asset {} stub oracle price must be positive, got {}",
        asset.symbol,
        price
      );
    }
  }

  // Market validation
  for symbol in [&config.market.base, &config.market.quote] {
    anyhow::ensure!(
      symbols.contains(symbol.as_str()),
      "Market asset {} is not configured",
      symbol
    );
  }
  anyhow::ensure!(
    config.market.base != config.market.quote,
    "Market base and quote must differ"
  );

  // Operations validation
  anyhow::ensure!(
    symbols.contains(config.operations.asset.as_str()),
    "Operations asset {} is not configured",
    config.operations.asset
  );
  anyhow::ensure!(
    config.operations.deposit_amount > 0,
    "deposit_amount must be positive"
  );

  // Ledger validation
  anyhow::ensure!(
    config.workflow.dry_run || !config.ledger.rpc_url.is_empty(),
    "Ledger RPC URL must not be empty"
  );
  anyhow::ensure!(
    config.ledger.requests_per_second > 0,
    "requests_per_second must be positive"
  );
  anyhow::ensure!(
    config.ledger.timeout_seconds > 0,
    "timeout_seconds must be positive"
  );
  anyhow::ensure!(
    config.ledger.max_retries <= MAX_RPC_RETRIES,
    "max_retries must be at most {MAX_RPC_RETRIES}, got {}",
    config.ledger.max_retries
  );
  anyhow::ensure!(
    config.workflow.max_create_attempts > 0,
    "max_create_attempts must be positive"
  );

  // Signer validation
  for name in [
    &config.signers.admin_env,
    &config.signers.payer_env,
    &config.signers.user_env,
  ] {
    anyhow::ensure!(!name.is_empty(), "Signer environment variable names must not be empty");
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const VALID: &str = r#"
[workflow]
name = "devnet-bootstrap"
dry_run = true

[ledger]
rpc_url = "http://127.0.0.1:8899"
program_id = "4vJ9JU1bJJE96FWSJKvHsmmFADCg4gpZQff4P3bkLKi"

[[assets]]
symbol = "USDC"
mint = "8FRFC6MoGGkMFQwngccyu69VnYbzykGeez7ignHVAFSN"
decimals = 6
oracle = { source = "stub", price = "1" }

[[assets]]
symbol = "BTC"
mint = "3UNBZ6o52WTWwjac2kPUb4FyodhU1vFkRJheu1Sh2TvU"
decimals = 6
oracle = { source = "external", address = "GVXRSBjFk6e6J3NbVPXohDJetcTjaeeuykUpbQF8UoMU" }

[market]
base = "BTC"
quote = "USDC"
program = "DESVgJVGajEgKGXhb6XmqDHGz3VjdgP7rEVESBgxmroY"
external_market = "9wFFyRfZBsuAha4YcuxcXLKwMxJR43S7fPfQLusDBzvT"

[operations]
asset = "USDC"
deposit_amount = 1000
withdraw_amount = 500
"#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_valid_config_builds_plan() {
    let config = parse_config(VALID).unwrap();
    let plan = config.bootstrap_plan();
    assert_eq!(plan.assets.len(), 2);
    assert_eq!(plan.market.label(), "BTC/USDC");
    assert!(matches!(plan.assets[1].oracle, OracleSource::External { .. }));
    assert_eq!(config.signers.user_env, "USER_KEYPAIR");
    assert_eq!(config.account.name, "main");
  }

  #[test]
  fn test_market_must_reference_configured_assets() {
    let bad = VALID.replace(r#"base = "BTC""#, r#"base = "ETH""#);
    let err = parse_config(&bad).unwrap_err();
    assert!(err.to_string().contains("ETH"));
  }

  #[test]
  fn test_stub_price_must_be_positive() {
    let bad = VALID.replace(r#"price = "1""#, r#"price = "0""#);
    assert!(parse_config(&bad).is_err());
  }

  #[test]
  fn test_zero_deposit_rejected() {
    let bad = VALID.replace("deposit_amount = 1000", "deposit_amount = 0");
    assert!(parse_config(&bad).is_err());
  }

  #[test]
  fn test_excessive_rpc_retries_rejected() {
    let bad = VALID.replace("[ledger]\n", "[ledger]\nmax_retries = 40\n");
    let err = parse_config(&bad).unwrap_err();
    assert!(err.to_string().contains("max_retries"));

    let ok = VALID.replace("[ledger]\n", "[ledger]\nmax_retries = 16\n");
    assert_eq!(parse_config(&ok).unwrap().ledger.max_retries, 16);
  }

  #[test]
  fn test_dry_run_reports_stay_out_of_live_data_dir() {
    let dry = parse_config(VALID).unwrap();
    assert_eq!(dry.report_dir(), Path::new("data").join("dry_run"));

    let live = parse_config(&VALID.replace("dry_run = true", "dry_run = false")).unwrap();
    assert_eq!(live.report_dir(), Path::new("data"));
  }

  #[test]
  fn test_duplicate_symbol_rejected() {
    let bad = VALID.replace(r#"symbol = "BTC""#, r#"symbol = "USDC""#);
    let err = parse_config(&bad).unwrap_err();
    assert!(err.to_string().contains("twice"));
  }
}
