//! Configuration Module - TOML-based Workflow Configuration
//!
//! Loads and validates configuration from `config.toml`.
//! Mints, oracle sources, the order-book program and market addresses
//! are all externalized here; nothing is hardcoded in the domain layer.
//! Keypairs are never in the file, only the names of the environment
//! variables that point at them.

pub mod loader;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::{LedgerIdentity, MarketIndex, TokenIndex};
use crate::usecases::bootstrap::{AccountPlan, AssetPlan, BootstrapPlan, MarketPlan, OracleSource};

/// Top-level workflow configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Run identity and mode.
  pub workflow: WorkflowConfig,
  /// Ledger endpoint and program.
  pub ledger: LedgerConfig,
  /// Where the signing keypairs come from.
  #[serde(default)]
  pub signers: SignersConfig,
  /// Assets to register, one bank each.
  pub assets: Vec<AssetConfig>,
  /// Spot market to register.
  pub market: MarketConfig,
  /// User margin account.
  #[serde(default)]
  pub account: AccountConfig,
  /// Post-bootstrap margin operations.
  pub operations: OperationsConfig,
  /// Metrics export.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Report persistence.
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

impl AppConfig {
  /// The provisioning plan described by this configuration.
  pub fn bootstrap_plan(&self) -> BootstrapPlan {
    BootstrapPlan {
      group_num: self.workflow.group_num,
      assets: self
        .assets
        .iter()
        .map(|a| AssetPlan {
          symbol: a.symbol.clone(),
          mint: a.mint,
          decimals: a.decimals,
          oracle: a.oracle.clone(),
          token_index: a.token_index,
        })
        .collect(),
      market: MarketPlan {
        base: self.market.base.clone(),
        quote: self.market.quote.clone(),
        program: self.market.program,
        external_market: self.market.external_market,
        market_index: self.market.market_index,
      },
      account: AccountPlan {
        account_num: self.account.account_num,
        name: self.account.name.clone(),
      },
    }
  }

  /// Configured asset by symbol.
  pub fn asset(&self, symbol: &str) -> Option<&AssetConfig> {
    self.assets.iter().find(|a| a.symbol == symbol)
  }

  /// Directory for the report and journal; dry runs use a `dry_run`
  /// subdirectory so they never replace a live run's report.
  pub fn report_dir(&self) -> PathBuf {
    let dir = Path::new(&self.persistence.data_dir);
    if self.workflow.dry_run {
      dir.join("dry_run")
    } else {
      dir.to_path_buf()
    }
  }
}

/// Run identity and mode.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
  /// Human-readable run name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides.
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Run against the in-memory ledger instead of the RPC endpoint.
  #[serde(default)]
  pub dry_run: bool,
  /// Group number under the admin.
  #[serde(default)]
  pub group_num: u32,
  /// Creation attempts per provisioning step.
  #[serde(default = "default_create_attempts")]
  pub max_create_attempts: u32,
}

/// Ledger endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
  /// JSON-RPC endpoint.
  pub rpc_url: String,
  /// Margin program address.
  pub program_id: LedgerIdentity,
  /// Request timeout in seconds (submissions wait for confirmation).
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
  /// Retries for transient read failures.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Base retry delay (milliseconds), doubled on every attempt.
  #[serde(default = "default_retry_delay")]
  pub retry_base_delay_ms: u64,
  /// Request rate ceiling.
  #[serde(default = "default_requests_per_second")]
  pub requests_per_second: u32,
}

/// Environment variables holding keypair file paths.
#[derive(Debug, Clone, Deserialize)]
pub struct SignersConfig {
  #[serde(default = "default_admin_env")]
  pub admin_env: String,
  #[serde(default = "default_payer_env")]
  pub payer_env: String,
  #[serde(default = "default_user_env")]
  pub user_env: String,
}

impl Default for SignersConfig {
  fn default() -> Self {
    Self {
      admin_env: default_admin_env(),
      payer_env: default_payer_env(),
      user_env: default_user_env(),
    }
  }
}

/// One asset to register.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
  /// Symbol used to reference the asset elsewhere in the file.
  pub symbol: String,
  /// Token mint.
  pub mint: LedgerIdentity,
  /// Mint decimals.
  pub decimals: u8,
  /// Stub oracle with a price, or an external oracle address.
  pub oracle: OracleSource,
  /// Pinned token index; the next free one when absent.
  pub token_index: Option<TokenIndex>,
}

/// Spot market configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
  /// Base asset symbol.
  pub base: String,
  /// Quote asset symbol.
  pub quote: String,
  /// External order-book program.
  pub program: LedgerIdentity,
  /// Market address inside the order-book program.
  pub external_market: LedgerIdentity,
  #[serde(default)]
  pub market_index: MarketIndex,
}

/// User margin account configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
  #[serde(default)]
  pub account_num: u32,
  #[serde(default = "default_account_name")]
  pub name: String,
}

impl Default for AccountConfig {
  fn default() -> Self {
    Self {
      account_num: 0,
      name: default_account_name(),
    }
  }
}

/// Margin operations run after the bootstrap.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationsConfig {
  /// Asset symbol to deposit and withdraw.
  pub asset: String,
  /// Native amount to deposit.
  pub deposit_amount: u64,
  /// Native amount to withdraw afterwards (0 skips the withdraw).
  #[serde(default)]
  pub withdraw_amount: u64,
  /// Allow the withdraw to borrow beyond the deposit.
  #[serde(default)]
  pub allow_borrow: bool,
  /// Tokens airdropped to the user's token account in dry runs.
  #[serde(default = "default_faucet_amount")]
  pub dry_run_faucet_amount: u64,
}

/// Metrics export configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable the textfile export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Textfile written at the end of a run.
  #[serde(default = "default_textfile_path")]
  pub textfile_path: String,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      textfile_path: default_textfile_path(),
    }
  }
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for the bootstrap report and operation journal.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_create_attempts() -> u32 {
  3
}

fn default_timeout() -> u64 {
  60
}

fn default_max_retries() -> u32 {
  3
}

fn default_retry_delay() -> u64 {
  200
}

fn default_requests_per_second() -> u32 {
  20
}

fn default_admin_env() -> String {
  "ADMIN_KEYPAIR".to_string()
}

fn default_payer_env() -> String {
  "PAYER_KEYPAIR".to_string()
}

fn default_user_env() -> String {
  "USER_KEYPAIR".to_string()
}

fn default_account_name() -> String {
  "main".to_string()
}

fn default_faucet_amount() -> u64 {
  1_000_000_000
}

fn default_textfile_path() -> String {
  "metrics/margin_bootstrap.prom".to_string()
}

fn default_data_dir() -> String {
  "data".to_string()
}
