//! Margin Bootstrap — Entry Point
//!
//! Provisions a margin group with its oracles, banks, user account,
//! spot market and open orders, then runs a deposit and withdraw
//! against the provisioned account. Safe to re-run: every step finds
//! what already exists before creating anything.
//!
//! Wiring sequence:
//! 1. Load config (first argument, BOOTSTRAP_CONFIG, or config.toml) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Load signers from keypair files named by env vars
//! 4. Open the ledger (in-memory with faucet for dry runs, JSON-RPC otherwise)
//! 5. Health-check the ledger
//! 6. Bootstrap group → oracles → banks → account → market → open orders
//! 7. Deposit, withdraw, log the read-back balances
//! 8. Save report + journal, export metrics

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use margin_bootstrap::adapters::keypair::{load_keypair_from_env, load_or_ephemeral};
use margin_bootstrap::adapters::ledger::auth::RpcAuth;
use margin_bootstrap::adapters::ledger::{RpcLedger, RpcLedgerConfig};
use margin_bootstrap::config::{self, AppConfig};
use margin_bootstrap::domain::identity::associated_token_address;
use margin_bootstrap::workflow::{dry_run_ledger, run_workflow, WorkflowSigners};

/// Environment variable naming the config file when no argument is given.
const CONFIG_ENV: &str = "BOOTSTRAP_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| "config.toml".to_string());
    let config = config::loader::load_config(&config_path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.workflow.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.workflow.name,
        version = env!("CARGO_PKG_VERSION"),
        dry_run = config.workflow.dry_run,
        program_id = %config.ledger.program_id,
        "Starting margin bootstrap"
    );

    // ── 3. Signers ──────────────────────────────────────────
    let signers = load_signers(&config).context("Failed to load signers")?;

    // ── 4. Ledger, then steps 5-8 ───────────────────────────
    let result = if config.workflow.dry_run {
        warn!("Dry-run mode — running against the in-memory ledger");
        let (ledger, token_account) = dry_run_ledger(&config, &signers)?;
        run_workflow(&config, Arc::new(ledger), &signers, token_account).await
    } else {
        let ledger = rpc_ledger(&config)?;
        let mint = config
            .asset(&config.operations.asset)
            .map(|a| a.mint)
            .context("Operations asset is not configured")?;
        let token_account = associated_token_address(&signers.user.identity(), &mint);
        run_workflow(&config, Arc::new(ledger), &signers, token_account).await
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Workflow failed");
    }
    result
}

fn load_signers(config: &AppConfig) -> Result<WorkflowSigners> {
    let load = |var: &str| {
        if config.workflow.dry_run {
            load_or_ephemeral(var)
        } else {
            load_keypair_from_env(var)
        }
    };
    Ok(WorkflowSigners {
        admin: load(config.signers.admin_env.as_str())?,
        payer: load(config.signers.payer_env.as_str())?,
        user: load(config.signers.user_env.as_str())?,
    })
}

fn rpc_ledger(config: &AppConfig) -> Result<RpcLedger> {
    let requests_per_second =
        NonZeroU32::new(config.ledger.requests_per_second).context("requests_per_second must be positive")?;
    let rpc_config = RpcLedgerConfig {
        rpc_url: config.ledger.rpc_url.clone(),
        program_id: config.ledger.program_id,
        timeout: Duration::from_secs(config.ledger.timeout_seconds),
        max_retries: config.ledger.max_retries,
        retry_base_delay: Duration::from_millis(config.ledger.retry_base_delay_ms),
        requests_per_second,
    };
    let auth = RpcAuth::from_env().context("Failed to load RPC credentials from env")?;
    RpcLedger::new(rpc_config, auth).context("Failed to create RPC ledger client")
}
