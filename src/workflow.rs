//! Workflow Run — Bootstrap, Margin Operations, Persistence
//!
//! One run provisions the plan, deposits and withdraws against the
//! provisioned account, saves the report and journal, and exports
//! metrics. The metrics textfile is written whether the run succeeds or
//! fails, so a failed run still leaves its counters behind.
//!
//! Dry runs keep their report and journal under `<data_dir>/dry_run`,
//! away from the live run's files.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::adapters::ledger::InMemoryLedger;
use crate::adapters::metrics::WorkflowMetrics;
use crate::adapters::persistence::FileRepository;
use crate::config::AppConfig;
use crate::domain::{Keypair, LedgerIdentity};
use crate::ports::ledger::LedgerClient;
use crate::ports::repository::{OperationKind, OperationRecord, ReportRepository};
use crate::usecases::{
    Bootstrap, BootstrapSigners, MarginExecutor, MarginOpResult, OracleSource, Provisioner,
};

/// Signing identities loaded for a run.
pub struct WorkflowSigners {
    pub admin: Keypair,
    pub payer: Keypair,
    pub user: Keypair,
}

/// In-memory ledger with external oracles registered and the user's
/// token account funded by the faucet.
pub fn dry_run_ledger(
    config: &AppConfig,
    signers: &WorkflowSigners,
) -> Result<(InMemoryLedger, LedgerIdentity)> {
    let ledger = InMemoryLedger::new(config.ledger.program_id);
    for asset in &config.assets {
        if let OracleSource::External { address } = asset.oracle {
            ledger.register_external_account(address);
        }
    }
    let mint = config
        .asset(&config.operations.asset)
        .map(|a| a.mint)
        .context("Operations asset is not configured")?;
    let token_account = ledger.airdrop_tokens(
        signers.user.identity(),
        mint,
        config.operations.dry_run_faucet_amount,
    );
    Ok((ledger, token_account))
}

/// Run the workflow and export metrics, on failure as well as success.
pub async fn run_workflow<L: LedgerClient>(
    config: &AppConfig,
    ledger: Arc<L>,
    signers: &WorkflowSigners,
    token_account: LedgerIdentity,
) -> Result<()> {
    let metrics = WorkflowMetrics::new().context("Failed to create metrics registry")?;
    let result = execute(config, ledger, signers, token_account, &metrics).await;
    metrics.record_run(result.is_ok());

    if config.metrics.enabled {
        let path = Path::new(&config.metrics.textfile_path);
        match (&result, metrics.write_textfile(path).await) {
            (Ok(()), Err(e)) => return Err(e),
            (Err(_), Err(e)) => error!(error = %format!("{e:#}"), "Metrics export failed"),
            (_, Ok(())) => {}
        }
    }
    result
}

async fn execute<L: LedgerClient>(
    config: &AppConfig,
    ledger: Arc<L>,
    signers: &WorkflowSigners,
    token_account: LedgerIdentity,
    metrics: &WorkflowMetrics,
) -> Result<()> {
    // ── Health check ────────────────────────────────────────
    anyhow::ensure!(ledger.is_healthy().await, "Ledger is not healthy");

    let data_dir = config.report_dir();
    let repository = FileRepository::from_data_dir(&data_dir)
        .await
        .context("Failed to open data directory")?;
    anyhow::ensure!(repository.is_healthy().await, "Data directory is not writable");
    if let Some(previous) = repository.load_latest_report().await? {
        info!(
            generated_at = %previous.generated_at,
            resources = previous.entries.len(),
            data_dir = %data_dir.display(),
            "Previous bootstrap report found, re-running against existing state"
        );
    }

    // ── Bootstrap ───────────────────────────────────────────
    let plan = config.bootstrap_plan();
    let bootstrap = Bootstrap::with_provisioner(
        Provisioner::new(Arc::clone(&ledger)).with_max_create_attempts(config.workflow.max_create_attempts),
    );
    let started = Instant::now();
    let outcome = bootstrap
        .run(
            &plan,
            BootstrapSigners {
                admin: &signers.admin,
                payer: &signers.payer,
                user: &signers.user,
            },
        )
        .await
        .context("Bootstrap failed")?;

    let report = outcome.report(ledger.program_id());
    metrics.record_report(&report, started.elapsed());
    repository.save_report(&report).await?;

    // ── Margin operations ───────────────────────────────────
    let ops = &config.operations;
    let bank = outcome
        .bank(&ops.asset)
        .with_context(|| format!("No bank provisioned for {}", ops.asset))?;
    let account = outcome.margin_account.resource();
    let executor = MarginExecutor::new(Arc::clone(&ledger));

    let deposit = executor
        .deposit(account, bank, token_account, &signers.user, &signers.payer, ops.deposit_amount)
        .await;
    metrics.record_operation(OperationKind::Deposit, deposit.is_ok());
    let deposit = deposit.context("Deposit failed")?;
    log_balance("deposit", &deposit);
    repository
        .append_operation(&operation_record(OperationKind::Deposit, &deposit, ops.deposit_amount, false))
        .await?;

    if ops.withdraw_amount > 0 {
        let withdraw = executor
            .withdraw(
                account,
                bank,
                token_account,
                &signers.user,
                &signers.payer,
                ops.withdraw_amount,
                ops.allow_borrow,
            )
            .await;
        metrics.record_operation(OperationKind::Withdraw, withdraw.is_ok());
        let withdraw = withdraw.context("Withdraw failed")?;
        log_balance("withdraw", &withdraw);
        repository
            .append_operation(&operation_record(
                OperationKind::Withdraw,
                &withdraw,
                ops.withdraw_amount,
                ops.allow_borrow,
            ))
            .await?;
    }

    info!(
        created = report.created_count(),
        resources = report.entries.len(),
        "Workflow complete"
    );
    Ok(())
}

fn log_balance(op: &str, result: &MarginOpResult) {
    let balance = &result.balance;
    info!(
        op,
        signature = %result.signature,
        token_index = balance.token_index,
        native_position = balance.native_position,
        ui_position = %balance.ui_position(),
        bank_deposits = balance.bank_deposits,
        bank_borrows = balance.bank_borrows,
        "Balance after operation"
    );
}

fn operation_record(
    kind: OperationKind,
    result: &MarginOpResult,
    amount: u64,
    allow_borrow: bool,
) -> OperationRecord {
    OperationRecord {
        id: Uuid::new_v4().to_string(),
        kind,
        account: result.balance.account,
        bank: Some(result.balance.bank),
        token_index: Some(result.balance.token_index),
        amount,
        allow_borrow,
        native_position_after: result.balance.native_position,
        signature: result.signature.clone(),
        timestamp_ms: Utc::now().timestamp_millis(),
    }
}
