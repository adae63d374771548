//! Repository Port - Bootstrap Report Persistence Interface
//!
//! Defines the trait for persisting what a workflow run produced: the
//! identities of every provisioned resource (atomic JSON snapshot) and
//! an append-only JSONL journal of margin operations for auditing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LedgerIdentity, ResourceKind, TokenIndex};

/// Whether a provisioning step found or created its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
  Found,
  Created,
}

impl std::fmt::Display for ProvisionOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Found => write!(f, "found"),
      Self::Created => write!(f, "created"),
    }
  }
}

/// One provisioned resource in a bootstrap report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
  /// Resource kind.
  pub kind: ResourceKind,
  /// Human-readable label (asset symbol, market name).
  pub label: String,
  /// Ledger address.
  pub address: LedgerIdentity,
  /// Found or created on this run.
  pub outcome: ProvisionOutcome,
}

/// Summary of a bootstrap run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapReport {
  /// Version of the report format.
  pub version: String,
  /// Margin program the resources live under.
  pub program_id: LedgerIdentity,
  /// When the run finished.
  pub generated_at: DateTime<Utc>,
  /// Every provisioned resource in dependency order.
  pub entries: Vec<ReportEntry>,
}

impl BootstrapReport {
  /// Number of resources created on this run.
  pub fn created_count(&self) -> usize {
    self
      .entries
      .iter()
      .filter(|e| e.outcome == ProvisionOutcome::Created)
      .count()
  }
}

/// Margin operation kinds recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  Deposit,
  Withdraw,
  Close,
}

impl std::fmt::Display for OperationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Deposit => write!(f, "deposit"),
      Self::Withdraw => write!(f, "withdraw"),
      Self::Close => write!(f, "close"),
    }
  }
}

/// A single margin operation for the audit journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
  /// Unique record identifier.
  pub id: String,
  /// Operation kind.
  pub kind: OperationKind,
  /// Margin account.
  pub account: LedgerIdentity,
  /// Bank (absent for closures).
  pub bank: Option<LedgerIdentity>,
  /// Bank token index.
  pub token_index: Option<TokenIndex>,
  /// Native amount moved.
  pub amount: u64,
  /// Whether borrowing was allowed (withdraw only).
  pub allow_borrow: bool,
  /// Native position after the operation.
  pub native_position_after: i64,
  /// Transaction signature.
  pub signature: String,
  /// Timestamp (Unix ms).
  pub timestamp_ms: i64,
}

/// Trait for report persistence providers.
#[async_trait]
pub trait ReportRepository: Send + Sync + 'static {
  /// Save the bootstrap report (replaces the previous one).
  async fn save_report(&self, report: &BootstrapReport) -> anyhow::Result<()>;

  /// Load the most recent bootstrap report.
  async fn load_latest_report(&self) -> anyhow::Result<Option<BootstrapReport>>;

  /// Append a margin operation to the journal.
  async fn append_operation(&self, record: &OperationRecord) -> anyhow::Result<()>;

  /// Load every journaled margin operation.
  async fn load_operations(&self) -> anyhow::Result<Vec<OperationRecord>>;

  /// Check if the repository is healthy (directory writable).
  async fn is_healthy(&self) -> bool;
}
