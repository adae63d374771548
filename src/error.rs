//! Workflow error taxonomy.

use crate::domain::{LedgerIdentity, ResourceKind, SigningError, TokenIndex};
use crate::ports::ledger::{LedgerError, ProgramError};

/// Errors raised by provisioning and margin operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
  /// Ledger unreachable or timed out.
  #[error("transport: {0}")]
  Transport(String),
  /// A creation was submitted but its confirmation or read-back was lost.
  #[error("{kind} creation outcome unknown: {message}")]
  OutcomeUnknown { kind: ResourceKind, message: String },
  /// A lookup meant to resolve to at most one resource matched several.
  #[error("{kind} lookup `{key}` is ambiguous: {matches} accounts match")]
  Ambiguous {
    kind: ResourceKind,
    key: String,
    matches: usize,
  },
  /// The ledger rejected a creation transaction.
  #[error("{kind} creation rejected: {source}")]
  CreationRejected {
    kind: ResourceKind,
    #[source]
    source: ProgramError,
  },
  /// A creation was attempted before its prerequisite existed.
  #[error("{kind} requires {dependency} `{key}`, which does not exist")]
  DependencyMissing {
    kind: ResourceKind,
    dependency: ResourceKind,
    key: String,
  },
  /// Withdraw beyond the deposited balance with borrowing disallowed.
  #[error(
    "insufficient balance in {account} for token {token_index}: available {available}, requested {requested}"
  )]
  InsufficientBalance {
    account: LedgerIdentity,
    token_index: TokenIndex,
    available: u64,
    requested: u64,
  },
  /// Deposit or withdraw of zero.
  #[error("amount must be greater than zero")]
  InvalidAmount,
  /// The ledger rejected a non-creation transaction.
  #[error("transaction rejected: {0}")]
  TransactionRejected(#[source] ProgramError),
  /// An account expected to exist was not found.
  #[error("{kind} {address} not found")]
  AccountNotFound {
    kind: ResourceKind,
    address: LedgerIdentity,
  },
  /// Closure attempted on an account with positions or open orders.
  #[error("margin account {0} still holds positions or open orders")]
  AccountNotEmpty(LedgerIdentity),
  /// A ledger response could not be decoded.
  #[error("decode: {0}")]
  Decode(String),
  /// Transaction signing failed.
  #[error("signing: {0}")]
  Signing(#[from] SigningError),
}

impl Error {
  /// Only transport failures are worth retrying.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Transport(_) | Self::OutcomeUnknown { .. })
  }

  /// Whether a creation failed because the resource already exists.
  pub fn is_already_exists(&self) -> bool {
    matches!(self, Self::CreationRejected { source, .. } if source.is_already_in_use())
  }
}

impl From<LedgerError> for Error {
  fn from(err: LedgerError) -> Self {
    match err {
      LedgerError::Transport(msg) => Self::Transport(msg),
      LedgerError::Rejected(program) => Self::TransactionRejected(program),
      LedgerError::Decode(msg) => Self::Decode(msg),
    }
  }
}

/// Result type used across use cases.
pub type Result<T, E = Error> = std::result::Result<T, E>;
