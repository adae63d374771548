//! Ledger Client Port - Read and Submit Primitives
//!
//! Defines the trait the use cases need from a ledger: fetch an account
//! by address, list accounts of a kind matching field filters, read a
//! token account balance, and submit a signed transaction that returns
//! only once the ledger has confirmed or rejected it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
  AccountFilter, AccountState, LedgerIdentity, ResourceKind, SignedTransaction, TokenIndex,
  TxReceipt,
};

/// Reason the margin program rejected a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ProgramError {
  /// The derived address (or the scope it represents) is already taken.
  #[error("account {address} already in use")]
  AccountAlreadyInUse { address: LedgerIdentity },
  /// A referenced account does not exist.
  #[error("account {address} not found")]
  AccountNotFound { address: LedgerIdentity },
  /// A referenced account exists but is the wrong kind or in another group.
  #[error("account {address} is not a {expected} of this group")]
  WrongAccount {
    address: LedgerIdentity,
    expected: ResourceKind,
  },
  /// A required signature is absent or invalid.
  #[error("missing or invalid signature from {signer}")]
  MissingSignature { signer: LedgerIdentity },
  /// The signer has no authority over the account.
  #[error("{signer} has no authority over {account}")]
  Unauthorized {
    signer: LedgerIdentity,
    account: LedgerIdentity,
  },
  /// Another bank in the group already uses this token index.
  #[error("token index {token_index} already registered")]
  TokenIndexInUse { token_index: TokenIndex },
  /// Withdraw beyond the deposited balance with borrowing disallowed.
  #[error("insufficient balance: available {available}, requested {requested}")]
  InsufficientBalance { available: u64, requested: u64 },
  /// Source token account does not hold enough tokens.
  #[error("token account {account} holds {available}, requested {requested}")]
  InsufficientFunds {
    account: LedgerIdentity,
    available: u64,
    requested: u64,
  },
  /// Bank vault does not hold enough tokens to pay out.
  #[error("vault liquidity {available} below requested {requested}")]
  InsufficientLiquidity { available: u64, requested: u64 },
  /// The account still holds positions or open orders.
  #[error("account {address} is not empty")]
  AccountNotEmpty { address: LedgerIdentity },
  /// Malformed instruction (zero amount, overflow, mint mismatch).
  #[error("invalid instruction: {reason}")]
  InvalidInstruction { reason: String },
}

impl ProgramError {
  /// Whether the rejection means the resource already exists.
  pub fn is_already_in_use(&self) -> bool {
    matches!(self, Self::AccountAlreadyInUse { .. })
  }
}

/// Errors surfaced by a ledger client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
  /// Endpoint unreachable, timed out, or returned a server error.
  ///
  /// For submissions the outcome is unknown: the transaction may or may
  /// not have been applied.
  #[error("transport: {0}")]
  Transport(String),
  /// The program rejected the transaction; nothing was applied.
  #[error("rejected: {0}")]
  Rejected(#[from] ProgramError),
  /// The response could not be decoded.
  #[error("decode: {0}")]
  Decode(String),
}

/// Trait for ledger access.
///
/// Implementors own the connection; callers pass the client explicitly
/// through every use case instead of reaching for shared global state.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
  /// Address of the margin program all resources live under.
  fn program_id(&self) -> LedgerIdentity;

  /// Fetch an account by address. `Ok(None)` means it does not exist.
  async fn get_account(&self, address: &LedgerIdentity) -> Result<Option<AccountState>, LedgerError>;

  /// List every account of `kind` that satisfies all `filters`.
  async fn find_accounts(
    &self,
    kind: ResourceKind,
    filters: &[AccountFilter],
  ) -> Result<Vec<AccountState>, LedgerError>;

  /// Balance of a token account. `Ok(None)` if the account does not exist.
  async fn token_balance(&self, token_account: &LedgerIdentity) -> Result<Option<u64>, LedgerError>;

  /// Submit a signed transaction and wait for confirmation.
  ///
  /// All instructions are applied atomically or not at all.
  async fn submit(&self, transaction: &SignedTransaction) -> Result<TxReceipt, LedgerError>;

  /// Check if the ledger connection is healthy.
  async fn is_healthy(&self) -> bool;
}
