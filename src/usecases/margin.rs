//! Margin Operation Executor - Deposit, Withdraw, Close
//!
//! Operates on an already-provisioned (margin account, bank) pair. Every
//! operation is one all-or-nothing transaction, followed by a read-back of
//! the account and bank so callers see the ledger's post-operation state
//! rather than a locally computed one.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::amount::ui_amount;
use crate::domain::{
  Bank, Instruction, Keypair, LedgerIdentity, MarginAccount, TokenIndex, Transaction, TxReceipt,
};
use crate::error::{Error, Result};
use crate::ports::ledger::{LedgerClient, LedgerError, ProgramError};

use super::locator::Locator;

/// Post-operation position of one account in one bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
  pub account: LedgerIdentity,
  pub bank: LedgerIdentity,
  pub token_index: TokenIndex,
  pub decimals: u8,
  /// Signed native position (negative when borrowing).
  pub native_position: i64,
  /// Bank-wide deposit total.
  pub bank_deposits: u64,
  /// Bank-wide borrow total.
  pub bank_borrows: u64,
}

impl BalanceSnapshot {
  /// Position in UI units.
  pub fn ui_position(&self) -> Decimal {
    ui_amount(i128::from(self.native_position), self.decimals)
  }

  /// Deposited amount, zero when borrowing.
  pub fn native_deposit(&self) -> u64 {
    u64::try_from(self.native_position.max(0)).unwrap_or(0)
  }
}

/// Result of a deposit or withdraw.
#[derive(Debug, Clone, Serialize)]
pub struct MarginOpResult {
  pub signature: String,
  pub slot: u64,
  pub balance: BalanceSnapshot,
}

/// Proof that an account held no positions and no open orders when it
/// was last read. Required to close the account.
#[derive(Debug)]
pub struct ZeroBalances {
  account: LedgerIdentity,
  group: LedgerIdentity,
}

impl ZeroBalances {
  /// Account the confirmation was issued for.
  pub fn account(&self) -> LedgerIdentity {
    self.account
  }
}

/// Executes margin operations against a ledger.
pub struct MarginExecutor<L: LedgerClient> {
  ledger: Arc<L>,
  locator: Locator<L>,
}

impl<L: LedgerClient> MarginExecutor<L> {
  pub fn new(ledger: Arc<L>) -> Self {
    let locator = Locator::new(Arc::clone(&ledger));
    Self { ledger, locator }
  }

  /// Move `amount` native units from `source` into the bank vault and
  /// credit the account's position.
  #[instrument(skip_all, fields(account = %account.address, token_index = bank.token_index, amount))]
  pub async fn deposit(
    &self,
    account: &MarginAccount,
    bank: &Bank,
    source: LedgerIdentity,
    owner: &Keypair,
    payer: &Keypair,
    amount: u64,
  ) -> Result<MarginOpResult> {
    if amount == 0 {
      return Err(Error::InvalidAmount);
    }
    let ix = Instruction::Deposit {
      group: account.group,
      account: account.address,
      bank: bank.address,
      token_account: source,
      owner: owner.identity(),
      amount,
    };
    let receipt = self.submit(ix, owner, payer, account, bank).await?;
    let result = self.read_back(account, bank, receipt).await?;
    info!(
      signature = %result.signature,
      native_position = result.balance.native_position,
      ui_position = %result.balance.ui_position(),
      "Deposit confirmed"
    );
    Ok(result)
  }

  /// Move `amount` native units from the bank vault to `destination`.
  ///
  /// Without `allow_borrow`, withdrawing more than the deposited balance
  /// fails with [`Error::InsufficientBalance`] and submits nothing.
  #[instrument(skip_all, fields(account = %account.address, token_index = bank.token_index, amount, allow_borrow))]
  #[allow(clippy::too_many_arguments)]
  pub async fn withdraw(
    &self,
    account: &MarginAccount,
    bank: &Bank,
    destination: LedgerIdentity,
    owner: &Keypair,
    payer: &Keypair,
    amount: u64,
    allow_borrow: bool,
  ) -> Result<MarginOpResult> {
    if amount == 0 {
      return Err(Error::InvalidAmount);
    }
    if !allow_borrow {
      let current = self.locator.fetch_existing::<MarginAccount>(&account.address).await?;
      let available = current.native_deposit(bank);
      if amount > available {
        warn!(available, requested = amount, "Withdraw exceeds deposit, borrowing disallowed");
        return Err(Error::InsufficientBalance {
          account: account.address,
          token_index: bank.token_index,
          available,
          requested: amount,
        });
      }
    }
    let ix = Instruction::Withdraw {
      group: account.group,
      account: account.address,
      bank: bank.address,
      token_account: destination,
      owner: owner.identity(),
      amount,
      allow_borrow,
    };
    let receipt = self.submit(ix, owner, payer, account, bank).await?;
    let result = self.read_back(account, bank, receipt).await?;
    info!(
      signature = %result.signature,
      native_position = result.balance.native_position,
      ui_position = %result.balance.ui_position(),
      "Withdraw confirmed"
    );
    Ok(result)
  }

  /// Current position of `account` in `bank`, read from the ledger.
  pub async fn balance(&self, account: &LedgerIdentity, bank: &LedgerIdentity) -> Result<BalanceSnapshot> {
    let account = self.locator.fetch_existing::<MarginAccount>(account).await?;
    let bank = self.locator.fetch_existing::<Bank>(bank).await?;
    Ok(snapshot(&account, &bank))
  }

  /// Confirm that `account` holds no positions and no open orders.
  ///
  /// Never settles anything; a non-empty account is an error.
  pub async fn confirm_zero_balances(&self, account: &LedgerIdentity) -> Result<ZeroBalances> {
    let current = self.locator.fetch_existing::<MarginAccount>(account).await?;
    if !current.is_empty() {
      return Err(Error::AccountNotEmpty(current.address));
    }
    Ok(ZeroBalances {
      account: current.address,
      group: current.group,
    })
  }

  /// Close an account previously confirmed empty.
  ///
  /// The program re-checks emptiness; if a position appeared since the
  /// confirmation the close is rejected with [`Error::AccountNotEmpty`].
  #[instrument(skip_all, fields(account = %confirmation.account))]
  pub async fn close_margin_account(
    &self,
    confirmation: ZeroBalances,
    owner: &Keypair,
    payer: &Keypair,
  ) -> Result<TxReceipt> {
    let ix = Instruction::CloseMarginAccount {
      group: confirmation.group,
      account: confirmation.account,
      owner: owner.identity(),
    };
    let tx = Transaction::new(payer.identity(), vec![ix]).sign(&[owner, payer])?;
    let receipt = self.ledger.submit(&tx).await.map_err(|err| match err {
      LedgerError::Rejected(ProgramError::AccountNotEmpty { address }) => Error::AccountNotEmpty(address),
      other => Error::from(other),
    })?;
    info!(signature = %receipt.signature, "Margin account closed");
    Ok(receipt)
  }

  async fn submit(
    &self,
    ix: Instruction,
    owner: &Keypair,
    payer: &Keypair,
    account: &MarginAccount,
    bank: &Bank,
  ) -> Result<TxReceipt> {
    let tx = Transaction::new(payer.identity(), vec![ix]).sign(&[owner, payer])?;
    self.ledger.submit(&tx).await.map_err(|err| match err {
      LedgerError::Rejected(ProgramError::InsufficientBalance { available, requested }) => {
        Error::InsufficientBalance {
          account: account.address,
          token_index: bank.token_index,
          available,
          requested,
        }
      }
      other => Error::from(other),
    })
  }

  async fn read_back(&self, account: &MarginAccount, bank: &Bank, receipt: TxReceipt) -> Result<MarginOpResult> {
    let balance = self.balance(&account.address, &bank.address).await?;
    Ok(MarginOpResult {
      signature: receipt.signature,
      slot: receipt.slot,
      balance,
    })
  }
}

fn snapshot(account: &MarginAccount, bank: &Bank) -> BalanceSnapshot {
  BalanceSnapshot {
    account: account.address,
    bank: bank.address,
    token_index: bank.token_index,
    decimals: bank.decimals,
    native_position: account.position(bank.token_index).map_or(0, |p| p.native),
    bank_deposits: bank.native_deposits,
    bank_borrows: bank.native_borrows,
  }
}
