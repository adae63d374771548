//! Resource Creator - Submit Creation Transactions
//!
//! Each `create_*` call checks that the resource's dependencies exist,
//! submits one creation transaction, waits for confirmation, and reads
//! the new account back from the ledger. The read-back snapshot is the
//! authoritative result; a confirmed transaction whose account cannot be
//! read back is treated as a rejected creation.
//!
//! Transport failures during the submit or the read-back surface as
//! `OutcomeUnknown`; those during the dependency reads stay `Transport`,
//! since nothing was sent yet.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument};

use crate::domain::identity::{
  find_bank_address, find_group_address, find_margin_account_address, find_open_orders_address,
  find_spot_market_address, find_stub_oracle_address,
};
use crate::domain::{
  Bank, Group, Instruction, Keypair, LedgerIdentity, MarginAccount, Market, MarketIndex,
  OpenOrders, Oracle, Resource, ResourceKind, TokenIndex, Transaction,
};
use crate::error::{Error, Result};
use crate::ports::ledger::{LedgerClient, LedgerError, ProgramError};

use super::locator::Locator;

/// Submits creation transactions for every resource kind.
pub struct Creator<L: LedgerClient> {
  ledger: Arc<L>,
  locator: Locator<L>,
}

impl<L: LedgerClient> Creator<L> {
  /// Create a creator over the given ledger.
  pub fn new(ledger: Arc<L>) -> Self {
    let locator = Locator::new(Arc::clone(&ledger));
    Self { ledger, locator }
  }

  /// Create the group administered by `admin`.
  #[instrument(skip_all, fields(admin = %admin.identity(), group_num))]
  pub async fn create_group(&self, admin: &Keypair, payer: &Keypair, group_num: u32) -> Result<Group> {
    let program_id = self.ledger.program_id();
    let address = find_group_address(&admin.identity(), group_num, &program_id);
    let ix = Instruction::CreateGroup {
      admin: admin.identity(),
      group_num,
    };
    self.submit_creation(ix, admin, payer, address).await
  }

  /// Create a stub oracle for `mint` with an initial price.
  #[instrument(skip_all, fields(group = %group.address, mint = %mint, %price))]
  pub async fn create_stub_oracle(
    &self,
    group: &Group,
    admin: &Keypair,
    payer: &Keypair,
    mint: LedgerIdentity,
    price: Decimal,
  ) -> Result<Oracle> {
    self.require_group(ResourceKind::Oracle, group).await?;
    let address = find_stub_oracle_address(&group.address, &mint, &self.ledger.program_id());
    let ix = Instruction::CreateStubOracle {
      group: group.address,
      admin: admin.identity(),
      mint,
      price,
    };
    self.submit_creation(ix, admin, payer, address).await
  }

  /// Register a bank for `mint` backed by `oracle`.
  ///
  /// Without a pinned `token_index` the next free index in the group
  /// (highest existing + 1) is used, skipping any index in `reserved`.
  #[instrument(skip_all, fields(group = %group.address, mint = %mint, oracle = %oracle))]
  #[allow(clippy::too_many_arguments)]
  pub async fn register_token(
    &self,
    group: &Group,
    admin: &Keypair,
    payer: &Keypair,
    mint: LedgerIdentity,
    oracle: LedgerIdentity,
    decimals: u8,
    token_index: Option<TokenIndex>,
    reserved: &[TokenIndex],
  ) -> Result<Bank> {
    self.require_group(ResourceKind::Bank, group).await?;
    if !self.locator.exists(&oracle).await? {
      return Err(Error::DependencyMissing {
        kind: ResourceKind::Bank,
        dependency: ResourceKind::Oracle,
        key: oracle.to_string(),
      });
    }
    let token_index = match token_index {
      Some(index) => index,
      None => self.next_token_index(group, reserved).await?,
    };
    let address = find_bank_address(&group.address, token_index, &self.ledger.program_id());
    let ix = Instruction::RegisterToken {
      group: group.address,
      admin: admin.identity(),
      mint,
      oracle,
      token_index,
      decimals,
    };
    self.submit_creation(ix, admin, payer, address).await
  }

  /// Create `owner`'s margin account.
  #[instrument(skip_all, fields(group = %group.address, owner = %owner.identity(), account_num))]
  pub async fn create_margin_account(
    &self,
    group: &Group,
    owner: &Keypair,
    payer: &Keypair,
    account_num: u32,
    name: &str,
  ) -> Result<MarginAccount> {
    self.require_group(ResourceKind::MarginAccount, group).await?;
    let address = find_margin_account_address(
      &group.address,
      &owner.identity(),
      account_num,
      &self.ledger.program_id(),
    );
    let ix = Instruction::CreateMarginAccount {
      group: group.address,
      owner: owner.identity(),
      account_num,
      name: name.to_string(),
    };
    self.submit_creation(ix, owner, payer, address).await
  }

  /// Register a spot market between two existing banks.
  #[instrument(skip_all, fields(group = %group.address, base = %base.address, quote = %quote.address))]
  #[allow(clippy::too_many_arguments)]
  pub async fn register_spot_market(
    &self,
    group: &Group,
    admin: &Keypair,
    payer: &Keypair,
    base: &Bank,
    quote: &Bank,
    program: LedgerIdentity,
    external_market: LedgerIdentity,
    market_index: MarketIndex,
  ) -> Result<Market> {
    self.require_group(ResourceKind::Market, group).await?;
    for bank in [base, quote] {
      self
        .require::<Bank>(ResourceKind::Market, &bank.address)
        .await?;
    }
    let address = find_spot_market_address(&group.address, &external_market, &self.ledger.program_id());
    let ix = Instruction::RegisterSpotMarket {
      group: group.address,
      admin: admin.identity(),
      program,
      external_market,
      base_bank: base.address,
      quote_bank: quote.address,
      market_index,
    };
    self.submit_creation(ix, admin, payer, address).await
  }

  /// Create the open orders sub-account of `account` on `market`.
  #[instrument(skip_all, fields(account = %account.address, market = %market.address))]
  pub async fn create_open_orders(
    &self,
    account: &MarginAccount,
    market: &Market,
    owner: &Keypair,
    payer: &Keypair,
  ) -> Result<OpenOrders> {
    self
      .require::<MarginAccount>(ResourceKind::OpenOrders, &account.address)
      .await?;
    self
      .require::<Market>(ResourceKind::OpenOrders, &market.address)
      .await?;
    let address = find_open_orders_address(&account.address, &market.address, &self.ledger.program_id());
    let ix = Instruction::CreateOpenOrders {
      group: account.group,
      account: account.address,
      market: market.address,
      owner: owner.identity(),
    };
    self.submit_creation(ix, owner, payer, address).await
  }

  async fn require_group(&self, kind: ResourceKind, group: &Group) -> Result<()> {
    self.require::<Group>(kind, &group.address).await.map(|_| ())
  }

  /// Fetch dependency `R` at `address` or fail with `DependencyMissing`.
  async fn require<R: Resource>(&self, kind: ResourceKind, address: &LedgerIdentity) -> Result<R> {
    self
      .locator
      .fetch::<R>(address)
      .await?
      .ok_or_else(|| Error::DependencyMissing {
        kind,
        dependency: R::KIND,
        key: address.to_string(),
      })
  }

  async fn next_token_index(&self, group: &Group, reserved: &[TokenIndex]) -> Result<TokenIndex> {
    let banks = self.locator.banks_in_group(group.address).await?;
    let mut next = banks
      .iter()
      .map(|b| b.token_index)
      .max()
      .map_or(Some(0), |max| max.checked_add(1));
    while let Some(index) = next.filter(|index| reserved.contains(index)) {
      next = index.checked_add(1);
    }
    next.ok_or_else(|| Error::CreationRejected {
      kind: ResourceKind::Bank,
      source: ProgramError::InvalidInstruction {
        reason: "no free token index left in group".to_string(),
      },
    })
  }

  /// Sign, submit and read back a creation transaction.
  async fn submit_creation<R: Resource>(
    &self,
    ix: Instruction,
    authority: &Keypair,
    payer: &Keypair,
    expected: LedgerIdentity,
  ) -> Result<R> {
    let tx = Transaction::new(payer.identity(), vec![ix]).sign(&[authority, payer])?;

    let receipt = self.ledger.submit(&tx).await.map_err(|err| match err {
      LedgerError::Rejected(ProgramError::AccountNotFound { address }) => Error::DependencyMissing {
        kind: R::KIND,
        dependency: dependency_kind(R::KIND),
        key: address.to_string(),
      },
      LedgerError::Rejected(source) => Error::CreationRejected { kind: R::KIND, source },
      LedgerError::Transport(message) => Error::OutcomeUnknown { kind: R::KIND, message },
      other => Error::from(other),
    })?;

    let created = self
      .locator
      .fetch::<R>(&expected)
      .await
      .map_err(|err| match err {
        Error::Transport(message) => Error::OutcomeUnknown { kind: R::KIND, message },
        other => other,
      })?
      .ok_or(Error::CreationRejected {
        kind: R::KIND,
        source: ProgramError::AccountNotFound { address: expected },
      })?;

    info!(
      kind = %R::KIND,
      address = %created.address(),
      signature = %receipt.signature,
      slot = receipt.slot,
      "Resource created"
    );
    Ok(created)
  }
}

/// Closest dependency of a kind, used when the program reports a missing account.
fn dependency_kind(kind: ResourceKind) -> ResourceKind {
  match kind {
    ResourceKind::Group | ResourceKind::Oracle | ResourceKind::MarginAccount => ResourceKind::Group,
    ResourceKind::Bank => ResourceKind::Oracle,
    ResourceKind::Market => ResourceKind::Bank,
    ResourceKind::OpenOrders => ResourceKind::Market,
  }
}
