//! Typed provisioning steps, one per resource kind.
//!
//! Each step carries the scope key its resource is located by and the
//! parameters used to create it when the lookup comes back empty.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{
  Bank, Group, Keypair, LedgerIdentity, MarginAccount, Market, MarketIndex, OpenOrders, Oracle,
  ScopeKey, TokenIndex,
};
use crate::error::Result;
use crate::ports::ledger::LedgerClient;

use super::creator::Creator;
use super::provisioner::ProvisionStep;

/// Group administered by `admin`.
pub struct GroupStep<'a> {
  pub admin: &'a Keypair,
  pub payer: &'a Keypair,
  pub group_num: u32,
}

#[async_trait]
impl<'a, L: LedgerClient> ProvisionStep<L> for GroupStep<'a> {
  type Output = Group;

  fn scope(&self) -> ScopeKey {
    ScopeKey::Group {
      admin: self.admin.identity(),
    }
  }

  async fn create(&self, creator: &Creator<L>) -> Result<Group> {
    creator.create_group(self.admin, self.payer, self.group_num).await
  }
}

/// Stub oracle for `mint`, seeded with `price`.
pub struct OracleStep<'a> {
  pub group: &'a Group,
  pub admin: &'a Keypair,
  pub payer: &'a Keypair,
  pub mint: LedgerIdentity,
  pub price: Decimal,
}

#[async_trait]
impl<'a, L: LedgerClient> ProvisionStep<L> for OracleStep<'a> {
  type Output = Oracle;

  fn scope(&self) -> ScopeKey {
    ScopeKey::Oracle {
      group: self.group.address,
      mint: self.mint,
    }
  }

  async fn create(&self, creator: &Creator<L>) -> Result<Oracle> {
    creator
      .create_stub_oracle(self.group, self.admin, self.payer, self.mint, self.price)
      .await
  }
}

/// Bank for `mint`, priced by the account at `oracle`.
pub struct BankStep<'a> {
  pub group: &'a Group,
  pub admin: &'a Keypair,
  pub payer: &'a Keypair,
  pub mint: LedgerIdentity,
  pub oracle: LedgerIdentity,
  pub decimals: u8,
  /// Pinned index; the next free one when `None`.
  pub token_index: Option<TokenIndex>,
  /// Indexes pinned by other banks of the plan, never auto-assigned.
  pub reserved: &'a [TokenIndex],
}

#[async_trait]
impl<'a, L: LedgerClient> ProvisionStep<L> for BankStep<'a> {
  type Output = Bank;

  fn scope(&self) -> ScopeKey {
    ScopeKey::Bank {
      group: self.group.address,
      mint: self.mint,
    }
  }

  async fn create(&self, creator: &Creator<L>) -> Result<Bank> {
    creator
      .register_token(
        self.group,
        self.admin,
        self.payer,
        self.mint,
        self.oracle,
        self.decimals,
        self.token_index,
        self.reserved,
      )
      .await
  }
}

/// Margin account owned by `owner`.
pub struct MarginAccountStep<'a> {
  pub group: &'a Group,
  pub owner: &'a Keypair,
  pub payer: &'a Keypair,
  pub account_num: u32,
  pub name: &'a str,
}

#[async_trait]
impl<'a, L: LedgerClient> ProvisionStep<L> for MarginAccountStep<'a> {
  type Output = MarginAccount;

  fn scope(&self) -> ScopeKey {
    ScopeKey::MarginAccount {
      group: self.group.address,
      owner: self.owner.identity(),
    }
  }

  async fn create(&self, creator: &Creator<L>) -> Result<MarginAccount> {
    creator
      .create_margin_account(self.group, self.owner, self.payer, self.account_num, self.name)
      .await
  }
}

/// Spot market between `base` and `quote`.
pub struct MarketStep<'a> {
  pub group: &'a Group,
  pub admin: &'a Keypair,
  pub payer: &'a Keypair,
  pub base: &'a Bank,
  pub quote: &'a Bank,
  pub program: LedgerIdentity,
  pub external_market: LedgerIdentity,
  pub market_index: MarketIndex,
}

#[async_trait]
impl<'a, L: LedgerClient> ProvisionStep<L> for MarketStep<'a> {
  type Output = Market;

  fn scope(&self) -> ScopeKey {
    ScopeKey::Market {
      group: self.group.address,
      base_token_index: self.base.token_index,
      quote_token_index: self.quote.token_index,
    }
  }

  async fn create(&self, creator: &Creator<L>) -> Result<Market> {
    creator
      .register_spot_market(
        self.group,
        self.admin,
        self.payer,
        self.base,
        self.quote,
        self.program,
        self.external_market,
        self.market_index,
      )
      .await
  }
}

/// Open orders of `account` on `market`.
pub struct OpenOrdersStep<'a> {
  pub account: &'a MarginAccount,
  pub market: &'a Market,
  pub owner: &'a Keypair,
  pub payer: &'a Keypair,
}

#[async_trait]
impl<'a, L: LedgerClient> ProvisionStep<L> for OpenOrdersStep<'a> {
  type Output = OpenOrders;

  fn scope(&self) -> ScopeKey {
    ScopeKey::OpenOrders {
      account: self.account.address,
      market: self.market.address,
    }
  }

  async fn create(&self, creator: &Creator<L>) -> Result<OpenOrders> {
    creator
      .create_open_orders(self.account, self.market, self.owner, self.payer)
      .await
  }
}
