//! Resource Locator - Find Existing Resources by Scope Key
//!
//! Read-only lookups. A key resolving to more than one account is a
//! configuration error, never a silent pick; transport failures are
//! propagated and never mistaken for "not found".

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::domain::{
  Bank, Group, LedgerIdentity, MarginAccount, Market, OpenOrders, Oracle, Resource,
  ResourceKind, ScopeKey, TokenIndex,
};
use crate::domain::resource::AccountFilter;
use crate::error::{Error, Result};
use crate::ports::ledger::LedgerClient;

/// Typed lookups over a ledger client.
pub struct Locator<L: LedgerClient> {
  ledger: Arc<L>,
}

impl<L: LedgerClient> Clone for Locator<L> {
  fn clone(&self) -> Self {
    Self {
      ledger: Arc::clone(&self.ledger),
    }
  }
}

impl<L: LedgerClient> Locator<L> {
  /// Create a locator over the given ledger.
  pub fn new(ledger: Arc<L>) -> Self {
    Self { ledger }
  }

  /// Locate the unique resource selected by `key`.
  ///
  /// Returns `Ok(None)` when nothing matches and [`Error::Ambiguous`]
  /// when several accounts do.
  #[instrument(skip(self), fields(kind = %R::KIND, key = %key))]
  pub async fn locate<R: Resource>(&self, key: &ScopeKey) -> Result<Option<R>> {
    debug_assert_eq!(key.kind(), R::KIND, "scope key kind mismatch");
    let mut matches = self.ledger.find_accounts(R::KIND, &key.filters()).await?;
    match matches.len() {
      0 => {
        debug!("Not found");
        Ok(None)
      }
      1 => {
        let state = matches.remove(0);
        let address = state.address();
        let resource = R::from_state(state).ok_or_else(|| {
          Error::Decode(format!("account {address} is not a {}", R::KIND))
        })?;
        debug!(address = %address, "Found");
        Ok(Some(resource))
      }
      n => Err(Error::Ambiguous {
        kind: R::KIND,
        key: key.to_string(),
        matches: n,
      }),
    }
  }

  /// Fetch a resource by address. `Ok(None)` if it does not exist.
  ///
  /// An existing account of another kind is a decode error.
  pub async fn fetch<R: Resource>(&self, address: &LedgerIdentity) -> Result<Option<R>> {
    let Some(state) = self.ledger.get_account(address).await? else {
      return Ok(None);
    };
    R::from_state(state)
      .map(Some)
      .ok_or_else(|| Error::Decode(format!("account {address} is not a {}", R::KIND)))
  }

  /// Fetch a resource that must exist.
  pub async fn fetch_existing<R: Resource>(&self, address: &LedgerIdentity) -> Result<R> {
    self
      .fetch(address)
      .await?
      .ok_or(Error::AccountNotFound {
        kind: R::KIND,
        address: *address,
      })
  }

  /// Whether any account exists at `address`, whatever its kind.
  pub async fn exists(&self, address: &LedgerIdentity) -> Result<bool> {
    Ok(self.ledger.get_account(address).await?.is_some())
  }

  /// Group administered by `admin`.
  pub async fn group(&self, admin: LedgerIdentity) -> Result<Option<Group>> {
    self.locate(&ScopeKey::Group { admin }).await
  }

  /// Oracle for `mint` in `group`.
  pub async fn oracle(&self, group: LedgerIdentity, mint: LedgerIdentity) -> Result<Option<Oracle>> {
    self.locate(&ScopeKey::Oracle { group, mint }).await
  }

  /// Bank for `mint` in `group`.
  pub async fn bank(&self, group: LedgerIdentity, mint: LedgerIdentity) -> Result<Option<Bank>> {
    self.locate(&ScopeKey::Bank { group, mint }).await
  }

  /// Margin account owned by `owner` in `group`.
  pub async fn margin_account(
    &self,
    group: LedgerIdentity,
    owner: LedgerIdentity,
  ) -> Result<Option<MarginAccount>> {
    self.locate(&ScopeKey::MarginAccount { group, owner }).await
  }

  /// Spot market for the (base, quote) token index pair in `group`.
  pub async fn market(
    &self,
    group: LedgerIdentity,
    base_token_index: TokenIndex,
    quote_token_index: TokenIndex,
  ) -> Result<Option<Market>> {
    self
      .locate(&ScopeKey::Market {
        group,
        base_token_index,
        quote_token_index,
      })
      .await
  }

  /// Open orders of `account` on `market`.
  pub async fn open_orders(
    &self,
    account: LedgerIdentity,
    market: LedgerIdentity,
  ) -> Result<Option<OpenOrders>> {
    self.locate(&ScopeKey::OpenOrders { account, market }).await
  }

  /// Every bank registered in `group`.
  pub async fn banks_in_group(&self, group: LedgerIdentity) -> Result<Vec<Bank>> {
    let states = self
      .ledger
      .find_accounts(ResourceKind::Bank, &[AccountFilter::Group(group)])
      .await?;
    states
      .into_iter()
      .map(|state| {
        let address = state.address();
        Bank::from_state(state).ok_or_else(|| Error::Decode(format!("account {address} is not a bank")))
      })
      .collect()
  }

  /// Balance of a token account, zero if it does not exist.
  pub async fn token_balance(&self, token_account: &LedgerIdentity) -> Result<u64> {
    Ok(self.ledger.token_balance(token_account).await?.unwrap_or(0))
  }

  /// Shared ledger handle.
  pub fn ledger(&self) -> &Arc<L> {
    &self.ledger
  }
}
