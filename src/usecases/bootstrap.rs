//! Bootstrap Orchestrator - Dependency-Ordered Provisioning
//!
//! Materializes group → oracles → banks → margin account → market →
//! open orders, threading each result into the steps that depend on it.
//!
//! Stub oracles are independent of each other and are provisioned
//! concurrently. Banks run one at a time: without a pinned token index
//! the next free index is read from the ledger, so two concurrent bank
//! registrations would claim the same one.
//!
//! A failure aborts the run. Steps confirmed before it stay on the
//! ledger; a rerun finds them and continues from the failed step.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::try_join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::domain::{
  Bank, Group, Keypair, LedgerIdentity, MarginAccount, Market, MarketIndex, OpenOrders, Oracle,
  Resource, ResourceKind, TokenIndex,
};
use crate::error::Error;
use crate::ports::ledger::LedgerClient;
use crate::ports::repository::{BootstrapReport, ProvisionOutcome, ReportEntry};

use super::provisioner::{Provisioned, Provisioner};
use super::steps::{
  BankStep, GroupStep, MarginAccountStep, MarketStep, OpenOrdersStep, OracleStep,
};

/// Version stamped into bootstrap reports.
pub const REPORT_VERSION: &str = "1";

/// Where a bank's price comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OracleSource {
  /// A stub oracle provisioned by the workflow with an initial price.
  Stub { price: Decimal },
  /// An externally operated price account, referenced as is.
  External { address: LedgerIdentity },
}

/// One asset to register.
#[derive(Debug, Clone)]
pub struct AssetPlan {
  pub symbol: String,
  pub mint: LedgerIdentity,
  pub decimals: u8,
  pub oracle: OracleSource,
  /// Pinned token index; the next free one when `None`.
  pub token_index: Option<TokenIndex>,
}

/// Spot market to register, with banks referenced by asset symbol.
#[derive(Debug, Clone)]
pub struct MarketPlan {
  pub base: String,
  pub quote: String,
  pub program: LedgerIdentity,
  pub external_market: LedgerIdentity,
  pub market_index: MarketIndex,
}

impl MarketPlan {
  /// `BASE/QUOTE`.
  pub fn label(&self) -> String {
    format!("{}/{}", self.base, self.quote)
  }
}

/// User margin account to create.
#[derive(Debug, Clone)]
pub struct AccountPlan {
  pub account_num: u32,
  pub name: String,
}

/// Everything a bootstrap run provisions.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
  pub group_num: u32,
  pub assets: Vec<AssetPlan>,
  pub market: MarketPlan,
  pub account: AccountPlan,
}

impl BootstrapPlan {
  /// Token indexes pinned by the plan's assets.
  pub fn pinned_token_indexes(&self) -> Vec<TokenIndex> {
    self.assets.iter().filter_map(|a| a.token_index).collect()
  }
}

/// The three signing identities of a run.
#[derive(Clone, Copy)]
pub struct BootstrapSigners<'a> {
  /// Authority over group, oracles, banks and market.
  pub admin: &'a Keypair,
  /// Pays fees for every transaction.
  pub payer: &'a Keypair,
  /// Owner of the margin account and its open orders.
  pub user: &'a Keypair,
}

/// Step of the bootstrap sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStep {
  Group,
  Oracle(String),
  Bank(String),
  MarginAccount,
  Market(String),
  OpenOrders(String),
}

impl fmt::Display for BootstrapStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Group => write!(f, "group"),
      Self::Oracle(symbol) => write!(f, "oracle {symbol}"),
      Self::Bank(symbol) => write!(f, "bank {symbol}"),
      Self::MarginAccount => write!(f, "margin account"),
      Self::Market(label) => write!(f, "market {label}"),
      Self::OpenOrders(label) => write!(f, "open orders {label}"),
    }
  }
}

/// A failed bootstrap step and its cause.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bootstrap step `{step}` failed: {source}")]
pub struct BootstrapError {
  pub step: BootstrapStep,
  #[source]
  pub source: Error,
}

impl BootstrapError {
  fn at(step: BootstrapStep) -> impl FnOnce(Error) -> Self {
    move |source| {
      error!(step = %step, error = %source, "Bootstrap step failed");
      Self { step, source }
    }
  }
}

/// Resources produced by a bootstrap run.
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
  pub group: Provisioned<Group>,
  /// Stub oracles by asset symbol.
  pub oracles: BTreeMap<String, Provisioned<Oracle>>,
  /// Banks by asset symbol.
  pub banks: BTreeMap<String, Provisioned<Bank>>,
  pub margin_account: Provisioned<MarginAccount>,
  pub market_label: String,
  pub market: Provisioned<Market>,
  pub open_orders: Provisioned<OpenOrders>,
}

impl BootstrapOutcome {
  /// Bank registered for `symbol`.
  pub fn bank(&self, symbol: &str) -> Option<&Bank> {
    self.banks.get(symbol).map(Provisioned::resource)
  }

  /// Number of resources created (not found) on this run.
  pub fn created_count(&self) -> usize {
    self.entries().iter().filter(|e| e.outcome == ProvisionOutcome::Created).count()
  }

  /// Persistable summary of the run.
  pub fn report(&self, program_id: LedgerIdentity) -> BootstrapReport {
    BootstrapReport {
      version: REPORT_VERSION.to_string(),
      program_id,
      generated_at: Utc::now(),
      entries: self.entries(),
    }
  }

  /// Every provisioned resource, in dependency order.
  pub fn entries(&self) -> Vec<ReportEntry> {
    let mut entries = vec![entry("group", &self.group)];
    entries.extend(self.oracles.iter().map(|(symbol, o)| entry(symbol, o)));
    entries.extend(self.banks.iter().map(|(symbol, b)| entry(symbol, b)));
    entries.push(entry(&self.margin_account.resource().name, &self.margin_account));
    entries.push(entry(&self.market_label, &self.market));
    entries.push(entry(&self.market_label, &self.open_orders));
    entries
  }
}

fn entry<R: Resource>(label: &str, provisioned: &Provisioned<R>) -> ReportEntry {
  ReportEntry {
    kind: R::KIND,
    label: label.to_string(),
    address: provisioned.resource().address(),
    outcome: provisioned.outcome(),
  }
}

/// Runs a [`BootstrapPlan`] through the idempotent provisioner.
pub struct Bootstrap<L: LedgerClient> {
  provisioner: Provisioner<L>,
}

impl<L: LedgerClient> Bootstrap<L> {
  /// Create an orchestrator over the given ledger.
  pub fn new(ledger: Arc<L>) -> Self {
    Self::with_provisioner(Provisioner::new(ledger))
  }

  /// Create an orchestrator around a configured provisioner.
  pub fn with_provisioner(provisioner: Provisioner<L>) -> Self {
    Self { provisioner }
  }

  /// The underlying provisioner.
  pub fn provisioner(&self) -> &Provisioner<L> {
    &self.provisioner
  }

  /// Provision every resource of `plan`, in dependency order.
  #[instrument(skip_all, fields(admin = %signers.admin.identity(), user = %signers.user.identity()))]
  pub async fn run(
    &self,
    plan: &BootstrapPlan,
    signers: BootstrapSigners<'_>,
  ) -> Result<BootstrapOutcome, BootstrapError> {
    let group = self
      .provisioner
      .provision(&GroupStep {
        admin: signers.admin,
        payer: signers.payer,
        group_num: plan.group_num,
      })
      .await
      .map_err(BootstrapError::at(BootstrapStep::Group))?;
    log_step(&BootstrapStep::Group, &group);
    let group_ref = group.resource();

    let oracles = self.provision_oracles(plan, signers, group_ref).await?;

    let reserved = plan.pinned_token_indexes();
    let mut banks = BTreeMap::new();
    for asset in &plan.assets {
      let oracle = match &asset.oracle {
        OracleSource::Stub { .. } => oracles
          .get(&asset.symbol)
          .map(|o: &Provisioned<Oracle>| o.resource().address),
        OracleSource::External { address } => Some(*address),
      };
      let step_id = BootstrapStep::Bank(asset.symbol.clone());
      let oracle = oracle.ok_or_else(|| {
        BootstrapError::at(step_id.clone())(Error::DependencyMissing {
          kind: ResourceKind::Bank,
          dependency: ResourceKind::Oracle,
          key: asset.symbol.clone(),
        })
      })?;
      let bank = self
        .provisioner
        .provision(&BankStep {
          group: group_ref,
          admin: signers.admin,
          payer: signers.payer,
          mint: asset.mint,
          oracle,
          decimals: asset.decimals,
          token_index: asset.token_index,
          reserved: &reserved,
        })
        .await
        .map_err(BootstrapError::at(step_id.clone()))?;
      log_step(&step_id, &bank);
      banks.insert(asset.symbol.clone(), bank);
    }

    let margin_account = self
      .provisioner
      .provision(&MarginAccountStep {
        group: group_ref,
        owner: signers.user,
        payer: signers.payer,
        account_num: plan.account.account_num,
        name: &plan.account.name,
      })
      .await
      .map_err(BootstrapError::at(BootstrapStep::MarginAccount))?;
    log_step(&BootstrapStep::MarginAccount, &margin_account);

    let market_label = plan.market.label();
    let market_step = BootstrapStep::Market(market_label.clone());
    let base = market_bank(&banks, &plan.market.base).map_err(BootstrapError::at(market_step.clone()))?;
    let quote = market_bank(&banks, &plan.market.quote).map_err(BootstrapError::at(market_step.clone()))?;
    let market = self
      .provisioner
      .provision(&MarketStep {
        group: group_ref,
        admin: signers.admin,
        payer: signers.payer,
        base,
        quote,
        program: plan.market.program,
        external_market: plan.market.external_market,
        market_index: plan.market.market_index,
      })
      .await
      .map_err(BootstrapError::at(market_step.clone()))?;
    log_step(&market_step, &market);

    let open_orders_step = BootstrapStep::OpenOrders(market_label.clone());
    let open_orders = self
      .provisioner
      .provision(&OpenOrdersStep {
        account: margin_account.resource(),
        market: market.resource(),
        owner: signers.user,
        payer: signers.payer,
      })
      .await
      .map_err(BootstrapError::at(open_orders_step.clone()))?;
    log_step(&open_orders_step, &open_orders);

    let outcome = BootstrapOutcome {
      group,
      oracles,
      banks,
      margin_account,
      market_label,
      market,
      open_orders,
    };
    info!(created = outcome.created_count(), "Bootstrap complete");
    Ok(outcome)
  }

  /// Provision every stub oracle of the plan concurrently.
  async fn provision_oracles(
    &self,
    plan: &BootstrapPlan,
    signers: BootstrapSigners<'_>,
    group: &Group,
  ) -> Result<BTreeMap<String, Provisioned<Oracle>>, BootstrapError> {
    let steps: Vec<(&str, OracleStep<'_>)> = plan
      .assets
      .iter()
      .filter_map(|asset| match asset.oracle {
        OracleSource::Stub { price } => Some((
          asset.symbol.as_str(),
          OracleStep {
            group,
            admin: signers.admin,
            payer: signers.payer,
            mint: asset.mint,
            price,
          },
        )),
        OracleSource::External { .. } => None,
      })
      .collect();

    let provisioned = try_join_all(steps.iter().map(|(symbol, step)| async move {
      let step_id = BootstrapStep::Oracle((*symbol).to_string());
      let oracle = self
        .provisioner
        .provision(step)
        .await
        .map_err(BootstrapError::at(step_id.clone()))?;
      log_step(&step_id, &oracle);
      Ok::<_, BootstrapError>(((*symbol).to_string(), oracle))
    }))
    .await?;

    Ok(provisioned.into_iter().collect())
  }
}

fn market_bank<'a>(banks: &'a BTreeMap<String, Provisioned<Bank>>, symbol: &str) -> Result<&'a Bank, Error> {
  banks
    .get(symbol)
    .map(Provisioned::resource)
    .ok_or_else(|| Error::DependencyMissing {
      kind: ResourceKind::Market,
      dependency: ResourceKind::Bank,
      key: symbol.to_string(),
    })
}

fn log_step<R: Resource>(step: &BootstrapStep, provisioned: &Provisioned<R>) {
  info!(
    step = %step,
    address = %provisioned.resource().address(),
    outcome = %provisioned.outcome(),
    "Bootstrap step complete"
  );
}
