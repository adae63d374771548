//! Use Cases Layer - Provisioning and Margin Workflows
//!
//! Orchestrates domain types with the ledger port to implement the
//! bootstrap workflow. Every use case receives its ledger client
//! explicitly; none of them hold global state.
//!
//! Use cases:
//! - `Locator`: Find existing resources by scope key
//! - `Creator`: Submit creation transactions and read them back
//! - `Provisioner`: Idempotent find-or-create over typed steps
//! - `Bootstrap`: Dependency-ordered provisioning of a full plan
//! - `MarginExecutor`: Deposit, withdraw, and confirmed closure

pub mod bootstrap;
pub mod creator;
pub mod locator;
pub mod margin;
pub mod provisioner;
pub mod steps;

pub use bootstrap::{
  AccountPlan, AssetPlan, Bootstrap, BootstrapError, BootstrapOutcome, BootstrapPlan,
  BootstrapSigners, BootstrapStep, MarketPlan, OracleSource,
};
pub use creator::Creator;
pub use locator::Locator;
pub use margin::{BalanceSnapshot, MarginExecutor, MarginOpResult, ZeroBalances};
pub use provisioner::{ProvisionStep, Provisioned, Provisioner};
