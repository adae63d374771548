//! Instructions understood by the margin program.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identity::LedgerIdentity;
use super::resource::{MarketIndex, ResourceKind, TokenIndex};

/// A single program instruction.
///
/// Account addresses of created resources are not carried: the program
/// derives them from the instruction's scope fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    CreateGroup {
        admin: LedgerIdentity,
        group_num: u32,
    },
    CreateStubOracle {
        group: LedgerIdentity,
        admin: LedgerIdentity,
        mint: LedgerIdentity,
        price: Decimal,
    },
    RegisterToken {
        group: LedgerIdentity,
        admin: LedgerIdentity,
        mint: LedgerIdentity,
        oracle: LedgerIdentity,
        token_index: TokenIndex,
        decimals: u8,
    },
    CreateMarginAccount {
        group: LedgerIdentity,
        owner: LedgerIdentity,
        account_num: u32,
        name: String,
    },
    RegisterSpotMarket {
        group: LedgerIdentity,
        admin: LedgerIdentity,
        program: LedgerIdentity,
        external_market: LedgerIdentity,
        base_bank: LedgerIdentity,
        quote_bank: LedgerIdentity,
        market_index: MarketIndex,
    },
    CreateOpenOrders {
        group: LedgerIdentity,
        account: LedgerIdentity,
        market: LedgerIdentity,
        owner: LedgerIdentity,
    },
    Deposit {
        group: LedgerIdentity,
        account: LedgerIdentity,
        bank: LedgerIdentity,
        token_account: LedgerIdentity,
        owner: LedgerIdentity,
        amount: u64,
    },
    Withdraw {
        group: LedgerIdentity,
        account: LedgerIdentity,
        bank: LedgerIdentity,
        token_account: LedgerIdentity,
        owner: LedgerIdentity,
        amount: u64,
        allow_borrow: bool,
    },
    CloseMarginAccount {
        group: LedgerIdentity,
        account: LedgerIdentity,
        owner: LedgerIdentity,
    },
}

impl Instruction {
    /// Identity whose signature authorizes the instruction.
    pub fn authority(&self) -> LedgerIdentity {
        match self {
            Self::CreateGroup { admin, .. }
            | Self::CreateStubOracle { admin, .. }
            | Self::RegisterToken { admin, .. }
            | Self::RegisterSpotMarket { admin, .. } => *admin,
            Self::CreateMarginAccount { owner, .. }
            | Self::CreateOpenOrders { owner, .. }
            | Self::Deposit { owner, .. }
            | Self::Withdraw { owner, .. }
            | Self::CloseMarginAccount { owner, .. } => *owner,
        }
    }

    /// Kind of resource the instruction creates, if any.
    pub fn creates(&self) -> Option<ResourceKind> {
        match self {
            Self::CreateGroup { .. } => Some(ResourceKind::Group),
            Self::CreateStubOracle { .. } => Some(ResourceKind::Oracle),
            Self::RegisterToken { .. } => Some(ResourceKind::Bank),
            Self::CreateMarginAccount { .. } => Some(ResourceKind::MarginAccount),
            Self::RegisterSpotMarket { .. } => Some(ResourceKind::Market),
            Self::CreateOpenOrders { .. } => Some(ResourceKind::OpenOrders),
            Self::Deposit { .. } | Self::Withdraw { .. } | Self::CloseMarginAccount { .. } => None,
        }
    }
}
