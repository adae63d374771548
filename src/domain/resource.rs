//! Provisioned resource snapshots.
//!
//! Each struct is the client-side view of one on-ledger account kind.
//! Snapshots are what the locator returns on a hit and what the creator
//! reads back after a confirmed creation.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identity::LedgerIdentity;

/// Compact per-group index of a bank's asset.
pub type TokenIndex = u16;

/// Compact per-group index of a spot market.
pub type MarketIndex = u16;

/// Kinds of resources the workflow provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Group,
    Oracle,
    Bank,
    MarginAccount,
    Market,
    OpenOrders,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Group => "group",
            Self::Oracle => "oracle",
            Self::Bank => "bank",
            Self::MarginAccount => "margin_account",
            Self::Market => "market",
            Self::OpenOrders => "open_orders",
        };
        f.write_str(name)
    }
}

/// Root namespace owned by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub address: LedgerIdentity,
    pub admin: LedgerIdentity,
    pub group_num: u32,
}

/// Stub price feed scoped to (group, mint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oracle {
    pub address: LedgerIdentity,
    pub group: LedgerIdentity,
    pub mint: LedgerIdentity,
    /// Quote native units per base native unit.
    pub price: Decimal,
}

/// Asset-accounting account scoped to (group, mint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    pub address: LedgerIdentity,
    pub group: LedgerIdentity,
    pub mint: LedgerIdentity,
    pub oracle: LedgerIdentity,
    /// Custody token account owned by the bank.
    pub vault: LedgerIdentity,
    pub token_index: TokenIndex,
    pub decimals: u8,
    /// Sum of all positive positions, in native units.
    pub native_deposits: u64,
    /// Sum of all negative positions, in native units.
    pub native_borrows: u64,
}

/// A margin account's balance in one bank.
///
/// Positive `native` is a deposit, negative is a borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub token_index: TokenIndex,
    pub native: i64,
}

impl TokenPosition {
    /// Deposited amount (zero when borrowing).
    pub fn deposit(&self) -> u64 {
        u64::try_from(self.native.max(0)).unwrap_or(0)
    }

    /// Borrowed amount (zero when depositing).
    pub fn borrow(&self) -> u64 {
        self.native.min(0).unsigned_abs()
    }
}

/// Open orders registered on a margin account for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrdersSlot {
    pub market_index: MarketIndex,
    pub open_orders: LedgerIdentity,
}

/// Per-user position ledger scoped to (group, owner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginAccount {
    pub address: LedgerIdentity,
    pub group: LedgerIdentity,
    pub owner: LedgerIdentity,
    pub account_num: u32,
    pub name: String,
    pub tokens: Vec<TokenPosition>,
    pub open_orders: Vec<OpenOrdersSlot>,
}

impl MarginAccount {
    /// Position for `token_index`, if the account ever touched that bank.
    pub fn position(&self, token_index: TokenIndex) -> Option<&TokenPosition> {
        self.tokens.iter().find(|p| p.token_index == token_index)
    }

    /// Native deposit held for the given bank.
    pub fn native_deposit(&self, bank: &Bank) -> u64 {
        self.position(bank.token_index)
            .map_or(0, TokenPosition::deposit)
    }

    /// Native borrow owed to the given bank.
    pub fn native_borrow(&self, bank: &Bank) -> u64 {
        self.position(bank.token_index)
            .map_or(0, TokenPosition::borrow)
    }

    /// Whether every position is zero and no open orders are registered.
    pub fn is_empty(&self) -> bool {
        self.tokens.iter().all(|p| p.native == 0) && self.open_orders.is_empty()
    }
}

/// Spot order-book registration scoped to (group, base bank, quote bank).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub address: LedgerIdentity,
    pub group: LedgerIdentity,
    pub base_bank: LedgerIdentity,
    pub quote_bank: LedgerIdentity,
    pub base_token_index: TokenIndex,
    pub quote_token_index: TokenIndex,
    pub market_index: MarketIndex,
    /// External order-book program.
    pub program: LedgerIdentity,
    /// Market address inside the external order-book program.
    pub external_market: LedgerIdentity,
}

/// Per-(margin account, market) order-book sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrders {
    pub address: LedgerIdentity,
    pub group: LedgerIdentity,
    pub account: LedgerIdentity,
    pub market: LedgerIdentity,
    pub owner: LedgerIdentity,
}

/// Account owned by some other program (e.g. an external price feed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAccount {
    pub address: LedgerIdentity,
}

/// Decoded state of any account the workflow reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountState {
    Group(Group),
    Oracle(Oracle),
    Bank(Bank),
    MarginAccount(MarginAccount),
    Market(Market),
    OpenOrders(OpenOrders),
    External(ExternalAccount),
}

impl AccountState {
    /// Address of the account.
    pub fn address(&self) -> LedgerIdentity {
        match self {
            Self::Group(g) => g.address,
            Self::Oracle(o) => o.address,
            Self::Bank(b) => b.address,
            Self::MarginAccount(a) => a.address,
            Self::Market(m) => m.address,
            Self::OpenOrders(o) => o.address,
            Self::External(e) => e.address,
        }
    }

    /// Resource kind, `None` for external accounts.
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Self::Group(_) => Some(ResourceKind::Group),
            Self::Oracle(_) => Some(ResourceKind::Oracle),
            Self::Bank(_) => Some(ResourceKind::Bank),
            Self::MarginAccount(_) => Some(ResourceKind::MarginAccount),
            Self::Market(_) => Some(ResourceKind::Market),
            Self::OpenOrders(_) => Some(ResourceKind::OpenOrders),
            Self::External(_) => None,
        }
    }

    /// Group the account is scoped to (the group itself for groups).
    pub fn group(&self) -> Option<LedgerIdentity> {
        match self {
            Self::Group(g) => Some(g.address),
            Self::Oracle(o) => Some(o.group),
            Self::Bank(b) => Some(b.group),
            Self::MarginAccount(a) => Some(a.group),
            Self::Market(m) => Some(m.group),
            Self::OpenOrders(o) => Some(o.group),
            Self::External(_) => None,
        }
    }

    /// Whether the account satisfies `filter`.
    ///
    /// A filter on a field the kind does not have never matches.
    pub fn matches(&self, filter: &AccountFilter) -> bool {
        match (filter, self) {
            (AccountFilter::Admin(admin), Self::Group(g)) => g.admin == *admin,
            (AccountFilter::Group(group), state) => state.group() == Some(*group),
            (AccountFilter::Mint(mint), Self::Oracle(o)) => o.mint == *mint,
            (AccountFilter::Mint(mint), Self::Bank(b)) => b.mint == *mint,
            (AccountFilter::Owner(owner), Self::MarginAccount(a)) => a.owner == *owner,
            (AccountFilter::Owner(owner), Self::OpenOrders(o)) => o.owner == *owner,
            (AccountFilter::TokenIndexPair { base, quote }, Self::Market(m)) => {
                m.base_token_index == *base && m.quote_token_index == *quote
            }
            (AccountFilter::MarginAccount(account), Self::OpenOrders(o)) => o.account == *account,
            (AccountFilter::Market(market), Self::OpenOrders(o)) => o.market == *market,
            _ => false,
        }
    }
}

/// Field filter applied when listing accounts of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountFilter {
    Admin(LedgerIdentity),
    Group(LedgerIdentity),
    Mint(LedgerIdentity),
    Owner(LedgerIdentity),
    TokenIndexPair { base: TokenIndex, quote: TokenIndex },
    MarginAccount(LedgerIdentity),
    Market(LedgerIdentity),
}

/// Lookup key that determines at most one resource of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Group {
        admin: LedgerIdentity,
    },
    Oracle {
        group: LedgerIdentity,
        mint: LedgerIdentity,
    },
    Bank {
        group: LedgerIdentity,
        mint: LedgerIdentity,
    },
    MarginAccount {
        group: LedgerIdentity,
        owner: LedgerIdentity,
    },
    Market {
        group: LedgerIdentity,
        base_token_index: TokenIndex,
        quote_token_index: TokenIndex,
    },
    OpenOrders {
        account: LedgerIdentity,
        market: LedgerIdentity,
    },
}

impl ScopeKey {
    /// Kind of resource this key selects.
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Group { .. } => ResourceKind::Group,
            Self::Oracle { .. } => ResourceKind::Oracle,
            Self::Bank { .. } => ResourceKind::Bank,
            Self::MarginAccount { .. } => ResourceKind::MarginAccount,
            Self::Market { .. } => ResourceKind::Market,
            Self::OpenOrders { .. } => ResourceKind::OpenOrders,
        }
    }

    /// Filters that select the resource when listing accounts of [`Self::kind`].
    pub fn filters(&self) -> Vec<AccountFilter> {
        match *self {
            Self::Group { admin } => vec![AccountFilter::Admin(admin)],
            Self::Oracle { group, mint } | Self::Bank { group, mint } => {
                vec![AccountFilter::Group(group), AccountFilter::Mint(mint)]
            }
            Self::MarginAccount { group, owner } => {
                vec![AccountFilter::Group(group), AccountFilter::Owner(owner)]
            }
            Self::Market {
                group,
                base_token_index,
                quote_token_index,
            } => vec![
                AccountFilter::Group(group),
                AccountFilter::TokenIndexPair {
                    base: base_token_index,
                    quote: quote_token_index,
                },
            ],
            Self::OpenOrders { account, market } => vec![
                AccountFilter::MarginAccount(account),
                AccountFilter::Market(market),
            ],
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group { admin } => write!(f, "group(admin={admin})"),
            Self::Oracle { group, mint } => write!(f, "oracle(group={group}, mint={mint})"),
            Self::Bank { group, mint } => write!(f, "bank(group={group}, mint={mint})"),
            Self::MarginAccount { group, owner } => {
                write!(f, "margin_account(group={group}, owner={owner})")
            }
            Self::Market {
                group,
                base_token_index,
                quote_token_index,
            } => write!(
                f,
                "market(group={group}, base={base_token_index}, quote={quote_token_index})"
            ),
            Self::OpenOrders { account, market } => {
                write!(f, "open_orders(account={account}, market={market})")
            }
        }
    }
}

/// A typed resource snapshot decodable from [`AccountState`].
pub trait Resource: Clone + Send + Sync + 'static {
    /// Kind of the resource.
    const KIND: ResourceKind;

    /// Address of the account.
    fn address(&self) -> LedgerIdentity;

    /// Decode from account state, `None` if the state is another kind.
    fn from_state(state: AccountState) -> Option<Self>;
}

macro_rules! impl_resource {
    ($ty:ident, $kind:ident) => {
        impl Resource for $ty {
            const KIND: ResourceKind = ResourceKind::$kind;

            fn address(&self) -> LedgerIdentity {
                self.address
            }

            fn from_state(state: AccountState) -> Option<Self> {
                match state {
                    AccountState::$kind(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_resource!(Group, Group);
impl_resource!(Oracle, Oracle);
impl_resource!(Bank, Bank);
impl_resource!(MarginAccount, MarginAccount);
impl_resource!(Market, Market);
impl_resource!(OpenOrders, OpenOrders);

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> LedgerIdentity {
        LedgerIdentity::new([byte; 32])
    }

    fn bank(group: u8, mint: u8, token_index: TokenIndex) -> Bank {
        Bank {
            address: id(100 + token_index as u8),
            group: id(group),
            mint: id(mint),
            oracle: id(50),
            vault: id(60),
            token_index,
            decimals: 6,
            native_deposits: 0,
            native_borrows: 0,
        }
    }

    #[test]
    fn test_scope_filters_select_only_matching_bank() {
        let key = ScopeKey::Bank {
            group: id(1),
            mint: id(2),
        };
        let matching = AccountState::Bank(bank(1, 2, 0));
        let other_group = AccountState::Bank(bank(3, 2, 0));
        let other_mint = AccountState::Bank(bank(1, 4, 1));

        let filters = key.filters();
        assert!(filters.iter().all(|f| matching.matches(f)));
        assert!(!filters.iter().all(|f| other_group.matches(f)));
        assert!(!filters.iter().all(|f| other_mint.matches(f)));
    }

    #[test]
    fn test_filter_on_missing_field_never_matches() {
        let group = AccountState::Group(Group {
            address: id(1),
            admin: id(2),
            group_num: 0,
        });
        assert!(!group.matches(&AccountFilter::Mint(id(2))));
        assert!(group.matches(&AccountFilter::Admin(id(2))));
        assert!(group.matches(&AccountFilter::Group(id(1))));
    }

    #[test]
    fn test_position_deposit_and_borrow_split() {
        let long = TokenPosition {
            token_index: 0,
            native: 700,
        };
        let short = TokenPosition {
            token_index: 0,
            native: -250,
        };
        assert_eq!((long.deposit(), long.borrow()), (700, 0));
        assert_eq!((short.deposit(), short.borrow()), (0, 250));
    }

    #[test]
    fn test_typed_decode_rejects_other_kinds() {
        let state = AccountState::Bank(bank(1, 2, 0));
        assert!(Bank::from_state(state.clone()).is_some());
        assert!(Group::from_state(state.clone()).is_none());
        assert_eq!(state.kind(), Some(ResourceKind::Bank));
    }

    #[test]
    fn test_account_state_serializes_with_kind_tag() {
        let state = AccountState::External(ExternalAccount { address: id(7) });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["kind"], "external");
        let back: AccountState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
