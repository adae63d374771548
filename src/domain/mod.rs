//! Domain layer - Ledger identities, resources, and transactions.
//!
//! Pure types with no I/O (hexagonal architecture inner ring).
//! Everything here is serializable and testable in isolation.

pub mod amount;
pub mod identity;
pub mod instruction;
pub mod resource;
pub mod signer;
pub mod transaction;

// Re-export core types for convenience
pub use identity::{LedgerIdentity, ParseIdentityError};
pub use instruction::Instruction;
pub use resource::{
    AccountFilter, AccountState, Bank, ExternalAccount, Group, MarginAccount, Market,
    MarketIndex, OpenOrders, OpenOrdersSlot, Oracle, Resource, ResourceKind, ScopeKey,
    TokenIndex, TokenPosition,
};
pub use signer::{Keypair, SignatureBytes, SigningError};
pub use transaction::{SignedTransaction, Transaction, TxReceipt, TxSignature};
