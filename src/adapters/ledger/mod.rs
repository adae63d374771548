//! Ledger Adapters - LedgerClient Implementations
//!
//! - `memory`: in-process ledger running the simulated margin program
//!   (dry runs, tests, benches)
//! - `rpc`: JSON-RPC client for a live ledger node

pub mod auth;
pub mod memory;
pub mod program;
pub mod rpc;

pub use memory::{Fault, InMemoryLedger};
pub use program::TokenAccount;
pub use rpc::{RpcLedger, RpcLedgerConfig};
