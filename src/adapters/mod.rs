//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP JSON-RPC, file I/O). Each sub-module
//! groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `ledger`: In-memory simulated ledger and JSON-RPC ledger client
//! - `keypair`: Signing identities from keypair files
//! - `metrics`: Prometheus registry and textfile export
//! - `persistence`: Atomic JSON bootstrap report and JSONL operation journal

pub mod keypair;
pub mod ledger;
pub mod metrics;
pub mod persistence;
