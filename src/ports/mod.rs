//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `LedgerClient`: Account reads and confirmed transaction submission
//! - `ReportRepository`: Bootstrap report and operation journal persistence

pub mod ledger;
pub mod repository;
