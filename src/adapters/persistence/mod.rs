//! Persistence Adapters - File Storage for Run Artifacts
//!
//! Implements the `ReportRepository` port with an atomic JSON snapshot
//! of the latest bootstrap report and an append-only JSONL journal of
//! margin operations. No database dependency.

pub mod journal;
pub mod report;
pub mod repository_impl;

pub use journal::OperationJournal;
pub use report::ReportStore;
pub use repository_impl::FileRepository;
