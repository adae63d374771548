//! Repository Implementation - File-backed ReportRepository
//!
//! Wraps `ReportStore` (atomic JSON report) and `OperationJournal`
//! (JSONL append-only journal) behind the `ReportRepository` port.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::journal::OperationJournal;
use super::report::ReportStore;
use crate::ports::repository::{BootstrapReport, OperationRecord, ReportRepository};

/// File-backed report repository.
pub struct FileRepository {
    reports: ReportStore,
    journal: OperationJournal,
}

impl FileRepository {
    pub fn new(reports: ReportStore, journal: OperationJournal) -> Self {
        Self { reports, journal }
    }

    /// Create both stores in `data_dir`.
    pub async fn from_data_dir(data_dir: impl AsRef<Path>) -> Result<Self> {
        let reports = ReportStore::new(data_dir.as_ref()).await?;
        let journal = OperationJournal::new(data_dir.as_ref()).await?;
        Ok(Self::new(reports, journal))
    }
}

#[async_trait]
impl ReportRepository for FileRepository {
    async fn save_report(&self, report: &BootstrapReport) -> Result<()> {
        self.reports.save(report).await
    }

    async fn load_latest_report(&self) -> Result<Option<BootstrapReport>> {
        self.reports.load().await
    }

    async fn append_operation(&self, record: &OperationRecord) -> Result<()> {
        self.journal.append(record).await
    }

    async fn load_operations(&self) -> Result<Vec<OperationRecord>> {
        self.journal.load_all().await
    }

    async fn is_healthy(&self) -> bool {
        self.reports.is_healthy().await && self.journal.is_healthy().await
    }
}
