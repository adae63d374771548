//! Report Store - Atomic JSON Bootstrap Report
//!
//! Saves the latest bootstrap report to `bootstrap_report.json` using
//! atomic writes (write to tmp file, then rename), so a crash leaves
//! either the previous report or the new one, never a partial file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, instrument};

use crate::ports::repository::BootstrapReport;

/// Atomic JSON store for the latest bootstrap report.
pub struct ReportStore {
    report_path: PathBuf,
    tmp_path: PathBuf,
}

impl ReportStore {
    /// Create a report store in the given data directory.
    ///
    /// Creates the directory if it doesn't exist.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .context("Failed to create data directory")?;

        Ok(Self {
            report_path: dir.join("bootstrap_report.json"),
            tmp_path: dir.join("bootstrap_report.json.tmp"),
        })
    }

    /// Save a report atomically (tmp → rename).
    #[instrument(skip(self, report))]
    pub async fn save(&self, report: &BootstrapReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp report file")?;
        fs::rename(&self.tmp_path, &self.report_path)
            .await
            .context("Failed to rename report file")?;

        info!(
            path = %self.report_path.display(),
            entries = report.entries.len(),
            created = report.created_count(),
            "Bootstrap report saved"
        );
        Ok(())
    }

    /// Load the latest report, `None` before the first run.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<BootstrapReport>> {
        if !fs::try_exists(&self.report_path).await.unwrap_or(false) {
            return Ok(None);
        }

        let json = fs::read_to_string(&self.report_path)
            .await
            .context("Failed to read report file")?;
        let report: BootstrapReport =
            serde_json::from_str(&json).context("Failed to parse report JSON")?;
        Ok(Some(report))
    }

    /// Whether the report file, if present, is readable.
    pub async fn is_healthy(&self) -> bool {
        if !fs::try_exists(&self.report_path).await.unwrap_or(false) {
            return true;
        }
        fs::metadata(&self.report_path).await.is_ok()
    }
}
