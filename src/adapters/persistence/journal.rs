//! Operation Journal - Append-only JSONL Margin Operations
//!
//! Each deposit, withdraw and closure is appended to
//! `operations.jsonl` as one self-contained JSON line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};

use crate::ports::repository::OperationRecord;

/// Append-only JSONL journal of margin operations.
pub struct OperationJournal {
    path: PathBuf,
}

impl OperationJournal {
    /// Create a journal in the given data directory.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir)
            .await
            .context("Failed to create data directory")?;
        Ok(Self {
            path: dir.join("operations.jsonl"),
        })
    }

    /// Append one record.
    #[instrument(skip(self, record), fields(id = %record.id, kind = %record.kind))]
    pub async fn append(&self, record: &OperationRecord) -> Result<()> {
        let mut json = serde_json::to_string(record).context("Failed to serialize operation")?;
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context("Failed to open operation journal")?;
        file.write_all(json.as_bytes())
            .await
            .context("Failed to write operation")?;
        file.flush().await.context("Failed to flush operation journal")?;
        Ok(())
    }

    /// Load every record in append order. Malformed lines are skipped.
    pub async fn load_all(&self) -> Result<Vec<OperationRecord>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .context("Failed to read operation journal")?;

        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<OperationRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping malformed operation record"),
            }
        }
        Ok(records)
    }

    /// Whether the journal directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let Some(dir) = self.path.parent() else {
            return false;
        };
        let marker = dir.join(".health_check");
        let result = fs::write(&marker, b"ok").await;
        let _ = fs::remove_file(&marker).await;
        result.is_ok()
    }
}
