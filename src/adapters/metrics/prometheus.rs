//! Prometheus Metrics Registry - Workflow Observability
//!
//! Counts provisioning outcomes, margin operations, ledger submissions
//! and run results, and times the bootstrap. A run is short-lived, so
//! instead of serving `/metrics` the registry is rendered once to a
//! textfile picked up by node-exporter's textfile collector.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::fs;
use tracing::{info, instrument};

use crate::ports::repository::{BootstrapReport, OperationKind};

/// Prometheus metrics for one workflow run.
///
/// All metrics follow the naming convention `margin_bootstrap_*`.
pub struct WorkflowMetrics {
    registry: Registry,
    /// Provisioned resources by kind and outcome (found/created).
    pub provisions: IntCounterVec,
    /// Margin operations by kind and result (ok/error).
    pub margin_operations: IntCounterVec,
    /// Transactions submitted to the ledger.
    pub ledger_submits: IntCounter,
    /// Wall time of the bootstrap sequence (seconds).
    pub bootstrap_duration: Histogram,
    /// Workflow runs by result (ok/failed).
    pub runs: IntCounterVec,
}

impl WorkflowMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let provisions = IntCounterVec::new(
            Opts::new(
                "margin_bootstrap_provisions_total",
                "Provisioned resources by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;

        let margin_operations = IntCounterVec::new(
            Opts::new(
                "margin_bootstrap_margin_operations_total",
                "Margin operations by kind and result",
            ),
            &["op", "result"],
        )?;

        let ledger_submits = IntCounter::new(
            "margin_bootstrap_ledger_submits_total",
            "Transactions submitted to the ledger",
        )?;

        let bootstrap_duration = Histogram::with_opts(
            HistogramOpts::new(
                "margin_bootstrap_duration_seconds",
                "Wall time of the bootstrap sequence",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        )?;

        let runs = IntCounterVec::new(
            Opts::new("margin_bootstrap_runs_total", "Workflow runs by result"),
            &["result"],
        )?;

        registry.register(Box::new(provisions.clone()))?;
        registry.register(Box::new(margin_operations.clone()))?;
        registry.register(Box::new(ledger_submits.clone()))?;
        registry.register(Box::new(bootstrap_duration.clone()))?;
        registry.register(Box::new(runs.clone()))?;

        Ok(Self {
            registry,
            provisions,
            margin_operations,
            ledger_submits,
            bootstrap_duration,
            runs,
        })
    }

    /// Count every entry of a bootstrap report and its created total as
    /// submissions (one transaction per created resource).
    pub fn record_report(&self, report: &BootstrapReport, elapsed: Duration) {
        for entry in &report.entries {
            self.provisions
                .with_label_values(&[&entry.kind.to_string(), &entry.outcome.to_string()])
                .inc();
        }
        self.ledger_submits.inc_by(report.created_count() as u64);
        self.bootstrap_duration.observe(elapsed.as_secs_f64());
    }

    /// Count one margin operation.
    pub fn record_operation(&self, kind: OperationKind, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.margin_operations
            .with_label_values(&[&kind.to_string(), result])
            .inc();
        if ok {
            self.ledger_submits.inc();
        }
    }

    /// Count one workflow run.
    pub fn record_run(&self, ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        self.runs.with_label_values(&[result]).inc();
    }

    /// Render the registry in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics are not UTF-8")
    }

    /// Write the rendered registry to `path` (tmp → rename).
    #[instrument(skip(self))]
    pub async fn write_textfile(&self, path: &Path) -> Result<()> {
        let text = self.render()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .context("Failed to create metrics directory")?;
        }
        let tmp = path.with_extension("prom.tmp");
        fs::write(&tmp, text)
            .await
            .context("Failed to write metrics textfile")?;
        fs::rename(&tmp, path)
            .await
            .context("Failed to rename metrics textfile")?;
        info!(path = %path.display(), "Metrics exported");
        Ok(())
    }
}
