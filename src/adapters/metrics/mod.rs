//! Metrics Adapters
//!
//! Prometheus registry for the provisioning workflow, exported in text
//! format to a node-exporter textfile at the end of a run.

pub mod prometheus;

pub use prometheus::WorkflowMetrics;
