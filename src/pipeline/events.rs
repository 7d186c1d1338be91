//! Post-ingest hook seam.
//!
//! The orchestrator emits one [`IngestEvent`] per completed run; hooks are
//! optional observers and never influence the run's outcome.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{ModelRun, Variable};

/// Completion event: the terminal run plus a summary of what was persisted.
#[derive(Debug, Clone)]
pub struct IngestEvent {
    pub run: ModelRun,
    pub point_metric_rows: usize,
    pub snapshot_rows: usize,
    /// Per-(lead_hour, variable) failures that were contained and logged.
    pub partial_failures: usize,
    /// Maximum ensemble spread observed per variable across all monitor
    /// points and lead hours of this ingest.
    pub max_spread: BTreeMap<Variable, f64>,
}

/// Observer invoked after a run reaches `complete`.
#[async_trait]
pub trait PostIngestHook: Send + Sync {
    async fn on_run_complete(&self, event: &IngestEvent);
}

/// Baseline hook: one structured log line per completed run.
pub struct LogHook;

#[async_trait]
impl PostIngestHook for LogHook {
    async fn on_run_complete(&self, event: &IngestEvent) {
        info!(
            model = %event.run.model_name,
            init_time = %event.run.init_time,
            hours = event.run.forecast_hours.len(),
            point_metrics = event.point_metric_rows,
            snapshots = event.snapshot_rows,
            partial_failures = event.partial_failures,
            "ingest complete"
        );
    }
}

/// Warn when the observed ensemble spread for a variable crosses its
/// configured threshold.
pub struct SpreadAlertHook {
    thresholds: BTreeMap<Variable, f64>,
}

impl SpreadAlertHook {
    pub fn new(thresholds: BTreeMap<Variable, f64>) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl PostIngestHook for SpreadAlertHook {
    async fn on_run_complete(&self, event: &IngestEvent) {
        for (variable, threshold) in &self.thresholds {
            if let Some(observed) = event.max_spread.get(variable) {
                if observed > threshold {
                    warn!(
                        model = %event.run.model_name,
                        init_time = %event.run.init_time,
                        variable = %variable,
                        observed,
                        threshold,
                        "ensemble spread above alert threshold"
                    );
                }
            }
        }
    }
}
