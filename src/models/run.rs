//! Relational row types owned by the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::field::BoundingBox;
use super::variable::Variable;

/// Lifecycle state of a [`ModelRun`].
///
/// A run is created `Pending`, transitions exactly once to `Complete` or
/// `Error`, and is never mutated thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Complete,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "complete" => Some(RunStatus::Complete),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

/// One ingestion of one model at one initialization time.
///
/// Uniqueness invariant: at most one non-`Error` row exists per
/// `(model_name, init_time)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRun {
    pub id: Uuid,
    /// Canonical short name, uppercase (e.g. "GFS").
    pub model_name: String,
    /// Cycle initialization instant, UTC.
    pub init_time: DateTime<Utc>,
    /// Lead hours actually ingested, strictly ascending, multiples of 6.
    pub forecast_hours: Vec<u32>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

/// Pairwise divergence metrics at one monitor point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointMetric {
    pub id: Uuid,
    pub run_a_id: Uuid,
    pub run_b_id: Uuid,
    pub variable: Variable,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: u32,
    pub rmse: f64,
    pub bias: f64,
    /// Ensemble-level sample std-dev, duplicated on every pair row for the
    /// same (variable, point, lead_hour).
    pub spread: f64,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for [`PointMetric`].
#[derive(Debug, Clone)]
pub struct NewPointMetric {
    pub run_a_id: Uuid,
    pub run_b_id: Uuid,
    pub variable: Variable,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: u32,
    pub rmse: f64,
    pub bias: f64,
    pub spread: f64,
}

/// Raw per-model value at a monitor point, stored during primary ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPointValue {
    pub id: Uuid,
    pub run_id: Uuid,
    pub variable: Variable,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: u32,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for [`ModelPointValue`].
#[derive(Debug, Clone)]
pub struct NewModelPointValue {
    pub run_id: Uuid,
    pub variable: Variable,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: u32,
    pub value: f64,
}

/// Catalog entry pointing at one persisted divergence field in the array
/// store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub id: Uuid,
    pub init_time: DateTime<Utc>,
    pub variable: Variable,
    pub lead_hour: u32,
    /// Opaque handle the array store resolves to bytes.
    pub array_handle: String,
    pub bbox: BoundingBox,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for [`GridSnapshot`].
#[derive(Debug, Clone)]
pub struct NewGridSnapshot {
    pub init_time: DateTime<Utc>,
    pub variable: Variable,
    pub lead_hour: u32,
    pub array_handle: String,
    pub bbox: BoundingBox,
}

/// Proximity query over point metrics, newest first.
///
/// The proximity filter is `|lat - q.lat| <= 0.5 && |lon - q.lon| <= 0.5`.
#[derive(Debug, Clone)]
pub struct PointMetricQuery {
    pub variable: Variable,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: Option<u32>,
    pub limit: i64,
}

/// Aggregate spread statistics for one variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSummary {
    pub variable: Variable,
    pub mean_spread: f64,
    pub max_spread: f64,
    pub num_points: i64,
}
