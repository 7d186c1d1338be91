//! Request and response shapes for the query API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BoundingBox, GridSnapshot, ModelRun, PointMetric, RunStatus, Variable};

fn default_point_limit() -> i64 {
    50
}

fn default_list_limit() -> i64 {
    20
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct PointQuery {
    pub lat: f64,
    pub lon: f64,
    pub variable: String,
    #[serde(default)]
    pub lead_hour: Option<u32>,
    #[serde(default = "default_point_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct GridQuery {
    pub variable: String,
    #[serde(default)]
    pub lead_hour: u32,
    #[serde(default)]
    pub init_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotsQuery {
    #[serde(default)]
    pub variable: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub model_name: String,
    #[serde(default)]
    pub init_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub init_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub database: bool,
}

#[derive(Debug, Serialize)]
pub struct RunOut {
    pub id: Uuid,
    pub model_name: String,
    pub init_time: DateTime<Utc>,
    pub forecast_hours: Vec<u32>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

impl From<ModelRun> for RunOut {
    fn from(run: ModelRun) -> Self {
        Self {
            id: run.id,
            model_name: run.model_name,
            init_time: run.init_time,
            forecast_hours: run.forecast_hours,
            status: run.status,
            created_at: run.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PointMetricOut {
    pub variable: Variable,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: u32,
    pub rmse: f64,
    pub bias: f64,
    pub spread: f64,
    pub created_at: DateTime<Utc>,
}

impl From<PointMetric> for PointMetricOut {
    fn from(row: PointMetric) -> Self {
        Self {
            variable: row.variable,
            lat: row.lat,
            lon: row.lon,
            lead_hour: row.lead_hour,
            rmse: row.rmse,
            bias: row.bias,
            spread: row.spread,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryOut {
    pub variable: Variable,
    pub unit: &'static str,
    pub mean_spread: f64,
    pub max_spread: f64,
    pub num_points: i64,
}

#[derive(Debug, Serialize)]
pub struct SnapshotOut {
    pub id: Uuid,
    pub init_time: DateTime<Utc>,
    pub variable: Variable,
    pub lead_hour: u32,
    pub array_handle: String,
    pub bbox: BoundingBox,
    pub created_at: DateTime<Utc>,
}

impl From<GridSnapshot> for SnapshotOut {
    fn from(row: GridSnapshot) -> Self {
        Self {
            id: row.id,
            init_time: row.init_time,
            variable: row.variable,
            lead_hour: row.lead_hour,
            array_handle: row.array_handle,
            bbox: row.bbox,
            created_at: row.created_at,
        }
    }
}

/// A divergence grid with its axes; NaN cells serialize as null.
#[derive(Debug, Serialize)]
pub struct GridDataOut {
    pub variable: Variable,
    pub lead_hour: u32,
    pub init_time: DateTime<Utc>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub values: Vec<Vec<f64>>,
    pub bbox: BoundingBox,
}
