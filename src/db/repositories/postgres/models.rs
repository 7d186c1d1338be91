use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use super::schema::{grid_snapshots, model_point_values, model_runs, point_metrics};
use crate::db::repository::RepositoryError;
use crate::models::{
    BoundingBox, GridSnapshot, ModelRun, NewGridSnapshot, NewModelPointValue, NewPointMetric,
    PointMetric, RunStatus, Variable,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = model_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RunRow {
    pub id: Uuid,
    pub model_name: String,
    pub init_time: DateTime<Utc>,
    pub forecast_hours: Vec<i32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = model_runs)]
pub struct NewRunRow {
    pub model_name: String,
    pub init_time: DateTime<Utc>,
    pub forecast_hours: Vec<i32>,
    pub status: String,
}

impl TryFrom<RunRow> for ModelRun {
    type Error = RepositoryError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = RunStatus::parse(&row.status).ok_or_else(|| {
            RepositoryError::internal(format!("unknown run status '{}'", row.status))
        })?;
        Ok(ModelRun {
            id: row.id,
            model_name: row.model_name,
            init_time: row.init_time,
            forecast_hours: row.forecast_hours.into_iter().map(|h| h as u32).collect(),
            status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = point_metrics)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PointMetricRow {
    pub id: Uuid,
    pub run_a_id: Uuid,
    pub run_b_id: Uuid,
    pub variable: String,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: i32,
    pub rmse: f64,
    pub bias: f64,
    pub spread: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = point_metrics)]
pub struct NewPointMetricRow {
    pub run_a_id: Uuid,
    pub run_b_id: Uuid,
    pub variable: String,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: i32,
    pub rmse: f64,
    pub bias: f64,
    pub spread: f64,
}

impl From<&NewPointMetric> for NewPointMetricRow {
    fn from(row: &NewPointMetric) -> Self {
        Self {
            run_a_id: row.run_a_id,
            run_b_id: row.run_b_id,
            variable: row.variable.as_str().to_string(),
            lat: row.lat,
            lon: row.lon,
            lead_hour: row.lead_hour as i32,
            rmse: row.rmse,
            bias: row.bias,
            spread: row.spread,
        }
    }
}

impl TryFrom<PointMetricRow> for PointMetric {
    type Error = RepositoryError;

    fn try_from(row: PointMetricRow) -> Result<Self, Self::Error> {
        let variable = row.variable.parse::<Variable>().map_err(|e| {
            RepositoryError::internal(format!("point metric {}: {}", row.id, e))
        })?;
        Ok(PointMetric {
            id: row.id,
            run_a_id: row.run_a_id,
            run_b_id: row.run_b_id,
            variable,
            lat: row.lat,
            lon: row.lon,
            lead_hour: row.lead_hour as u32,
            rmse: row.rmse,
            bias: row.bias,
            spread: row.spread,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = model_point_values)]
pub struct NewModelPointValueRow {
    pub run_id: Uuid,
    pub variable: String,
    pub lat: f64,
    pub lon: f64,
    pub lead_hour: i32,
    pub value: f64,
}

impl From<&NewModelPointValue> for NewModelPointValueRow {
    fn from(row: &NewModelPointValue) -> Self {
        Self {
            run_id: row.run_id,
            variable: row.variable.as_str().to_string(),
            lat: row.lat,
            lon: row.lon,
            lead_hour: row.lead_hour as i32,
            value: row.value,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = grid_snapshots)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct GridSnapshotRow {
    pub id: Uuid,
    pub init_time: DateTime<Utc>,
    pub variable: String,
    pub lead_hour: i32,
    pub array_handle: String,
    pub bbox: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = grid_snapshots)]
pub struct NewGridSnapshotRow {
    pub init_time: DateTime<Utc>,
    pub variable: String,
    pub lead_hour: i32,
    pub array_handle: String,
    pub bbox: Value,
}

impl TryFrom<&NewGridSnapshot> for NewGridSnapshotRow {
    type Error = RepositoryError;

    fn try_from(row: &NewGridSnapshot) -> Result<Self, Self::Error> {
        let bbox = serde_json::to_value(row.bbox)
            .map_err(|e| RepositoryError::internal(format!("bbox serialization: {}", e)))?;
        Ok(Self {
            init_time: row.init_time,
            variable: row.variable.as_str().to_string(),
            lead_hour: row.lead_hour as i32,
            array_handle: row.array_handle.clone(),
            bbox,
        })
    }
}

impl TryFrom<GridSnapshotRow> for GridSnapshot {
    type Error = RepositoryError;

    fn try_from(row: GridSnapshotRow) -> Result<Self, Self::Error> {
        let variable = row.variable.parse::<Variable>().map_err(|e| {
            RepositoryError::internal(format!("grid snapshot {}: {}", row.id, e))
        })?;
        let bbox: BoundingBox = serde_json::from_value(row.bbox)
            .map_err(|e| RepositoryError::internal(format!("bbox deserialization: {}", e)))?;
        Ok(GridSnapshot {
            id: row.id,
            init_time: row.init_time,
            variable,
            lead_hour: row.lead_hour as u32,
            array_handle: row.array_handle,
            bbox,
            created_at: row.created_at,
        })
    }
}
