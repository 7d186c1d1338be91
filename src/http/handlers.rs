//! Request handlers for the query API.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use tokio::task;

use crate::db::repository::{MetricRepository, RunRepository, SnapshotRepository};
use crate::models::{Field, PointMetricQuery, Variable};

use super::dto::*;
use super::error::AppError;
use super::state::AppState;

fn parse_variable(raw: &str) -> Result<Variable, AppError> {
    raw.parse::<Variable>().map_err(AppError::BadRequest)
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthOut> {
    let database = state.repository.health_check().await.unwrap_or(false);
    Json(HealthOut {
        status: "ok",
        database,
    })
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunOut>>, AppError> {
    let runs = state.repository.list_runs(query.limit.clamp(1, 200)).await?;
    Ok(Json(runs.into_iter().map(RunOut::from).collect()))
}

pub async fn get_point_divergence(
    State(state): State<AppState>,
    Query(query): Query<PointQuery>,
) -> Result<Json<Vec<PointMetricOut>>, AppError> {
    let variable = parse_variable(&query.variable)?;
    let rows = state
        .repository
        .point_metrics_near(&PointMetricQuery {
            variable,
            lat: query.lat,
            lon: query.lon,
            lead_hour: query.lead_hour,
            limit: query.limit.clamp(1, 200),
        })
        .await?;
    Ok(Json(rows.into_iter().map(PointMetricOut::from).collect()))
}

pub async fn get_divergence_summary(
    State(state): State<AppState>,
) -> Result<Json<Vec<SummaryOut>>, AppError> {
    let mut summaries = Vec::new();
    for variable in Variable::ALL {
        if let Some(summary) = state.repository.variable_summary(variable).await? {
            summaries.push(SummaryOut {
                variable: summary.variable,
                unit: summary.variable.unit(),
                mean_spread: summary.mean_spread,
                max_spread: summary.max_spread,
                num_points: summary.num_points,
            });
        }
    }
    Ok(Json(summaries))
}

pub async fn get_grid_divergence(
    State(state): State<AppState>,
    Query(query): Query<GridQuery>,
) -> Result<Json<GridDataOut>, AppError> {
    let variable = parse_variable(&query.variable)?;
    let snapshot = state
        .repository
        .latest_snapshot(variable, query.lead_hour, query.init_time)
        .await?
        .ok_or_else(|| AppError::NotFound("no grid divergence data found".to_string()))?;

    let store = Arc::clone(&state.store);
    let handle = snapshot.array_handle.clone();
    let field = task::spawn_blocking(move || store.get(&handle))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let (latitudes, longitudes, values) = match field {
        Field::Regular { lat, lon, values } => (
            lat.to_vec(),
            lon.to_vec(),
            values.outer_iter().map(|row| row.to_vec()).collect(),
        ),
        Field::Projected { .. } => {
            return Err(AppError::Internal(
                "divergence snapshot is not on a regular grid".to_string(),
            ))
        }
    };

    Ok(Json(GridDataOut {
        variable: snapshot.variable,
        lead_hour: snapshot.lead_hour,
        init_time: snapshot.init_time,
        latitudes,
        longitudes,
        values,
        bbox: snapshot.bbox,
    }))
}

pub async fn list_grid_snapshots(
    State(state): State<AppState>,
    Query(query): Query<SnapshotsQuery>,
) -> Result<Json<Vec<SnapshotOut>>, AppError> {
    let variable = query
        .variable
        .as_deref()
        .map(parse_variable)
        .transpose()?;
    let rows = state
        .repository
        .list_snapshots(variable, query.limit.clamp(1, 100))
        .await?;
    Ok(Json(rows.into_iter().map(SnapshotOut::from).collect()))
}

/// In-process ingestion trigger; returns the terminal run row.
pub async fn trigger_ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<RunOut>, AppError> {
    let run = state
        .orchestrator
        .ingest_and_process(&request.model_name, request.init_time)
        .await?;
    Ok(Json(run.into()))
}

/// Remove a cycle's runs, metrics, snapshot rows and array objects.
pub async fn reset_cycle(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.orchestrator.reset_cycle(request.init_time).await?;
    Ok(Json(serde_json::json!({ "reset": request.init_time })))
}
