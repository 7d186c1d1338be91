//! In-memory repository.
//!
//! Used by the test suites and by local runs without a database. Enforces
//! the same invariants the Postgres schema enforces, in particular the
//! single-non-error-run uniqueness, under one write lock so the probe and
//! the insert are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::db::repository::{
    MetricRepository, RepositoryError, RepositoryResult, RunRepository, SnapshotRepository,
};
use crate::models::{
    GridSnapshot, ModelPointValue, ModelRun, NewGridSnapshot, NewModelPointValue, NewPointMetric,
    PointMetric, PointMetricQuery, RunStatus, Variable, VariableSummary,
};

#[derive(Default)]
struct Inner {
    runs: Vec<ModelRun>,
    point_metrics: Vec<PointMetric>,
    model_point_values: Vec<ModelPointValue>,
    snapshots: Vec<GridSnapshot>,
}

#[derive(Default)]
pub struct LocalRepository {
    inner: RwLock<Inner>,
}

impl LocalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total pair-metric rows; test helper.
    pub fn point_metric_count(&self) -> usize {
        self.inner.read().point_metrics.len()
    }

    /// Total snapshot catalog rows; test helper.
    pub fn snapshot_count(&self) -> usize {
        self.inner.read().snapshots.len()
    }
}

#[async_trait]
impl RunRepository for LocalRepository {
    async fn insert_run(
        &self,
        model_name: &str,
        init_time: DateTime<Utc>,
    ) -> RepositoryResult<ModelRun> {
        let mut inner = self.inner.write();
        let conflict = inner.runs.iter().any(|r| {
            r.model_name == model_name && r.init_time == init_time && r.status != RunStatus::Error
        });
        if conflict {
            return Err(RepositoryError::duplicate_run(model_name, init_time));
        }
        let run = ModelRun {
            id: Uuid::new_v4(),
            model_name: model_name.to_string(),
            init_time,
            forecast_hours: Vec::new(),
            status: RunStatus::Pending,
            created_at: Utc::now(),
        };
        inner.runs.push(run.clone());
        Ok(run)
    }

    async fn find_active_run(
        &self,
        model_name: &str,
        init_time: DateTime<Utc>,
    ) -> RepositoryResult<Option<ModelRun>> {
        let inner = self.inner.read();
        Ok(inner
            .runs
            .iter()
            .find(|r| {
                r.model_name == model_name
                    && r.init_time == init_time
                    && r.status != RunStatus::Error
            })
            .cloned())
    }

    async fn find_completed_runs_at(
        &self,
        init_time: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ModelRun>> {
        let inner = self.inner.read();
        Ok(inner
            .runs
            .iter()
            .filter(|r| r.init_time == init_time && r.status == RunStatus::Complete)
            .cloned()
            .collect())
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        forecast_hours: Option<Vec<u32>>,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.write();
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| RepositoryError::not_found(format!("run {}", run_id)))?;
        run.status = status;
        if let Some(hours) = forecast_hours {
            run.forecast_hours = hours;
        }
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> RepositoryResult<ModelRun> {
        let inner = self.inner.read();
        inner
            .runs
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("run {}", run_id)))
    }

    async fn list_runs(&self, limit: i64) -> RepositoryResult<Vec<ModelRun>> {
        let inner = self.inner.read();
        let mut runs = inner.runs.clone();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn delete_runs_at(&self, init_time: DateTime<Utc>) -> RepositoryResult<usize> {
        let mut inner = self.inner.write();
        let doomed: Vec<Uuid> = inner
            .runs
            .iter()
            .filter(|r| r.init_time == init_time)
            .map(|r| r.id)
            .collect();
        inner
            .point_metrics
            .retain(|m| !doomed.contains(&m.run_a_id) && !doomed.contains(&m.run_b_id));
        inner
            .model_point_values
            .retain(|v| !doomed.contains(&v.run_id));
        inner.runs.retain(|r| r.init_time != init_time);
        Ok(doomed.len())
    }

    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(true)
    }
}

#[async_trait]
impl MetricRepository for LocalRepository {
    async fn insert_point_metrics(&self, rows: &[NewPointMetric]) -> RepositoryResult<usize> {
        let mut inner = self.inner.write();
        for row in rows {
            inner.point_metrics.push(PointMetric {
                id: Uuid::new_v4(),
                run_a_id: row.run_a_id,
                run_b_id: row.run_b_id,
                variable: row.variable,
                lat: row.lat,
                lon: row.lon,
                lead_hour: row.lead_hour,
                rmse: row.rmse,
                bias: row.bias,
                spread: row.spread,
                created_at: Utc::now(),
            });
        }
        Ok(rows.len())
    }

    async fn insert_model_point_values(
        &self,
        rows: &[NewModelPointValue],
    ) -> RepositoryResult<usize> {
        let mut inner = self.inner.write();
        for row in rows {
            inner.model_point_values.push(ModelPointValue {
                id: Uuid::new_v4(),
                run_id: row.run_id,
                variable: row.variable,
                lat: row.lat,
                lon: row.lon,
                lead_hour: row.lead_hour,
                value: row.value,
                created_at: Utc::now(),
            });
        }
        Ok(rows.len())
    }

    async fn delete_point_metrics_for(
        &self,
        run_ids: &[Uuid],
        lead_hours: &[u32],
    ) -> RepositoryResult<usize> {
        let mut inner = self.inner.write();
        let before = inner.point_metrics.len();
        inner.point_metrics.retain(|m| {
            let touches_run = run_ids.contains(&m.run_a_id) || run_ids.contains(&m.run_b_id);
            !(touches_run && lead_hours.contains(&m.lead_hour))
        });
        Ok(before - inner.point_metrics.len())
    }

    async fn point_metrics_near(
        &self,
        query: &PointMetricQuery,
    ) -> RepositoryResult<Vec<PointMetric>> {
        let inner = self.inner.read();
        let mut rows: Vec<PointMetric> = inner
            .point_metrics
            .iter()
            .filter(|m| m.variable == query.variable)
            .filter(|m| (m.lat - query.lat).abs() <= 0.5 && (m.lon - query.lon).abs() <= 0.5)
            .filter(|m| query.lead_hour.map_or(true, |h| m.lead_hour == h))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }

    async fn variable_summary(
        &self,
        variable: Variable,
    ) -> RepositoryResult<Option<VariableSummary>> {
        let inner = self.inner.read();
        let spreads: Vec<f64> = inner
            .point_metrics
            .iter()
            .filter(|m| m.variable == variable)
            .map(|m| m.spread)
            .collect();
        if spreads.is_empty() {
            return Ok(None);
        }
        let mean = spreads.iter().sum::<f64>() / spreads.len() as f64;
        let max = spreads.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Some(VariableSummary {
            variable,
            mean_spread: mean,
            max_spread: max,
            num_points: spreads.len() as i64,
        }))
    }
}

#[async_trait]
impl SnapshotRepository for LocalRepository {
    async fn insert_grid_snapshot(
        &self,
        row: &NewGridSnapshot,
    ) -> RepositoryResult<GridSnapshot> {
        let snapshot = GridSnapshot {
            id: Uuid::new_v4(),
            init_time: row.init_time,
            variable: row.variable,
            lead_hour: row.lead_hour,
            array_handle: row.array_handle.clone(),
            bbox: row.bbox,
            created_at: Utc::now(),
        };
        self.inner.write().snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn delete_snapshots_for(
        &self,
        init_time: DateTime<Utc>,
        lead_hours: Option<&[u32]>,
    ) -> RepositoryResult<usize> {
        let mut inner = self.inner.write();
        let before = inner.snapshots.len();
        inner.snapshots.retain(|s| {
            let hour_hit = lead_hours.map_or(true, |hours| hours.contains(&s.lead_hour));
            !(s.init_time == init_time && hour_hit)
        });
        Ok(before - inner.snapshots.len())
    }

    async fn latest_snapshot(
        &self,
        variable: Variable,
        lead_hour: u32,
        init_time: Option<DateTime<Utc>>,
    ) -> RepositoryResult<Option<GridSnapshot>> {
        let inner = self.inner.read();
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.variable == variable && s.lead_hour == lead_hour)
            .filter(|s| init_time.map_or(true, |t| s.init_time == t))
            .max_by_key(|s| (s.init_time, s.created_at))
            .cloned())
    }

    async fn list_snapshots(
        &self,
        variable: Option<Variable>,
        limit: i64,
    ) -> RepositoryResult<Vec<GridSnapshot>> {
        let inner = self.inner.read();
        let mut rows: Vec<GridSnapshot> = inner
            .snapshots
            .iter()
            .filter(|s| variable.map_or(true, |v| s.variable == v))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.init_time.cmp(&a.init_time));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn init() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn insert_run_enforces_single_active_row() {
        let repo = LocalRepository::new();
        let run = repo.insert_run("GFS", init()).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        let err = repo.insert_run("GFS", init()).await.unwrap_err();
        assert!(err.is_duplicate());

        // An error run frees the slot.
        repo.update_run_status(run.id, RunStatus::Error, None)
            .await
            .unwrap();
        repo.insert_run("GFS", init()).await.unwrap();
    }

    #[tokio::test]
    async fn find_active_run_skips_error_rows() {
        let repo = LocalRepository::new();
        let run = repo.insert_run("NAM", init()).await.unwrap();
        repo.update_run_status(run.id, RunStatus::Error, None)
            .await
            .unwrap();
        assert!(repo.find_active_run("NAM", init()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn proximity_filter_is_half_degree_box() {
        let repo = LocalRepository::new();
        let a = repo.insert_run("GFS", init()).await.unwrap();
        let b = repo.insert_run("NAM", init()).await.unwrap();
        let row = |lat: f64, lon: f64| NewPointMetric {
            run_a_id: a.id,
            run_b_id: b.id,
            variable: Variable::Precip,
            lat,
            lon,
            lead_hour: 6,
            rmse: 1.0,
            bias: 1.0,
            spread: 0.7,
        };
        repo.insert_point_metrics(&[row(40.7, -74.0), row(41.5, -74.0), row(40.7, -75.2)])
            .await
            .unwrap();

        let near = repo
            .point_metrics_near(&PointMetricQuery {
                variable: Variable::Precip,
                lat: 40.7,
                lon: -74.0,
                lead_hour: None,
                limit: 50,
            })
            .await
            .unwrap();
        assert_eq!(near.len(), 1);
    }

    #[tokio::test]
    async fn summary_aggregates_spread() {
        let repo = LocalRepository::new();
        let a = repo.insert_run("GFS", init()).await.unwrap();
        let b = repo.insert_run("NAM", init()).await.unwrap();
        let row = |spread: f64| NewPointMetric {
            run_a_id: a.id,
            run_b_id: b.id,
            variable: Variable::Mslp,
            lat: 40.0,
            lon: -100.0,
            lead_hour: 0,
            rmse: 1.0,
            bias: -1.0,
            spread,
        };
        repo.insert_point_metrics(&[row(1.0), row(3.0)]).await.unwrap();

        let summary = repo
            .variable_summary(Variable::Mslp)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.num_points, 2);
        assert_eq!(summary.mean_spread, 2.0);
        assert_eq!(summary.max_spread, 3.0);
        assert!(repo.variable_summary(Variable::Precip).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_runs_cascades_to_metrics_not_snapshots() {
        let repo = LocalRepository::new();
        let a = repo.insert_run("GFS", init()).await.unwrap();
        let b = repo.insert_run("NAM", init()).await.unwrap();
        repo.insert_point_metrics(&[NewPointMetric {
            run_a_id: a.id,
            run_b_id: b.id,
            variable: Variable::Precip,
            lat: 40.0,
            lon: -100.0,
            lead_hour: 6,
            rmse: 1.0,
            bias: 1.0,
            spread: 0.7,
        }])
        .await
        .unwrap();
        repo.insert_grid_snapshot(&NewGridSnapshot {
            init_time: init(),
            variable: Variable::Precip,
            lead_hour: 6,
            array_handle: "divergence/2024011500/precip/fhr006.zfc".to_string(),
            bbox: crate::models::BoundingBox {
                min_lat: 30.0,
                max_lat: 45.0,
                min_lon: -110.0,
                max_lon: -70.0,
            },
        })
        .await
        .unwrap();

        assert_eq!(repo.delete_runs_at(init()).await.unwrap(), 2);
        assert_eq!(repo.point_metric_count(), 0);
        // The catalog row survives until the reset path deletes it
        // explicitly.
        assert_eq!(repo.snapshot_count(), 1);
        assert_eq!(
            repo.delete_snapshots_for(init(), None).await.unwrap(),
            1
        );
    }
}
