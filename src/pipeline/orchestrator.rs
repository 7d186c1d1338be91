//! Per-(model, init_time) ingestion workflow.
//!
//! `ingest_and_process` drives one run through the state machine: idempotency
//! probe, pending row, primary fetch, companion re-fetch, metric and
//! divergence computation, persistence, finalize. Companion models are
//! re-fetched rather than cached — wasteful but restart-safe; the interface
//! stays the same if a fetch cache ever lands underneath.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MonitorPoint;
use crate::db::repository::{
    FullRepository, MetricRepository, RepositoryError, RunRepository, SnapshotRepository,
};
use crate::grid::divergence::{compute_grid_divergence, DivergenceField};
use crate::grid::extract_point;
use crate::ingest::{FetchError, ModelFetcher};
use crate::metrics::{ensemble_spread, pairwise_metrics, point_values};
use crate::models::{
    FieldSet, ModelRun, NewGridSnapshot, NewModelPointValue, NewPointMetric, RunStatus, Variable,
};
use crate::store::{ArrayStore, StoreError};

use super::events::{IngestEvent, PostIngestHook};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    /// A pending run for the same `(model, init_time)` is in flight.
    #[error("run already in progress for {model} at {init_time}")]
    ConcurrentRunInProgress {
        model: String,
        init_time: DateTime<Utc>,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("storage failure: {0}")]
    Storage(#[from] RepositoryError),
    #[error("array store failure: {0}")]
    ArrayStore(#[from] StoreError),
    #[error("internal: {0}")]
    Internal(String),
}

/// Most recent cycle boundary at or before `now - delay_hours`.
pub fn latest_cycle(now: DateTime<Utc>, interval_hours: u32, delay_hours: u32) -> DateTime<Utc> {
    let adjusted = now - chrono::Duration::hours(delay_hours as i64);
    let interval = interval_hours.max(1);
    let cycle_hour = (adjusted.hour() / interval) * interval;
    adjusted
        .date_naive()
        .and_hms_opt(cycle_hour, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(adjusted)
}

type HourMap = BTreeMap<u32, Arc<FieldSet>>;

pub struct Orchestrator {
    repo: Arc<dyn FullRepository>,
    store: Arc<ArrayStore>,
    fetchers: HashMap<String, Arc<dyn ModelFetcher>>,
    monitor_points: Vec<MonitorPoint>,
    hooks: Vec<Arc<dyn PostIngestHook>>,
    resolution: f64,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn FullRepository>,
        store: Arc<ArrayStore>,
        monitor_points: Vec<MonitorPoint>,
        resolution: f64,
    ) -> Self {
        Self {
            repo,
            store,
            fetchers: HashMap::new(),
            monitor_points,
            hooks: Vec::new(),
            resolution,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ModelFetcher>) -> Self {
        self.fetchers.insert(fetcher.name().to_string(), fetcher);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostIngestHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Registered model names, in registration-independent sorted order.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fetchers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn repository(&self) -> &Arc<dyn FullRepository> {
        &self.repo
    }

    pub fn array_store(&self) -> &Arc<ArrayStore> {
        &self.store
    }

    /// Run the full workflow and return the terminal run row.
    ///
    /// Re-invocation for a `complete` run returns that run unchanged; a
    /// `pending` run yields [`IngestError::ConcurrentRunInProgress`].
    pub async fn ingest_and_process(
        &self,
        model_name: &str,
        init_time: Option<DateTime<Utc>>,
    ) -> Result<ModelRun, IngestError> {
        let fetcher = self
            .fetchers
            .get(model_name)
            .cloned()
            .ok_or_else(|| IngestError::UnknownModel(model_name.to_string()))?;
        let init_time = init_time.unwrap_or_else(|| latest_cycle(Utc::now(), 6, 0));
        info!(model = model_name, %init_time, "starting ingestion");

        if let Some(existing) = self.repo.find_active_run(model_name, init_time).await? {
            match existing.status {
                RunStatus::Complete => {
                    info!(model = model_name, %init_time, "already ingested, skipping");
                    return Ok(existing);
                }
                _ => {
                    return Err(IngestError::ConcurrentRunInProgress {
                        model: model_name.to_string(),
                        init_time,
                    })
                }
            }
        }

        // The partial unique index arbitrates races between the probe above
        // and this insert.
        let run = match self.repo.insert_run(model_name, init_time).await {
            Ok(run) => run,
            Err(err) if err.is_duplicate() => {
                return Err(IngestError::ConcurrentRunInProgress {
                    model: model_name.to_string(),
                    init_time,
                })
            }
            Err(err) => return Err(err.into()),
        };

        match self.process_run(&run, fetcher).await {
            Ok(terminal) => Ok(terminal),
            Err(err) => {
                error!(model = model_name, %init_time, error = %err, "ingestion failed");
                if let Err(update_err) =
                    self.repo.update_run_status(run.id, RunStatus::Error, None).await
                {
                    error!(run_id = %run.id, error = %update_err, "failed to mark run as error");
                }
                Err(err)
            }
        }
    }

    /// Scheduler deadline path: resolve a still-pending run to `error`.
    pub async fn finalize_timed_out(
        &self,
        model_name: &str,
        init_time: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        if let Some(run) = self.repo.find_active_run(model_name, init_time).await? {
            if run.status == RunStatus::Pending {
                warn!(model = model_name, %init_time, "job deadline hit, finalizing as error");
                self.repo
                    .update_run_status(run.id, RunStatus::Error, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Reset path: drop all runs, metrics and snapshots for a cycle, plus
    /// the cycle's array-store tree (sweeping any orphaned objects).
    pub async fn reset_cycle(&self, init_time: DateTime<Utc>) -> Result<(), IngestError> {
        self.repo.delete_runs_at(init_time).await?;
        self.repo.delete_snapshots_for(init_time, None).await?;
        let store = Arc::clone(&self.store);
        let prefix = format!("divergence/{}", init_time.format("%Y%m%d%H"));
        task::spawn_blocking(move || store.drop_tree(&prefix))
            .await
            .map_err(|e| IngestError::Internal(e.to_string()))??;
        Ok(())
    }

    async fn process_run(
        &self,
        run: &ModelRun,
        fetcher: Arc<dyn ModelFetcher>,
    ) -> Result<ModelRun, IngestError> {
        let init_time = run.init_time;
        let model_name = run.model_name.clone();

        let fetched = fetcher
            .fetch(init_time, &Variable::ALL, &fetcher.default_lead_hours())
            .await?;
        if fetched.is_empty() {
            warn!(model = %model_name, %init_time, "no lead hours decoded");
            self.repo
                .update_run_status(run.id, RunStatus::Error, Some(Vec::new()))
                .await?;
            return Ok(self.repo.get_run(run.id).await?);
        }
        let hours: Vec<u32> = fetched.iter().map(|(h, _)| *h).collect();
        self.repo
            .update_run_status(run.id, RunStatus::Pending, Some(hours.clone()))
            .await?;

        let primary: HourMap = fetched
            .into_iter()
            .map(|(fhr, set)| (fhr, Arc::new(set)))
            .collect();

        // Raw per-model values at the monitor points, one batch per hour.
        for (&fhr, set) in &primary {
            let set = Arc::clone(set);
            let points = self.monitor_points.clone();
            let run_id = run.id;
            let rows = task::spawn_blocking(move || {
                model_point_value_rows(run_id, fhr, &set, &points)
            })
            .await
            .map_err(|e| IngestError::Internal(e.to_string()))?;
            if !rows.is_empty() {
                self.repo.insert_model_point_values(&rows).await?;
            }
        }

        let mut all_models: BTreeMap<String, HourMap> = BTreeMap::new();
        let mut run_ids: BTreeMap<String, Uuid> = BTreeMap::new();
        all_models.insert(model_name.clone(), primary);
        run_ids.insert(model_name.clone(), run.id);

        // Companion models with a complete run at the same cycle are
        // re-fetched for comparison; a companion failing never fails the
        // primary run.
        for companion in self.repo.find_completed_runs_at(init_time).await? {
            if companion.model_name == model_name {
                continue;
            }
            let Some(companion_fetcher) = self.fetchers.get(&companion.model_name) else {
                warn!(model = %companion.model_name, "no fetcher registered for companion");
                continue;
            };
            match companion_fetcher
                .fetch(init_time, &Variable::ALL, &companion.forecast_hours)
                .await
            {
                Ok(data) if !data.is_empty() => {
                    run_ids.insert(companion.model_name.clone(), companion.id);
                    all_models.insert(
                        companion.model_name.clone(),
                        data.into_iter().map(|(h, s)| (h, Arc::new(s))).collect(),
                    );
                }
                Ok(_) => warn!(model = %companion.model_name, "companion returned no hours"),
                Err(err) => {
                    warn!(model = %companion.model_name, error = %err, "companion re-fetch failed")
                }
            }
        }

        let outcome = self
            .compute_and_persist(init_time, &all_models, &run_ids)
            .await?;

        self.repo
            .update_run_status(run.id, RunStatus::Complete, Some(hours))
            .await?;
        let terminal = self.repo.get_run(run.id).await?;
        info!(
            model = %model_name,
            %init_time,
            point_metrics = outcome.point_metric_rows,
            snapshots = outcome.snapshot_rows,
            "ingestion complete"
        );

        let event = IngestEvent {
            run: terminal.clone(),
            point_metric_rows: outcome.point_metric_rows,
            snapshot_rows: outcome.snapshot_rows,
            partial_failures: outcome.partial_failures,
            max_spread: outcome.max_spread,
        };
        for hook in &self.hooks {
            hook.on_run_complete(&event).await;
        }
        Ok(terminal)
    }

    async fn compute_and_persist(
        &self,
        init_time: DateTime<Utc>,
        all_models: &BTreeMap<String, HourMap>,
        run_ids: &BTreeMap<String, Uuid>,
    ) -> Result<ComputeOutcome, IngestError> {
        let mut outcome = ComputeOutcome::default();

        // Lead hours covered by at least two models, union across models so
        // e.g. GFS–NAM divergence at 54–72 h survives HRRR stopping at 48.
        let mut hour_counts: BTreeMap<u32, usize> = BTreeMap::new();
        for hour_map in all_models.values() {
            for &fhr in hour_map.keys() {
                *hour_counts.entry(fhr).or_insert(0) += 1;
            }
        }
        let pair_hours: Vec<u32> = hour_counts
            .into_iter()
            .filter(|(_, n)| *n >= 2)
            .map(|(fhr, _)| fhr)
            .collect();
        if pair_hours.is_empty() {
            return Ok(outcome);
        }

        // Replace rows from earlier recomputations of these hours so the
        // store stays duplicate-free across successive model ingests.
        let ids: Vec<Uuid> = run_ids.values().copied().collect();
        self.repo.delete_point_metrics_for(&ids, &pair_hours).await?;
        self.repo
            .delete_snapshots_for(init_time, Some(&pair_hours))
            .await?;

        for &fhr in &pair_hours {
            let hour_sets: BTreeMap<String, Arc<FieldSet>> = all_models
                .iter()
                .filter_map(|(name, hours)| {
                    hours.get(&fhr).map(|set| (name.clone(), Arc::clone(set)))
                })
                .collect();
            if hour_sets.len() < 2 {
                continue;
            }

            let mut hour_rows: Vec<NewPointMetric> = Vec::new();
            let mut hour_snapshots: Vec<NewGridSnapshot> = Vec::new();

            for variable in Variable::ALL {
                let participating: BTreeMap<String, Arc<FieldSet>> = hour_sets
                    .iter()
                    .filter(|(_, set)| set.contains(variable))
                    .map(|(name, set)| (name.clone(), Arc::clone(set)))
                    .collect();
                if participating.len() < 2 {
                    continue;
                }

                match self
                    .compute_hour_variable(init_time, fhr, variable, participating, run_ids)
                    .await
                {
                    Ok((rows, snapshot, max_spread)) => {
                        if max_spread > outcome.max_spread.get(&variable).copied().unwrap_or(0.0)
                        {
                            outcome.max_spread.insert(variable, max_spread);
                        }
                        hour_rows.extend(rows);
                        hour_snapshots.extend(snapshot);
                    }
                    Err(err) => {
                        // Contained: one (lead_hour, variable) failing leaves
                        // the rest of the cycle intact.
                        outcome.partial_failures += 1;
                        warn!(fhr, variable = %variable, error = %err, "partial lead-hour failure");
                    }
                }
            }

            // All inserts for this (run, lead_hour) land together before the
            // next hour begins.
            if !hour_rows.is_empty() {
                outcome.point_metric_rows +=
                    self.repo.insert_point_metrics(&hour_rows).await?;
            }
            for snapshot in &hour_snapshots {
                self.repo.insert_grid_snapshot(snapshot).await?;
                outcome.snapshot_rows += 1;
            }
        }
        Ok(outcome)
    }

    /// Point metrics and the divergence grid for one (lead_hour, variable).
    ///
    /// The catalog row is only handed back after the array-store `put`
    /// succeeded, preserving the durability ordering.
    async fn compute_hour_variable(
        &self,
        init_time: DateTime<Utc>,
        fhr: u32,
        variable: Variable,
        participating: BTreeMap<String, Arc<FieldSet>>,
        run_ids: &BTreeMap<String, Uuid>,
    ) -> Result<(Vec<NewPointMetric>, Option<NewGridSnapshot>, f64), IngestError> {
        let points = self.monitor_points.clone();
        let ids = run_ids.clone();
        let resolution = self.resolution;

        let (rows, divergence, max_spread) = task::spawn_blocking(move || {
            compute_point_and_grid(&participating, variable, &points, &ids, fhr, resolution)
        })
        .await
        .map_err(|e| IngestError::Internal(e.to_string()))?;

        let snapshot = match divergence {
            Some(div) => {
                let handle_key = ArrayStore::divergence_handle(init_time, variable, fhr);
                let store = Arc::clone(&self.store);
                let field = div.field.clone();
                let key = handle_key.clone();
                let handle = task::spawn_blocking(move || store.put(&key, &field))
                    .await
                    .map_err(|e| IngestError::Internal(e.to_string()))??;
                Some(NewGridSnapshot {
                    init_time,
                    variable,
                    lead_hour: fhr,
                    array_handle: handle,
                    bbox: div.bbox,
                })
            }
            None => None,
        };
        Ok((rows, snapshot, max_spread))
    }
}

#[derive(Default)]
struct ComputeOutcome {
    point_metric_rows: usize,
    snapshot_rows: usize,
    partial_failures: usize,
    max_spread: BTreeMap<Variable, f64>,
}

fn model_point_value_rows(
    run_id: Uuid,
    fhr: u32,
    set: &FieldSet,
    points: &[MonitorPoint],
) -> Vec<NewModelPointValue> {
    let mut rows = Vec::new();
    for (variable, field) in set.iter() {
        for point in points {
            let value = extract_point(field, point.lat, point.lon);
            if value.is_finite() {
                rows.push(NewModelPointValue {
                    run_id,
                    variable,
                    lat: point.lat,
                    lon: point.lon,
                    lead_hour: fhr,
                    value,
                });
            }
        }
    }
    rows
}

/// CPU-bound kernel work for one (lead_hour, variable): per-point pair rows
/// plus the regridded divergence field.
fn compute_point_and_grid(
    sets: &BTreeMap<String, Arc<FieldSet>>,
    variable: Variable,
    points: &[MonitorPoint],
    run_ids: &BTreeMap<String, Uuid>,
    fhr: u32,
    resolution: f64,
) -> (Vec<NewPointMetric>, Option<DivergenceField>, f64) {
    let mut rows = Vec::new();
    let mut max_spread = 0.0f64;

    for point in points {
        let values = point_values(sets, variable, point.lat, point.lon);
        let spread = ensemble_spread(&values);
        max_spread = max_spread.max(spread);
        for pair in pairwise_metrics(&values) {
            let (Some(&run_a_id), Some(&run_b_id)) =
                (run_ids.get(&pair.model_a), run_ids.get(&pair.model_b))
            else {
                continue;
            };
            rows.push(NewPointMetric {
                run_a_id,
                run_b_id,
                variable,
                lat: point.lat,
                lon: point.lon,
                lead_hour: fhr,
                rmse: pair.rmse,
                bias: pair.bias,
                spread,
            });
        }
    }

    let fields: BTreeMap<String, &crate::models::Field> = sets
        .iter()
        .filter_map(|(name, set)| set.get(variable).map(|f| (name.clone(), f)))
        .collect();
    let divergence = compute_grid_divergence(&fields, resolution);
    (rows, divergence, max_spread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn latest_cycle_floors_to_interval() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 14, 35, 0).unwrap();
        assert_eq!(
            latest_cycle(now, 6, 0),
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
        );
        // The availability delay pulls the target back a full cycle.
        assert_eq!(
            latest_cycle(now, 6, 5),
            Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn latest_cycle_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap();
        assert_eq!(
            latest_cycle(now, 6, 5),
            Utc.with_ymd_and_hms(2024, 1, 14, 18, 0, 0).unwrap()
        );
    }
}
