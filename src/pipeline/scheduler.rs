//! Wall-clock cron: one job per model, fire times offset from the nominal
//! cycles by each publisher's typical latency.
//!
//! Jobs for different models may overlap; a single job never overlaps its
//! previous invocation (coalesce-or-skip via a per-job try-lock). Shutdown
//! stops dispatching and lets in-flight runs reach a terminal run status.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::ScheduleSpec;

use super::orchestrator::{latest_cycle, IngestError, Orchestrator};

/// Earliest fire instant strictly after `after`.
pub fn next_fire_after(after: DateTime<Utc>, spec: &ScheduleSpec) -> DateTime<Utc> {
    let mut hours: Vec<u32> = spec.fire_hours.clone();
    hours.sort_unstable();
    for day_offset in 0..=2 {
        let date = (after + chrono::Duration::days(day_offset)).date_naive();
        for &hour in &hours {
            if let Some(candidate) = date.and_hms_opt(hour, spec.fire_minute, 0) {
                let candidate = candidate.and_utc();
                if candidate > after {
                    return candidate;
                }
            }
        }
    }
    // Unreachable with a non-empty, in-range hour list.
    after + chrono::Duration::days(1)
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    jobs: Vec<ScheduleSpec>,
    job_deadline: Duration,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        jobs: Vec<ScheduleSpec>,
        job_deadline: Duration,
    ) -> Self {
        Self {
            orchestrator,
            jobs,
            job_deadline,
        }
    }

    /// Dispatch loop; returns once `shutdown` flips to `true` and all
    /// in-flight jobs have finished.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.jobs.is_empty() {
            info!("scheduler has no jobs configured");
            return;
        }
        let locks: Vec<Arc<Mutex<()>>> = self
            .jobs
            .iter()
            .map(|_| Arc::new(Mutex::new(())))
            .collect();
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!(jobs = self.jobs.len(), "scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Utc::now();
            let (job_idx, fire_at) = match self
                .jobs
                .iter()
                .enumerate()
                .map(|(i, spec)| (i, next_fire_after(now, spec)))
                .min_by_key(|(_, t)| *t)
            {
                Some(next) => next,
                None => break,
            };
            let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let spec = self.jobs[job_idx].clone();
                    let lock = Arc::clone(&locks[job_idx]);
                    let orchestrator = Arc::clone(&self.orchestrator);
                    let deadline = self.job_deadline;
                    in_flight.spawn(async move {
                        run_job(orchestrator, spec, lock, deadline).await;
                    });
                    // Reap whatever already finished.
                    while in_flight.try_join_next().is_some() {}
                }
                changed = shutdown.changed() => {
                    // A dropped sender means the process is going away.
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopping, draining in-flight jobs");
        while in_flight.join_next().await.is_some() {}
        info!("scheduler stopped");
    }
}

async fn run_job(
    orchestrator: Arc<Orchestrator>,
    spec: ScheduleSpec,
    lock: Arc<Mutex<()>>,
    deadline: Duration,
) {
    // Coalesce-or-skip: never overlap the previous invocation of this job.
    let Ok(_guard) = lock.try_lock() else {
        info!(model = %spec.model_name, "previous invocation still running, skipping");
        return;
    };
    let cycle = latest_cycle(
        Utc::now(),
        spec.cycle_interval_hours,
        spec.availability_delay_hours,
    );
    match tokio::time::timeout(
        deadline,
        orchestrator.ingest_and_process(&spec.model_name, Some(cycle)),
    )
    .await
    {
        Ok(Ok(run)) => {
            info!(model = %spec.model_name, %cycle, status = ?run.status, "scheduled ingest finished")
        }
        Ok(Err(IngestError::ConcurrentRunInProgress { .. })) => {
            info!(model = %spec.model_name, %cycle, "run already in progress elsewhere")
        }
        Ok(Err(err)) => {
            error!(model = %spec.model_name, %cycle, error = %err, "scheduled ingest failed")
        }
        Err(_) => {
            error!(model = %spec.model_name, %cycle, "job deadline exceeded");
            if let Err(err) = orchestrator.finalize_timed_out(&spec.model_name, cycle).await {
                error!(model = %spec.model_name, error = %err, "failed to finalize timed-out run");
            }
        }
    }
}
