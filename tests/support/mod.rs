//! Shared fixtures for the pipeline integration suites.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ndarray::{Array1, Array2};

use synoptic_spread::config::MonitorPoint;
use synoptic_spread::db::LocalRepository;
use synoptic_spread::ingest::{FetchError, ModelFetcher};
use synoptic_spread::models::{Field, FieldSet, Variable};
use synoptic_spread::pipeline::Orchestrator;
use synoptic_spread::store::ArrayStore;

/// The cycle every test ingests.
pub fn init_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap()
}

/// The single monitor point the tests observe.
pub fn monitor_points() -> Vec<MonitorPoint> {
    vec![MonitorPoint::new(40.7128, -74.0060, "New York")]
}

/// A uniform regular field over the New York area.
pub fn uniform_field(value: f64) -> Field {
    let lat = Array1::from_iter((0..11).map(|i| 39.5 + i as f64 * 0.25));
    let lon = Array1::from_iter((0..11).map(|j| -75.5 + j as f64 * 0.25));
    Field::regular(lat, lon, Array2::from_elem((11, 11), value)).unwrap()
}

/// Scripted fetcher: fixed per-variable values, optional per-hour failures,
/// optional total unavailability. Counts fetch invocations.
pub struct FakeFetcher {
    name: &'static str,
    hours: Vec<u32>,
    values: BTreeMap<Variable, f64>,
    failing_hours: Vec<u32>,
    unavailable: bool,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(name: &'static str, hours: Vec<u32>, values: &[(Variable, f64)]) -> Self {
        Self {
            name,
            hours,
            values: values.iter().copied().collect(),
            failing_hours: Vec::new(),
            unavailable: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Simulate a decoder throwing for the given lead hours.
    pub fn failing_at(mut self, hours: Vec<u32>) -> Self {
        self.failing_hours = hours;
        self
    }

    /// Simulate the source being entirely unreachable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn fetch_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelFetcher for FakeFetcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn default_lead_hours(&self) -> Vec<u32> {
        self.hours.clone()
    }

    async fn fetch(
        &self,
        _init_time: DateTime<Utc>,
        variables: &[Variable],
        lead_hours: &[u32],
    ) -> Result<Vec<(u32, FieldSet)>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(FetchError::SourceUnavailable(format!(
                "{} is down",
                self.name
            )));
        }
        let mut out = Vec::new();
        for &fhr in lead_hours {
            if !self.hours.contains(&fhr) || self.failing_hours.contains(&fhr) {
                continue;
            }
            let mut set = FieldSet::new();
            for &variable in variables {
                if let Some(&value) = self.values.get(&variable) {
                    set.insert(variable, uniform_field(value));
                }
            }
            if !set.is_empty() {
                out.push((fhr, set));
            }
        }
        Ok(out)
    }
}

/// Orchestrator over a fresh local repository and a tempdir array store.
pub struct Harness {
    pub repo: Arc<LocalRepository>,
    pub store: Arc<ArrayStore>,
    pub orchestrator: Orchestrator,
    _store_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let repo = Arc::new(LocalRepository::new());
        let store_dir = tempfile::TempDir::new().expect("tempdir");
        let store = Arc::new(ArrayStore::new(store_dir.path()));
        let orchestrator = Orchestrator::new(
            repo.clone(),
            store.clone(),
            monitor_points(),
            0.25,
        );
        Self {
            repo,
            store,
            orchestrator,
            _store_dir: store_dir,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<FakeFetcher>) -> Self {
        self.orchestrator = self.orchestrator.with_fetcher(fetcher);
        self
    }
}
