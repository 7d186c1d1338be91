//! Runtime configuration.
//!
//! Loaded from environment variables with sensible defaults; nothing here is
//! global — the binary builds one [`AppConfig`] and injects the pieces into
//! the scheduler, orchestrator and HTTP layer explicitly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A fixed location at which point metrics are computed on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorPoint {
    pub lat: f64,
    pub lon: f64,
    pub label: String,
}

impl MonitorPoint {
    pub fn new(lat: f64, lon: f64, label: impl Into<String>) -> Self {
        Self {
            lat,
            lon,
            label: label.into(),
        }
    }
}

/// Per-model cron parameters.
///
/// Fire times are the publisher's nominal cycles plus its typical latency;
/// the minute offsets stagger NOMADS requests. These are empirical tuning,
/// not a contract, hence configuration rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub model_name: String,
    /// UTC hours at which the job fires.
    pub fire_hours: Vec<u32>,
    pub fire_minute: u32,
    /// Subtracted from the wall clock before rounding down to a cycle, so a
    /// fired job targets a cycle whose data should already be published.
    pub availability_delay_hours: u32,
    /// Cycle cadence of the model (6 for everything currently ingested).
    pub cycle_interval_hours: u32,
}

/// Application configuration surface.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Relational store location; `None` selects the in-memory repository.
    pub database_url: Option<String>,
    /// Root of the array store.
    pub data_store_path: PathBuf,
    /// Master switch; when false, ingestion is API/CLI-triggered only.
    pub scheduler_enabled: bool,
    pub monitor_points: Vec<MonitorPoint>,
    /// CORS origins for the HTTP query API; `*` means any.
    pub allowed_origins: Vec<String>,
    /// Per-lead-hour external fetch timeout.
    pub fetch_timeout_seconds: u64,
    /// Hard wall-clock bound per orchestrator job.
    pub job_deadline_seconds: u64,
    /// Common regrid resolution in degrees.
    pub grid_resolution_deg: f64,
    pub ingest_schedules: Vec<ScheduleSpec>,
    /// Spread alert thresholds per variable short name; empty disables the
    /// alert hook.
    pub alert_spread_thresholds: Vec<(String, f64)>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            data_store_path: PathBuf::from("./data"),
            scheduler_enabled: true,
            monitor_points: default_monitor_points(),
            allowed_origins: vec!["*".to_string()],
            fetch_timeout_seconds: 600,
            job_deadline_seconds: 3600,
            grid_resolution_deg: 0.25,
            ingest_schedules: default_schedules(),
            alert_spread_thresholds: Vec::new(),
        }
    }
}

fn default_monitor_points() -> Vec<MonitorPoint> {
    vec![
        MonitorPoint::new(40.7128, -74.0060, "New York"),
        MonitorPoint::new(34.0522, -118.2437, "Los Angeles"),
        MonitorPoint::new(41.8781, -87.6298, "Chicago"),
        MonitorPoint::new(29.7604, -95.3698, "Houston"),
        MonitorPoint::new(47.6062, -122.3321, "Seattle"),
        MonitorPoint::new(39.7392, -104.9903, "Denver"),
        MonitorPoint::new(25.7617, -80.1918, "Miami"),
        MonitorPoint::new(38.9072, -77.0369, "Washington DC"),
    ]
}

/// NOMADS output lands ~3.5–5 h after cycle time, ECMWF open data 7–9 h.
fn default_schedules() -> Vec<ScheduleSpec> {
    let nomads = |model: &str, minute: u32| ScheduleSpec {
        model_name: model.to_string(),
        fire_hours: vec![5, 11, 17, 23],
        fire_minute: minute,
        availability_delay_hours: 5,
        cycle_interval_hours: 6,
    };
    vec![
        nomads("HRRR", 15),
        nomads("GFS", 30),
        nomads("NAM", 45),
        ScheduleSpec {
            model_name: "ECMWF".to_string(),
            fire_hours: vec![3, 9, 15, 21],
            fire_minute: 0,
            availability_delay_hours: 9,
            cycle_interval_hours: 6,
        },
    ]
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// - `DATABASE_URL`
    /// - `DATA_STORE_PATH` (default `./data`)
    /// - `SCHEDULER_ENABLED` (default `true`)
    /// - `ALLOWED_ORIGINS`: comma-separated list (default `*`)
    /// - `FETCH_TIMEOUT_SECONDS` (default 600)
    /// - `JOB_DEADLINE_SECONDS` (default 3600)
    /// - `MONITOR_POINTS`: `lat,lon,label;lat,lon,label;…`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let monitor_points = std::env::var("MONITOR_POINTS")
            .ok()
            .map(|raw| parse_monitor_points(&raw))
            .filter(|points: &Vec<MonitorPoint>| !points.is_empty())
            .unwrap_or(defaults.monitor_points);
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.allowed_origins);

        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            data_store_path: PathBuf::from(
                std::env::var("DATA_STORE_PATH").unwrap_or_else(|_| "./data".to_string()),
            ),
            scheduler_enabled: env_parse("SCHEDULER_ENABLED", defaults.scheduler_enabled),
            monitor_points,
            allowed_origins,
            fetch_timeout_seconds: env_parse(
                "FETCH_TIMEOUT_SECONDS",
                defaults.fetch_timeout_seconds,
            ),
            job_deadline_seconds: env_parse("JOB_DEADLINE_SECONDS", defaults.job_deadline_seconds),
            grid_resolution_deg: defaults.grid_resolution_deg,
            ingest_schedules: defaults.ingest_schedules,
            alert_spread_thresholds: defaults.alert_spread_thresholds,
        }
    }
}

fn parse_monitor_points(raw: &str) -> Vec<MonitorPoint> {
    raw.split(';')
        .filter_map(|entry| {
            let mut parts = entry.splitn(3, ',');
            let lat = parts.next()?.trim().parse().ok()?;
            let lon = parts.next()?.trim().parse().ok()?;
            let label = parts.next().unwrap_or("").trim().to_string();
            Some(MonitorPoint { lat, lon, label })
        })
        .collect()
}
