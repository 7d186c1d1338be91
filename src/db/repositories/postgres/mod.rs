//! Postgres repository implementation using Diesel.
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient failures
//! - Embedded migrations run at startup
//! - Run uniqueness via a partial unique index mapped onto `DuplicateRun`
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL`: connection string (required)
//! - `PG_POOL_MAX`: maximum pool size (default: 10)
//! - `PG_POOL_MIN`: minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: initial retry delay, doubling per attempt (default: 100)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::{avg, count_star, max};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use uuid::Uuid;

use crate::db::repository::{
    ErrorContext, MetricRepository, RepositoryError, RepositoryResult, RunRepository,
    SnapshotRepository,
};
use crate::models::{
    GridSnapshot, ModelRun, NewGridSnapshot, NewModelPointValue, NewPointMetric, PointMetric,
    PointMetricQuery, RunStatus, Variable, VariableSummary,
};

mod models;
mod schema;

use models::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations =
    embed_migrations!("src/db/repositories/postgres/migrations");

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connection_timeout_sec: u64,
    pub idle_timeout_sec: u64,
    pub max_retries: u32,
    /// Initial retry delay in milliseconds; doubles per attempt.
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl PostgresConfig {
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL must be set".to_string())?;
        let parse = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };
        Ok(Self {
            database_url,
            max_pool_size: parse("PG_POOL_MAX", 10) as u32,
            min_pool_size: parse("PG_POOL_MIN", 1) as u32,
            connection_timeout_sec: parse("PG_CONN_TIMEOUT_SEC", 30),
            idle_timeout_sec: parse("PG_IDLE_TIMEOUT_SEC", 600),
            max_retries: parse("PG_MAX_RETRIES", 3) as u32,
            retry_delay_ms: parse("PG_RETRY_DELAY_MS", 100),
        })
    }

    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

impl From<diesel::result::Error> for RepositoryError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match err {
            Error::NotFound => RepositoryError::not_found("record not found"),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                RepositoryError::DuplicateRun {
                    message: info.message().to_string(),
                    context: ErrorContext::default().with_entity("model_run"),
                }
            }
            Error::DatabaseError(kind, info) => {
                let context =
                    ErrorContext::default().with_details(format!("db_error_kind={:?}", kind));
                let context = if matches!(kind, DatabaseErrorKind::SerializationFailure) {
                    context.retryable()
                } else {
                    context
                };
                RepositoryError::Query {
                    message: info.message().to_string(),
                    context,
                }
            }
            other => RepositoryError::query(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for RepositoryError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        RepositoryError::connection(err.to_string())
    }
}

/// Diesel-backed repository for Postgres.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresRepository {
    /// Create the pool and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| RepositoryError::connection(e.to_string()))?;

        {
            let mut conn = pool.get()?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| RepositoryError::internal(format!("migration failed: {}", e)))?;
        }

        Ok(Self { pool, config })
    }

    /// Run a blocking database operation off the async runtime, retrying
    /// transient failures with doubling backoff.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut PgConnection) -> RepositoryResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let base_delay = self.config.retry_delay_ms;
        tokio::task::spawn_blocking(move || {
            let mut attempt: u32 = 0;
            loop {
                let result = pool
                    .get()
                    .map_err(RepositoryError::from)
                    .and_then(|mut conn| f(&mut conn));
                match result {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_retryable() && attempt < max_retries => {
                        attempt += 1;
                        std::thread::sleep(Duration::from_millis(base_delay << (attempt - 1)));
                    }
                    Err(err) => return Err(err.with_operation(operation)),
                }
            }
        })
        .await
        .map_err(|e| RepositoryError::internal(format!("blocking task: {}", e)))?
    }
}

#[async_trait]
impl RunRepository for PostgresRepository {
    async fn insert_run(
        &self,
        name: &str,
        init: DateTime<Utc>,
    ) -> RepositoryResult<ModelRun> {
        let row = NewRunRow {
            model_name: name.to_string(),
            init_time: init,
            forecast_hours: Vec::new(),
            status: RunStatus::Pending.as_str().to_string(),
        };
        self.with_conn("insert_run", move |conn| {
            let inserted: RunRow = diesel::insert_into(schema::model_runs::table)
                .values(&row)
                .returning(RunRow::as_returning())
                .get_result(conn)?;
            inserted.try_into()
        })
        .await
    }

    async fn find_active_run(
        &self,
        name: &str,
        init: DateTime<Utc>,
    ) -> RepositoryResult<Option<ModelRun>> {
        let name = name.to_string();
        self.with_conn("find_active_run", move |conn| {
            use schema::model_runs::dsl::*;
            let row: Option<RunRow> = model_runs
                .filter(model_name.eq(&name))
                .filter(init_time.eq(init))
                .filter(status.ne(RunStatus::Error.as_str()))
                .order(created_at.desc())
                .select(RunRow::as_select())
                .first(conn)
                .optional()?;
            row.map(TryInto::try_into).transpose()
        })
        .await
    }

    async fn find_completed_runs_at(
        &self,
        init: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ModelRun>> {
        self.with_conn("find_completed_runs_at", move |conn| {
            use schema::model_runs::dsl::*;
            let rows: Vec<RunRow> = model_runs
                .filter(init_time.eq(init))
                .filter(status.eq(RunStatus::Complete.as_str()))
                .order(model_name.asc())
                .select(RunRow::as_select())
                .load(conn)?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
        .await
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        new_status: RunStatus,
        hours: Option<Vec<u32>>,
    ) -> RepositoryResult<()> {
        self.with_conn("update_run_status", move |conn| {
            use schema::model_runs::dsl::*;
            let affected = match &hours {
                Some(hours) => {
                    let hours: Vec<i32> = hours.iter().map(|h| *h as i32).collect();
                    diesel::update(model_runs.find(run_id))
                        .set((status.eq(new_status.as_str()), forecast_hours.eq(hours)))
                        .execute(conn)?
                }
                None => diesel::update(model_runs.find(run_id))
                    .set(status.eq(new_status.as_str()))
                    .execute(conn)?,
            };
            if affected == 0 {
                return Err(RepositoryError::not_found(format!("run {}", run_id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_run(&self, run_id: Uuid) -> RepositoryResult<ModelRun> {
        self.with_conn("get_run", move |conn| {
            use schema::model_runs::dsl::*;
            let row: RunRow = model_runs
                .find(run_id)
                .select(RunRow::as_select())
                .first(conn)?;
            row.try_into()
        })
        .await
    }

    async fn list_runs(&self, limit: i64) -> RepositoryResult<Vec<ModelRun>> {
        self.with_conn("list_runs", move |conn| {
            use schema::model_runs::dsl::*;
            let rows: Vec<RunRow> = model_runs
                .order(created_at.desc())
                .limit(limit)
                .select(RunRow::as_select())
                .load(conn)?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
        .await
    }

    async fn delete_runs_at(&self, init: DateTime<Utc>) -> RepositoryResult<usize> {
        self.with_conn("delete_runs_at", move |conn| {
            use schema::model_runs::dsl::*;
            // Metric and point-value rows go with the runs via ON DELETE
            // CASCADE.
            let deleted = diesel::delete(model_runs.filter(init_time.eq(init))).execute(conn)?;
            Ok(deleted)
        })
        .await
    }

    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn("health_check", |conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(true)
        })
        .await
    }
}

#[async_trait]
impl MetricRepository for PostgresRepository {
    async fn insert_point_metrics(&self, rows: &[NewPointMetric]) -> RepositoryResult<usize> {
        let rows: Vec<NewPointMetricRow> = rows.iter().map(Into::into).collect();
        self.with_conn("insert_point_metrics", move |conn| {
            let inserted = diesel::insert_into(schema::point_metrics::table)
                .values(&rows)
                .execute(conn)?;
            Ok(inserted)
        })
        .await
    }

    async fn insert_model_point_values(
        &self,
        rows: &[NewModelPointValue],
    ) -> RepositoryResult<usize> {
        let rows: Vec<NewModelPointValueRow> = rows.iter().map(Into::into).collect();
        self.with_conn("insert_model_point_values", move |conn| {
            let inserted = diesel::insert_into(schema::model_point_values::table)
                .values(&rows)
                .execute(conn)?;
            Ok(inserted)
        })
        .await
    }

    async fn delete_point_metrics_for(
        &self,
        run_ids: &[Uuid],
        hours: &[u32],
    ) -> RepositoryResult<usize> {
        let run_ids = run_ids.to_vec();
        let hours: Vec<i32> = hours.iter().map(|h| *h as i32).collect();
        self.with_conn("delete_point_metrics_for", move |conn| {
            use schema::point_metrics::dsl::*;
            let deleted = diesel::delete(
                point_metrics
                    .filter(run_a_id.eq_any(&run_ids).or(run_b_id.eq_any(&run_ids)))
                    .filter(lead_hour.eq_any(&hours)),
            )
            .execute(conn)?;
            Ok(deleted)
        })
        .await
    }

    async fn point_metrics_near(
        &self,
        query: &PointMetricQuery,
    ) -> RepositoryResult<Vec<PointMetric>> {
        let query = query.clone();
        self.with_conn("point_metrics_near", move |conn| {
            use schema::point_metrics::dsl::*;
            let mut stmt = point_metrics
                .select(PointMetricRow::as_select())
                .filter(variable.eq(query.variable.as_str()))
                .filter(lat.between(query.lat - 0.5, query.lat + 0.5))
                .filter(lon.between(query.lon - 0.5, query.lon + 0.5))
                .into_boxed();
            if let Some(hour) = query.lead_hour {
                stmt = stmt.filter(lead_hour.eq(hour as i32));
            }
            let rows: Vec<PointMetricRow> = stmt
                .order(created_at.desc())
                .limit(query.limit)
                .load(conn)?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
        .await
    }

    async fn variable_summary(
        &self,
        var: Variable,
    ) -> RepositoryResult<Option<VariableSummary>> {
        self.with_conn("variable_summary", move |conn| {
            use schema::point_metrics::dsl::*;
            let (mean_spread, max_spread, num_points): (Option<f64>, Option<f64>, i64) =
                point_metrics
                    .filter(variable.eq(var.as_str()))
                    .select((avg(spread), max(spread), count_star()))
                    .get_result(conn)?;
            match (mean_spread, max_spread) {
                (Some(mean_spread), Some(max_spread)) if num_points > 0 => {
                    Ok(Some(VariableSummary {
                        variable: var,
                        mean_spread,
                        max_spread,
                        num_points,
                    }))
                }
                _ => Ok(None),
            }
        })
        .await
    }
}

#[async_trait]
impl SnapshotRepository for PostgresRepository {
    async fn insert_grid_snapshot(
        &self,
        row: &NewGridSnapshot,
    ) -> RepositoryResult<GridSnapshot> {
        let row = NewGridSnapshotRow::try_from(row)?;
        self.with_conn("insert_grid_snapshot", move |conn| {
            let inserted: GridSnapshotRow = diesel::insert_into(schema::grid_snapshots::table)
                .values(&row)
                .returning(GridSnapshotRow::as_returning())
                .get_result(conn)?;
            inserted.try_into()
        })
        .await
    }

    async fn delete_snapshots_for(
        &self,
        init: DateTime<Utc>,
        hours: Option<&[u32]>,
    ) -> RepositoryResult<usize> {
        let hours: Option<Vec<i32>> = hours.map(|h| h.iter().map(|h| *h as i32).collect());
        self.with_conn("delete_snapshots_for", move |conn| {
            use schema::grid_snapshots::dsl::*;
            let deleted = match &hours {
                Some(hours) => diesel::delete(
                    grid_snapshots
                        .filter(init_time.eq(init))
                        .filter(lead_hour.eq_any(hours)),
                )
                .execute(conn)?,
                None => diesel::delete(grid_snapshots.filter(init_time.eq(init)))
                    .execute(conn)?,
            };
            Ok(deleted)
        })
        .await
    }

    async fn latest_snapshot(
        &self,
        var: Variable,
        hour: u32,
        init: Option<DateTime<Utc>>,
    ) -> RepositoryResult<Option<GridSnapshot>> {
        self.with_conn("latest_snapshot", move |conn| {
            use schema::grid_snapshots::dsl::*;
            let mut stmt = grid_snapshots
                .select(GridSnapshotRow::as_select())
                .filter(variable.eq(var.as_str()))
                .filter(lead_hour.eq(hour as i32))
                .into_boxed();
            if let Some(init) = init {
                stmt = stmt.filter(init_time.eq(init));
            }
            let row: Option<GridSnapshotRow> = stmt
                .order((init_time.desc(), created_at.desc()))
                .first(conn)
                .optional()?;
            row.map(TryInto::try_into).transpose()
        })
        .await
    }

    async fn list_snapshots(
        &self,
        var: Option<Variable>,
        limit: i64,
    ) -> RepositoryResult<Vec<GridSnapshot>> {
        self.with_conn("list_snapshots", move |conn| {
            use schema::grid_snapshots::dsl::*;
            let mut stmt = grid_snapshots
                .select(GridSnapshotRow::as_select())
                .into_boxed();
            if let Some(var) = var {
                stmt = stmt.filter(variable.eq(var.as_str()));
            }
            let rows: Vec<GridSnapshotRow> = stmt
                .order(init_time.desc())
                .limit(limit)
                .load(conn)?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
        .await
    }
}
