//! Repository traits and the error surface shared by every backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::models::{
    GridSnapshot, ModelRun, NewGridSnapshot, NewModelPointValue, NewPointMetric, PointMetric,
    PointMetricQuery, RunStatus, Variable, VariableSummary,
};

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Structured context attached to repository errors.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation being performed (e.g. "insert_run").
    pub operation: Option<String>,
    /// The entity involved (e.g. "model_run").
    pub entity: Option<String>,
    /// The entity id, when there is one.
    pub entity_id: Option<String>,
    /// Free-form details.
    pub details: Option<String>,
    /// Whether retrying the operation can succeed.
    pub retryable: bool,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn with_entity_id(mut self, id: impl ToString) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(ref entity) = self.entity {
            parts.push(format!("entity={}", entity));
        }
        if let Some(ref id) = self.entity_id {
            parts.push(format!("id={}", id));
        }
        if let Some(ref details) = self.details {
            parts.push(format!("details={}", details));
        }
        if self.retryable {
            parts.push("retryable=true".to_string());
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Error type for repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Connection pool or database connection errors; typically transient.
    #[error("connection error: {message} {context}")]
    Connection {
        message: String,
        context: ErrorContext,
    },

    /// Query execution errors.
    #[error("query error: {message} {context}")]
    Query {
        message: String,
        context: ErrorContext,
    },

    /// The requested entity does not exist.
    #[error("not found: {message} {context}")]
    NotFound {
        message: String,
        context: ErrorContext,
    },

    /// A non-error run already exists for this `(model_name, init_time)`.
    #[error("duplicate run: {message} {context}")]
    DuplicateRun {
        message: String,
        context: ErrorContext,
    },

    /// Configuration or initialization error.
    #[error("configuration error: {message} {context}")]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {message} {context}")]
    Internal {
        message: String,
        context: ErrorContext,
    },
}

impl RepositoryError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            context: ErrorContext::default().retryable(),
        }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn query_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Query {
            message: message.into(),
            context,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn duplicate_run(model_name: &str, init_time: DateTime<Utc>) -> Self {
        Self::DuplicateRun {
            message: format!("{} already has a run at {}", model_name, init_time),
            context: ErrorContext::new("insert_run").with_entity("model_run"),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateRun { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { context, .. } | Self::Query { context, .. } => context.retryable,
            _ => false,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Connection { context, .. }
            | Self::Query { context, .. }
            | Self::NotFound { context, .. }
            | Self::DuplicateRun { context, .. }
            | Self::Configuration { context, .. }
            | Self::Internal { context, .. } => context,
        }
    }

    /// Attach or replace the operation name in the context.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        match &mut self {
            Self::Connection { context, .. }
            | Self::Query { context, .. }
            | Self::NotFound { context, .. }
            | Self::DuplicateRun { context, .. }
            | Self::Configuration { context, .. }
            | Self::Internal { context, .. } => {
                context.operation = Some(operation.into());
            }
        }
        self
    }
}

/// Run lifecycle operations.
///
/// # Thread safety
/// Implementations must be `Send + Sync`; the scheduler shares one instance
/// across concurrently running orchestrators.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Create a `pending` run row.
    ///
    /// The idempotency probe and the insert are atomic: a unique constraint
    /// over non-error rows (or the in-memory equivalent under one lock)
    /// makes a racing insert fail with [`RepositoryError::DuplicateRun`].
    async fn insert_run(
        &self,
        model_name: &str,
        init_time: DateTime<Utc>,
    ) -> RepositoryResult<ModelRun>;

    /// The non-error run for `(model_name, init_time)`, if any.
    async fn find_active_run(
        &self,
        model_name: &str,
        init_time: DateTime<Utc>,
    ) -> RepositoryResult<Option<ModelRun>>;

    /// All `complete` runs at an init time, across models.
    async fn find_completed_runs_at(
        &self,
        init_time: DateTime<Utc>,
    ) -> RepositoryResult<Vec<ModelRun>>;

    /// Move a run to a new status, optionally replacing its forecast hours.
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        forecast_hours: Option<Vec<u32>>,
    ) -> RepositoryResult<()>;

    async fn get_run(&self, run_id: Uuid) -> RepositoryResult<ModelRun>;

    /// Newest-first run listing.
    async fn list_runs(&self, limit: i64) -> RepositoryResult<Vec<ModelRun>>;

    /// Reset path: delete every run at `init_time` along with its metric and
    /// point-value rows. Snapshot catalog rows are handled separately.
    async fn delete_runs_at(&self, init_time: DateTime<Utc>) -> RepositoryResult<usize>;

    async fn health_check(&self) -> RepositoryResult<bool>;
}

/// Point metric storage and the read queries the HTTP layer uses.
#[async_trait]
pub trait MetricRepository: Send + Sync {
    async fn insert_point_metrics(&self, rows: &[NewPointMetric]) -> RepositoryResult<usize>;

    async fn insert_model_point_values(
        &self,
        rows: &[NewModelPointValue],
    ) -> RepositoryResult<usize>;

    /// Remove pair rows touching any of `run_ids` at the given lead hours,
    /// ahead of recomputation.
    async fn delete_point_metrics_for(
        &self,
        run_ids: &[Uuid],
        lead_hours: &[u32],
    ) -> RepositoryResult<usize>;

    /// Proximity query (±0.5°), newest first.
    async fn point_metrics_near(
        &self,
        query: &PointMetricQuery,
    ) -> RepositoryResult<Vec<PointMetric>>;

    /// Aggregate spread statistics; `None` when no rows exist for the
    /// variable.
    async fn variable_summary(
        &self,
        variable: Variable,
    ) -> RepositoryResult<Option<VariableSummary>>;
}

/// Grid snapshot catalog.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn insert_grid_snapshot(
        &self,
        row: &NewGridSnapshot,
    ) -> RepositoryResult<GridSnapshot>;

    /// Remove catalog rows for an init time, optionally restricted to a set
    /// of lead hours.
    async fn delete_snapshots_for(
        &self,
        init_time: DateTime<Utc>,
        lead_hours: Option<&[u32]>,
    ) -> RepositoryResult<usize>;

    /// Newest snapshot for `(variable, lead_hour)`, optionally pinned to an
    /// init time.
    async fn latest_snapshot(
        &self,
        variable: Variable,
        lead_hour: u32,
        init_time: Option<DateTime<Utc>>,
    ) -> RepositoryResult<Option<GridSnapshot>>;

    /// Newest-first snapshot listing.
    async fn list_snapshots(
        &self,
        variable: Option<Variable>,
        limit: i64,
    ) -> RepositoryResult<Vec<GridSnapshot>>;
}

/// The full persistence surface the orchestrator and HTTP layer share.
pub trait FullRepository: RunRepository + MetricRepository + SnapshotRepository {}

impl<T> FullRepository for T where T: RunRepository + MetricRepository + SnapshotRepository {}
