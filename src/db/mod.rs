//! Relational storage for runs, point metrics and the snapshot catalog.
//!
//! The module follows the repository pattern: trait definitions in
//! [`repository`], an in-memory implementation for unit testing and local
//! development, and a Diesel/Postgres implementation behind the
//! `postgres-repo` feature. The orchestrator and the HTTP layer only ever
//! see `Arc<dyn FullRepository>`.

// Feature flag priority: postgres > local when both are enabled.
#[cfg(not(any(feature = "postgres-repo", feature = "local-repo")))]
compile_error!("Enable at least one repository backend feature.");

pub mod factory;
pub mod repositories;
pub mod repository;

pub use factory::{RepositoryFactory, RepositoryType};
pub use repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use repositories::{PostgresConfig, PostgresRepository};
pub use repository::{
    ErrorContext, FullRepository, MetricRepository, RepositoryError, RepositoryResult,
    RunRepository, SnapshotRepository,
};
