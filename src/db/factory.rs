//! Repository factory for dependency injection.
//!
//! The scheduler and the server binary construct one repository here and
//! inject it everywhere else as `Arc<dyn FullRepository>`.

use std::str::FromStr;
use std::sync::Arc;

use super::repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
use super::repositories::{PostgresConfig, PostgresRepository};
use super::repository::{FullRepository, RepositoryResult};

/// Repository backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryType {
    /// Diesel/Postgres implementation.
    Postgres,
    /// In-memory local repository.
    Local,
}

impl FromStr for RepositoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown repository type: {}", other)),
        }
    }
}

impl RepositoryType {
    /// Read `REPOSITORY_TYPE`, defaulting to Postgres when a database URL is
    /// present and Local otherwise.
    pub fn from_env() -> Self {
        if let Ok(val) = std::env::var("REPOSITORY_TYPE") {
            return val.parse().unwrap_or(Self::Local);
        }
        if std::env::var("DATABASE_URL").is_ok() {
            Self::Postgres
        } else {
            Self::Local
        }
    }
}

pub struct RepositoryFactory;

impl RepositoryFactory {
    pub fn create_local() -> Arc<dyn FullRepository> {
        Arc::new(LocalRepository::new())
    }

    #[cfg(feature = "postgres-repo")]
    pub fn create_postgres(config: &PostgresConfig) -> RepositoryResult<Arc<dyn FullRepository>> {
        let repo = PostgresRepository::new(config.clone())?;
        Ok(Arc::new(repo))
    }

    /// Create a repository for the requested backend.
    pub fn create(repo_type: RepositoryType) -> RepositoryResult<Arc<dyn FullRepository>> {
        match repo_type {
            RepositoryType::Local => Ok(Self::create_local()),
            #[cfg(feature = "postgres-repo")]
            RepositoryType::Postgres => {
                let config = PostgresConfig::from_env()
                    .map_err(super::repository::RepositoryError::configuration)?;
                Self::create_postgres(&config)
            }
            #[cfg(not(feature = "postgres-repo"))]
            RepositoryType::Postgres => Err(super::repository::RepositoryError::configuration(
                "postgres-repo feature is not enabled",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repository_types() {
        assert_eq!("postgres".parse::<RepositoryType>().unwrap(), RepositoryType::Postgres);
        assert_eq!("pg".parse::<RepositoryType>().unwrap(), RepositoryType::Postgres);
        assert_eq!("local".parse::<RepositoryType>().unwrap(), RepositoryType::Local);
        assert!("sqlite".parse::<RepositoryType>().is_err());
    }

    #[test]
    fn local_factory_builds() {
        let repo = RepositoryFactory::create_local();
        let _ = repo;
    }
}
