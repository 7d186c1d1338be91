//! Application state for the HTTP server.

use std::sync::Arc;

use crate::db::repository::FullRepository;
use crate::pipeline::Orchestrator;
use crate::store::ArrayStore;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn FullRepository>,
    pub store: Arc<ArrayStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            repository: Arc::clone(orchestrator.repository()),
            store: Arc::clone(orchestrator.array_store()),
            orchestrator,
        }
    }
}
