//! Router configuration for the HTTP API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::state::AppState;

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Create the application router with all routes and middleware.
pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    let api_v1 = Router::new()
        .route("/runs", get(handlers::list_runs))
        .route("/divergence/point", get(handlers::get_point_divergence))
        .route("/divergence/summary", get(handlers::get_divergence_summary))
        .route("/divergence/grid", get(handlers::get_grid_divergence))
        .route(
            "/divergence/grid/snapshots",
            get(handlers::list_grid_snapshots),
        )
        .route("/admin/ingest", post(handlers::trigger_ingest))
        .route("/admin/reset", post(handlers::reset_cycle));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}
