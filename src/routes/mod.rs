pub mod auth;
pub mod error;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod status;
pub mod version;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Build the API router. `/merge`, `/download/{id}` and `/version` require the
/// bearer token when one is configured.
pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;

    let protected = Router::new()
        .route("/merge", post(jobs::submit_merge))
        .route("/download/{id}", get(status::download))
        .route("/version", get(version::version))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/process", post(jobs::submit_process))
        .route("/status/{id}", get(status::get_status))
        .merge(protected)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
