use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod providers;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use errors::{EngineError, EngineResult};
pub use services::{AppState, EngineDeps, ReadingEngine};

/// Operational surface: health and Prometheus metrics.
pub fn create_router(app_state: Arc<services::AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
