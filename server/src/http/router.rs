//! Axum router configuration with middleware.
//!
//! Health probes and the OpenAPI document live at the root; the memory
//! API is under `/api/v1/` with a request timeout.

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::memory::MemoryService;

const API_TIMEOUT: Duration = Duration::from_secs(60);

pub fn build_router(service: MemoryService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/memory", post(handlers::add_memory))
        .route(
            "/memory/search",
            get(handlers::search_query).post(handlers::search_body),
        )
        .route("/memory/episodes", get(handlers::list_episodes))
        .route(
            "/memory/episodes/{id}",
            get(handlers::get_episode).put(handlers::update_episode),
        )
        .route("/status", get(handlers::status))
        .layer(TimeoutLayer::new(API_TIMEOUT));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/openapi.json", get(handlers::openapi))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}
