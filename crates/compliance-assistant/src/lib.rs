pub mod config;
pub mod database;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::state::AppState;

/// HTTP surface over the orchestrator.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let api_routes = Router::new()
        .route("/api/chat", post(handlers::chat::chat_handler))
        .route("/api/chat/stream", post(handlers::chat::chat_stream_handler))
        .route(
            "/api/users/{user_id}/sessions",
            get(handlers::sessions::list_sessions_handler),
        )
        .route(
            "/api/users/{user_id}/facts",
            get(handlers::sessions::list_facts_handler),
        )
        .route(
            "/api/sessions/{session_id}",
            axum::routing::delete(handlers::sessions::delete_session_handler),
        )
        .route(
            "/api/sessions/{session_id}/messages",
            get(handlers::sessions::list_messages_handler),
        )
        .route(
            "/api/sessions/{session_id}/summary",
            get(handlers::sessions::summary_handler),
        );

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
        // CORS
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}
