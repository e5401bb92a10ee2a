//! Shared focus sessions built with Rust.
//!
//! Tracks user presence from heartbeats, auto-creates exactly one session per
//! pair of online friends via a deterministic leader rule, aggregates
//! per-participant pause flags, streams session status to clients, and ships the
//! client-side state machine that reconciles local timers with the server.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::{PauseAggregator, PresenceService, SessionCoordinator};

use axum::routing::{get, post};
use handlers::http;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router (presence, sessions, stream, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let presence_routes = axum::Router::new()
        .route("/heartbeat", post(handlers::heartbeat))
        .route("/friends", get(handlers::friends_status));

    let session_routes = axum::Router::new()
        .route("/", post(handlers::create_session))
        .route("/active", get(handlers::active_sessions))
        .route("/stream", get(handlers::session_stream))
        .route("/:id/status", get(handlers::session_status))
        .route("/:id/pause", post(handlers::set_pause))
        .route("/:id/end", post(handlers::end_session));

    axum::Router::new()
        .route("/health", get(http::health))
        .nest("/presence", presence_routes)
        .nest("/sessions", session_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
