//! Shared state, health, and presence handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use std::sync::Arc;

use crate::auth::JwtSecret;
use crate::config::Config;
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{FriendPresence, HeartbeatResponse};
use crate::repositories::{FocusStore, FriendGraph};
use crate::services::{
    PauseAggregator, PresenceService, SessionBroadcaster, SessionCoordinator, SessionService,
};

/// Shared application state for HTTP and stream handlers.
#[derive(Clone)]
pub struct AppState {
    pub presence_service: PresenceService,
    pub coordinator: SessionCoordinator,
    pub pause_aggregator: PauseAggregator,
    pub session_service: SessionService,
    pub broadcaster: SessionBroadcaster,
    pub jwt_secret: JwtSecret,
}

impl AppState {
    /// Wire every service over one store and friend graph.
    pub fn new(store: Arc<dyn FocusStore>, friends: Arc<dyn FriendGraph>, config: &Config) -> Self {
        let presence_service = PresenceService::new(store.clone(), friends, config.online_window);
        let coordinator = SessionCoordinator::new(store.clone(), presence_service.clone());
        Self {
            coordinator,
            pause_aggregator: PauseAggregator::new(store.clone()),
            session_service: SessionService::new(store.clone()),
            broadcaster: SessionBroadcaster::new(
                store,
                config.recent_end_window,
                config.stream_interval,
            ),
            presence_service,
            jwt_secret: JwtSecret::new(config.jwt_secret.clone()),
        }
    }

    pub fn jwt_secret(&self) -> &JwtSecret {
        &self.jwt_secret
    }
    pub fn presence_service(&self) -> &PresenceService {
        &self.presence_service
    }
    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }
    pub fn pause_aggregator(&self) -> &PauseAggregator {
        &self.pause_aggregator
    }
    pub fn session_service(&self) -> &SessionService {
        &self.session_service
    }
    pub fn broadcaster(&self) -> &SessionBroadcaster {
        &self.broadcaster
    }
}

/// POST /presence/heartbeat: record liveness, then look for pair sessions in the background.
pub async fn heartbeat(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<HeartbeatResponse>, AppError> {
    let last_seen_at = state.presence_service().record_heartbeat(user_id).await?;
    state.coordinator().spawn_for(user_id);
    Ok(Json(HeartbeatResponse {
        ok: true,
        last_seen_at,
    }))
}

/// GET /presence/friends
pub async fn friends_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<FriendPresence>>, AppError> {
    let friends = state
        .presence_service()
        .friends_online_status(user_id)
        .await?;
    Ok(Json(friends))
}

/// GET /health: liveness probe.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "focus-sync" })),
    )
}
