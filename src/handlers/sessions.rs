//! Session handlers: listing, manual creation, pause, and end.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::extract::ApiJson;
use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::middleware::AuthUser;
use crate::models::{
    ActiveSession, ActiveSessionsQuery, AggregateStatus, CreateSessionRequest,
    EndSessionRequest, PauseRequest,
};

/// GET /sessions/active?userId=: active and just-ended sessions of the caller.
pub async fn active_sessions(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Query(query): Query<ActiveSessionsQuery>,
) -> Result<Json<Vec<ActiveSession>>, AppError> {
    let user_id = query.user_id.unwrap_or(caller);
    if user_id != caller {
        return Err(AppError::Forbidden(
            "cannot list another user's sessions".to_string(),
        ));
    }
    let sessions = state.broadcaster().snapshot(user_id).await?;
    Ok(Json(sessions))
}

/// POST /sessions: manual start, or create-and-finalize when `endTime` has passed.
pub async fn create_session(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(body): ApiJson<CreateSessionRequest>,
) -> Result<(StatusCode, Json<ActiveSession>), AppError> {
    let session = state.session_service().create(caller, body).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /sessions/:id/status
pub async fn session_status(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<AggregateStatus>, AppError> {
    let status = state
        .pause_aggregator()
        .aggregate_status_for(session_id, caller)
        .await?;
    Ok(Json(status))
}

/// POST /sessions/:id/pause: update the caller's own pause flag.
pub async fn set_pause(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(session_id): Path<Uuid>,
    ApiJson(body): ApiJson<PauseRequest>,
) -> Result<Json<AggregateStatus>, AppError> {
    let status = state
        .pause_aggregator()
        .set_participant_pause(session_id, caller, body.is_paused)
        .await?;
    Ok(Json(status))
}

/// POST /sessions/:id/end
pub async fn end_session(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(session_id): Path<Uuid>,
    ApiJson(body): ApiJson<EndSessionRequest>,
) -> Result<Json<ActiveSession>, AppError> {
    let session = state
        .session_service()
        .end(caller, session_id, body)
        .await?;
    Ok(Json(session))
}
