//! Server-Sent Events endpoint for session status.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tracing::{info, warn};

use crate::handlers::http::AppState;
use crate::middleware::AuthUser;
use crate::models::{StreamMessage, SESSION_STATUS_EVENT};

/// GET /sessions/stream: one `session_status` event per broadcaster interval
/// until the client goes away.
pub async fn session_stream(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(user_id = %user_id, "session stream connected");

    let events = state
        .broadcaster()
        .subscribe(user_id)
        .filter_map(|msg| async move { to_event(&msg).map(Ok::<Event, Infallible>) });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_event(msg: &StreamMessage) -> Option<Event> {
    match Event::default().event(SESSION_STATUS_EVENT).json_data(msg) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "dropping unserializable session status");
            None
        }
    }
}
