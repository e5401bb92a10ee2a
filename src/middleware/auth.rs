//! Auth extractor: resolves the calling user from a JWT bearer token.

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::http::AppState;

/// Query fallback for clients that cannot set headers (EventSource).
#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Extractor: authenticated user ID from `Authorization: Bearer <jwt>` or the
/// `access_token` query parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthUser(pub Uuid);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|TypedHeader(Authorization(bearer))| bearer.token().to_string());

        let token = match bearer {
            Some(token) => token,
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.access_token)
                .ok_or_else(|| {
                    debug!(path = %parts.uri.path(), "rejected request without credentials");
                    AppError::Unauthorized("Missing or invalid Authorization header".to_string())
                })?,
        };

        let user_id = state.jwt_secret().validate(&token)?;
        Ok(AuthUser(user_id))
    }
}
