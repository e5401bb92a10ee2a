//! Bearer token validation. Tokens are issued by the identity service and share
//! the HS256 secret with this server.

use crate::error::{AppError, AppResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,
    pub iat: i64,
}

#[derive(Clone)]
pub struct JwtSecret {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtSecret {
    pub fn new(secret: String) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Sign a token for `user_id`. Used by tests and local tooling; production
    /// tokens come from the identity service.
    pub fn issue(&self, user_id: Uuid, ttl: Duration) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Jwt(e.to_string()))
    }

    /// Resolve the authenticated user id carried by `token`.
    pub fn validate(&self, token: &str) -> AppResult<Uuid> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| AppError::Jwt(e.to_string()))?;
        Uuid::parse_str(&data.claims.sub).map_err(|e| AppError::Jwt(format!("bad subject: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_resolves_user() {
        let secret = JwtSecret::new("test-jwt-secret-min-32-chars!!!!".to_string());
        let user = Uuid::new_v4();
        let token = secret.issue(user, Duration::minutes(5)).unwrap();
        assert_eq!(secret.validate(&token).unwrap(), user);
    }

    #[test]
    fn foreign_or_expired_tokens_are_rejected() {
        let ours = JwtSecret::new("test-jwt-secret-min-32-chars!!!!".to_string());
        let theirs = JwtSecret::new("another-secret-of-at-least-32-chars".to_string());
        let user = Uuid::new_v4();

        let token = theirs.issue(user, Duration::minutes(5)).unwrap();
        assert!(matches!(ours.validate(&token), Err(AppError::Jwt(_))));

        let expired = ours.issue(user, Duration::hours(-2)).unwrap();
        assert!(ours.validate(&expired).is_err());
        assert!(ours.validate("not-a-jwt").is_err());
    }
}
