//! Errors seen by the device side.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request did not complete: connection refused, timeout, dropped response.
    #[error("network error: {0}")]
    Transient(String),

    /// The server answered with an error status.
    #[error("server returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("invalid response: {0}")]
    Decode(String),

    /// The operation does not apply to the tracker's current phase.
    #[error("cannot {0} in the current phase")]
    InvalidState(&'static str),
}

impl ClientError {
    pub fn is_already_ended(&self) -> bool {
        matches!(self, ClientError::Api { code, .. } if code == "already_ended")
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transient(e.to_string())
        }
    }
}

/// Error body written by the server: `{"error": "...", "code": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

pub type ClientResult<T> = Result<T, ClientError>;
