//! The session endpoints as seen from a device, and their HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use super::error::{ClientError, ClientResult, ErrorBody};
use super::sse::SseDecoder;
use crate::models::{
    ActiveSession, AggregateStatus, CreateSessionRequest, EndSessionRequest, PauseRequest,
};

/// Calls the reconciliation state machine makes against the server, on behalf
/// of the signed-in user.
#[async_trait]
pub trait SessionApi: Send + Sync + 'static {
    /// Active and just-ended sessions of the signed-in user.
    async fn active_sessions(&self) -> ClientResult<Vec<ActiveSession>>;

    async fn set_pause(&self, session_id: Uuid, is_paused: bool) -> ClientResult<AggregateStatus>;

    async fn end_session(
        &self,
        session_id: Uuid,
        body: EndSessionRequest,
    ) -> ClientResult<ActiveSession>;

    async fn create_session(&self, body: CreateSessionRequest) -> ClientResult<ActiveSession>;
}

/// Per-request deadline for the JSON endpoints. The event stream is exempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`SessionApi`] over HTTP with a bearer token.
#[derive(Clone)]
pub struct HttpSessionApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
    request_timeout: Duration,
}

impl HttpSessionApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, base_url, token))
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Open `GET /sessions/stream` and decode it into session snapshots. The
    /// stream ends when the connection drops; callers fall back to polling.
    pub async fn session_feed(
        &self,
    ) -> ClientResult<impl Stream<Item = Vec<ActiveSession>> + Send + 'static> {
        let resp = self
            .http
            .get(self.url("/sessions/stream"))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = check(resp).await?;

        let bytes = resp.bytes_stream();
        let feed = bytes
            .scan(SseDecoder::new(), |decoder, chunk| {
                let messages = match chunk {
                    Ok(chunk) => decoder.push(&chunk),
                    Err(e) => {
                        debug!(error = %e, "session feed interrupted");
                        return futures::future::ready(None);
                    }
                };
                futures::future::ready(Some(stream::iter(messages)))
            })
            .flatten()
            .map(|msg| msg.into_sessions());
        Ok(feed)
    }
}

async fn check(resp: Response) -> ClientResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.json::<ErrorBody>().await.ok();
    Err(api_error(status, body))
}

fn api_error(status: StatusCode, body: Option<ErrorBody>) -> ClientError {
    let (message, code) = match body {
        Some(body) => (body.error, body.code),
        None => (status.to_string(), None),
    };
    ClientError::Api {
        status: status.as_u16(),
        code: code.unwrap_or_else(|| "unknown".to_string()),
        message,
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ClientResult<T> {
    let resp = check(resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn active_sessions(&self) -> ClientResult<Vec<ActiveSession>> {
        let resp = self
            .http
            .get(self.url("/sessions/active"))
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .send()
            .await?;
        decode(resp).await
    }

    async fn set_pause(&self, session_id: Uuid, is_paused: bool) -> ClientResult<AggregateStatus> {
        let resp = self
            .http
            .post(self.url(&format!("/sessions/{}/pause", session_id)))
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .json(&PauseRequest { is_paused })
            .send()
            .await?;
        decode(resp).await
    }

    async fn end_session(
        &self,
        session_id: Uuid,
        body: EndSessionRequest,
    ) -> ClientResult<ActiveSession> {
        let resp = self
            .http
            .post(self.url(&format!("/sessions/{}/end", session_id)))
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;
        decode(resp).await
    }

    async fn create_session(&self, body: CreateSessionRequest) -> ClientResult<ActiveSession> {
        let resp = self
            .http
            .post(self.url("/sessions"))
            .bearer_auth(&self.token)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;
        decode(resp).await
    }
}
