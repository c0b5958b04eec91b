//! Room API client.
//!
//! Stateless request/response wrapper over the live-session REST endpoints.
//! Every call resolves to one of: a success payload, a domain status
//! ([`JoinStatus`] for joins), or an [`ApiError`] whose class tells the
//! controller whether a retry makes sense.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::models::{
    CreateSessionRequest, JoinOutcome, JoinStatus, LocalIdentity, MediaCredential, Participant,
    Role, Session,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SESSIONS_PATH: &str = "api/live-sessions";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not authorized (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("not found")]
    NotFound,
    #[error("request rejected (HTTP {status}): {message}")]
    Client { status: u16, message: String },
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Transport failures, timeouts and 5xx may succeed on retry; 4xx need
    /// user action first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Transport(_) | Self::Server { .. })
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        let code = status.as_u16();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized { status: code },
            StatusCode::NOT_FOUND => Self::NotFound,
            s if s.is_server_error() => Self::Server { status: code, message: body },
            _ => Self::Client { status: code, message: body },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait RoomApi: Send + Sync {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<Session, ApiError>;
    async fn join_as_attendee(&self, session_id: i64, local: &LocalIdentity) -> Result<JoinOutcome, ApiError>;
    async fn join_as_staff(&self, session_id: i64, local: &LocalIdentity) -> Result<JoinOutcome, ApiError>;
    async fn get_active_sessions(&self) -> Result<Vec<Session>, ApiError>;
    async fn get_session(&self, session_id: i64) -> Result<Session, ApiError>;
    async fn get_participants(&self, session_id: i64) -> Result<Vec<Participant>, ApiError>;
    async fn get_media_credential(&self, channel_id: &str, identity: &str, role: Role) -> Result<MediaCredential, ApiError>;
    async fn approve_participant(&self, session_id: i64, identity: &str) -> Result<(), ApiError>;
    async fn remove_participant(&self, session_id: i64, identity: &str) -> Result<(), ApiError>;
    async fn mute_participant(&self, session_id: i64, identity: &str, muted: bool) -> Result<(), ApiError>;
    async fn end_session(&self, session_id: i64) -> Result<(), ApiError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequestBody<'a> {
    identity: &'a str,
    display_name: &'a str,
    role: Role,
}

#[derive(Deserialize)]
struct JoinResponseBody {
    status: JoinStatus,
    #[serde(default)]
    participant: Option<Participant>,
}

#[derive(Serialize)]
struct MuteBody {
    muted: bool,
}

/// [`RoomApi`] over HTTP/JSON.
pub struct HttpRoomApi {
    client: reqwest::Client,
    base: Url,
    access_token: Option<String>,
}

impl HttpRoomApi {
    pub fn new(base: Url, access_token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            access_token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut path = SESSIONS_PATH.to_string();
        for segment in segments {
            path.push('/');
            path.push_str(&urlencoding::encode(segment));
        }
        let raw = format!("{}/{}", self.base.as_str().trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| ApiError::Transport(format!("invalid url {raw}: {e}")))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let resp = self.authorize(builder).send().await?;
        tracing::debug!("{} -> {}", resp.url(), resp.status());
        Ok(resp)
    }

    async fn error_for(resp: Response) -> ApiError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        ApiError::from_status(status, body)
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn empty(resp: Response) -> Result<(), ApiError> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(resp).await)
        }
    }

    async fn join(&self, session_id: i64, local: &LocalIdentity, endpoint: &str) -> Result<JoinOutcome, ApiError> {
        let id = session_id.to_string();
        let url = self.url(&[id.as_str(), endpoint])?;
        let body = JoinRequestBody {
            identity: &local.identity,
            display_name: &local.display_name,
            role: local.role,
        };
        tracing::info!("join request: session={session_id} identity={} via {endpoint}", local.identity);
        let resp = self.send(self.client.post(url).json(&body)).await?;

        // These statuses are outcomes, not failures.
        let status = match resp.status() {
            StatusCode::PAYMENT_REQUIRED => Some(JoinStatus::PaymentRequired),
            StatusCode::CONFLICT => Some(JoinStatus::AlreadyJoined),
            StatusCode::GONE => Some(JoinStatus::SessionClosed),
            _ => None,
        };
        if let Some(status) = status {
            return Ok(JoinOutcome {
                status,
                participant: None,
            });
        }

        let body: JoinResponseBody = Self::json(resp).await?;
        Ok(JoinOutcome {
            status: body.status,
            participant: body.participant,
        })
    }
}

#[async_trait]
impl RoomApi for HttpRoomApi {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<Session, ApiError> {
        let url = self.url(&[])?;
        let resp = self.send(self.client.post(url).json(request)).await?;
        Self::json(resp).await
    }

    async fn join_as_attendee(&self, session_id: i64, local: &LocalIdentity) -> Result<JoinOutcome, ApiError> {
        self.join(session_id, local, "join").await
    }

    async fn join_as_staff(&self, session_id: i64, local: &LocalIdentity) -> Result<JoinOutcome, ApiError> {
        self.join(session_id, local, "join-staff").await
    }

    async fn get_active_sessions(&self) -> Result<Vec<Session>, ApiError> {
        let url = self.url(&["active"])?;
        let resp = self.send(self.client.get(url)).await?;
        Self::json(resp).await
    }

    async fn get_session(&self, session_id: i64) -> Result<Session, ApiError> {
        let url = self.url(&[session_id.to_string().as_str()])?;
        let resp = self.send(self.client.get(url)).await?;
        Self::json(resp).await
    }

    async fn get_participants(&self, session_id: i64) -> Result<Vec<Participant>, ApiError> {
        let url = self.url(&[session_id.to_string().as_str(), "participants"])?;
        let resp = self.send(self.client.get(url)).await?;
        Self::json(resp).await
    }

    async fn get_media_credential(&self, channel_id: &str, identity: &str, role: Role) -> Result<MediaCredential, ApiError> {
        let url = self.url(&["media-token"])?;
        let query = [("channel", channel_id), ("identity", identity), ("role", role.as_str())];
        let resp = self.send(self.client.get(url).query(&query)).await?;
        Self::json(resp).await
    }

    async fn approve_participant(&self, session_id: i64, identity: &str) -> Result<(), ApiError> {
        let url = self.url(&[session_id.to_string().as_str(), "participants", identity, "approve"])?;
        let resp = self.send(self.client.post(url)).await?;
        Self::empty(resp).await
    }

    async fn remove_participant(&self, session_id: i64, identity: &str) -> Result<(), ApiError> {
        let url = self.url(&[session_id.to_string().as_str(), "participants", identity])?;
        let resp = self.send(self.client.delete(url)).await?;
        Self::empty(resp).await
    }

    async fn mute_participant(&self, session_id: i64, identity: &str, muted: bool) -> Result<(), ApiError> {
        let url = self.url(&[session_id.to_string().as_str(), "participants", identity, "mute"])?;
        let resp = self.send(self.client.post(url).json(&MuteBody { muted })).await?;
        Self::empty(resp).await
    }

    async fn end_session(&self, session_id: i64) -> Result<(), ApiError> {
        let url = self.url(&[session_id.to_string().as_str(), "end"])?;
        let resp = self.send(self.client.post(url)).await?;
        Self::empty(resp).await
    }
}
