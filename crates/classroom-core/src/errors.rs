use thiserror::Error;

use crate::api::ApiError;
use crate::control::ControlError;
use crate::media::MediaError;
use crate::state::LifecycleState;

#[derive(Debug, Error)]
pub enum ClassroomError {
    #[error("failed to load room: {0}")]
    RoomLoad(#[source] ApiError),
    #[error("join request failed: {0}")]
    Join(#[source] ApiError),
    #[error("{action} failed: {source}")]
    Moderation {
        action: &'static str,
        #[source]
        source: ApiError,
    },
    #[error("end session failed: {0}")]
    EndSession(#[source] ApiError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("operation not allowed in state {0:?}")]
    InvalidState(LifecycleState),
    #[error("only a host or staff member can {0}")]
    NotPermitted(&'static str),
    #[error("no room loaded")]
    NoSession,
    #[error("session was torn down while the request was in flight")]
    Cancelled,
    #[error("chat message is empty")]
    EmptyMessage,
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClassroomError {
    /// Whether the caller may reasonably retry the same intent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RoomLoad(e)
            | Self::Join(e)
            | Self::EndSession(e)
            | Self::Api(e)
            | Self::Moderation { source: e, .. } => e.is_retryable(),
            Self::Control(_) => true,
            _ => false,
        }
    }
}
