use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One live classroom instance as returned by the Room API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    pub name: String,
    /// Channel name handed to the media transport.
    pub channel_id: String,
    pub host_id: String,
    #[serde(rename = "active", default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Session {
    /// Mark the session as finished. Only the first call has an effect.
    pub fn mark_ended(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.ended_at.get_or_insert(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Host,
    Staff,
    Attendee,
}

impl Role {
    /// Host and staff may approve, remove and mute other participants.
    pub fn can_moderate(self) -> bool {
        matches!(self, Role::Host | Role::Staff)
    }

    /// Host and staff publish local media; attendees only receive.
    pub fn publishes_media(self) -> bool {
        matches!(self, Role::Host | Role::Staff)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Staff => "staff",
            Role::Attendee => "attendee",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// One room occupant's presence and moderation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub identity: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default = "default_approval")]
    pub approval: ApprovalStatus,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_video_off: bool,
    #[serde(default)]
    pub is_hand_raised: bool,
    /// Epoch millis of the raise, used to order the hand queue.
    #[serde(default)]
    pub hand_raised_at: Option<i64>,
}

fn default_approval() -> ApprovalStatus {
    ApprovalStatus::Approved
}

impl Participant {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            role,
            approval: ApprovalStatus::Approved,
            is_muted: false,
            is_video_off: false,
            is_hand_raised: false,
            hand_raised_at: None,
        }
    }

    pub fn with_approval(mut self, approval: ApprovalStatus) -> Self {
        self.approval = approval;
        self
    }
}

/// The local user on whose behalf the controller acts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub identity: String,
    pub display_name: String,
    pub role: Role,
}

impl LocalIdentity {
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            role,
        }
    }

    pub fn as_participant(&self, approval: ApprovalStatus) -> Participant {
        Participant::new(self.identity.clone(), self.display_name.clone(), self.role)
            .with_approval(approval)
    }
}

/// Outcome of a join request. A closed set: anything else from the
/// backend is an [`crate::api::ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinStatus {
    Approved,
    PendingApproval,
    PaymentRequired,
    Denied,
    SessionClosed,
    /// The identity already holds a seat in the room.
    AlreadyJoined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub status: JoinStatus,
    /// The caller's own participant record, when the backend returns it.
    pub participant: Option<Participant>,
}

/// Per-session credential for the media transport.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCredential {
    pub app_id: String,
    pub token: String,
    pub channel_id: String,
    pub uid: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for MediaCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCredential")
            .field("app_id", &self.app_id)
            .field("token", &"[REDACTED]")
            .field("channel_id", &self.channel_id)
            .field("uid", &self.uid)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub name: String,
    #[serde(default)]
    pub course_id: Option<i64>,
    #[serde(default)]
    pub requires_approval: bool,
}
