use std::collections::BTreeSet;

use crate::chat::ChatLog;
use crate::events::{ChatMessage, ConnectionState};
use crate::models::{Participant, Session};
use crate::participants::ParticipantManager;

/// Where the local user is in the room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Loading,
    JoinRequested,
    PendingApproval,
    Joined,
    Denied,
    PaymentRequired,
    Closed,
    MediaConnecting,
    MediaConnected,
    Ended,
}

impl LifecycleState {
    /// Admitted to the room, with or without media.
    pub fn is_member(self) -> bool {
        matches!(
            self,
            LifecycleState::Joined | LifecycleState::MediaConnecting | LifecycleState::MediaConnected
        )
    }

    /// Join outcomes that only an explicit `join()` moves out of.
    pub fn is_rejected(self) -> bool {
        matches!(
            self,
            LifecycleState::Denied | LifecycleState::PaymentRequired | LifecycleState::Closed
        )
    }

    /// A room is loaded and the local user has not left it.
    pub fn in_room(self) -> bool {
        !matches!(self, LifecycleState::Idle | LifecycleState::Loading | LifecycleState::Ended)
    }
}

/// Mutable state of the current room, guarded by the controller.
pub struct RoomState {
    pub lifecycle: LifecycleState,
    pub session: Option<Session>,
    pub participants: ParticipantManager,
    pub remote_peers: BTreeSet<u32>,
    pub local_muted: bool,
    pub local_video_off: bool,
    pub chat: ChatLog,
    pub control_state: ConnectionState,
    pub media_state: ConnectionState,
    pub join_in_flight: bool,
    pub end_in_flight: bool,
    /// Media init already ran for this membership.
    pub media_started: bool,
    /// Approval push seen while the join request was still in flight.
    pub approved_early: bool,
}

impl RoomState {
    pub fn new() -> Self {
        Self {
            lifecycle: LifecycleState::Idle,
            session: None,
            participants: ParticipantManager::new(),
            remote_peers: BTreeSet::new(),
            local_muted: false,
            local_video_off: false,
            chat: ChatLog::new(),
            control_state: ConnectionState::Disconnected,
            media_state: ConnectionState::Disconnected,
            join_in_flight: false,
            end_in_flight: false,
            media_started: false,
            approved_early: false,
        }
    }

    pub fn joined(&self) -> bool {
        self.lifecycle.is_member()
    }

    pub fn session_id(&self) -> Option<i64> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Drop everything tied to the current membership, keeping the session
    /// record and the lifecycle.
    pub fn reset_membership(&mut self) {
        self.participants.clear();
        self.remote_peers.clear();
        self.chat.clear();
        self.control_state = ConnectionState::Disconnected;
        self.media_state = ConnectionState::Disconnected;
        self.join_in_flight = false;
        self.end_in_flight = false;
        self.media_started = false;
        self.approved_early = false;
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            lifecycle: self.lifecycle,
            joined: self.joined(),
            session: self.session.clone(),
            participants: self.participants.participants().to_vec(),
            raised_hands: self.participants.raised_hands(),
            remote_peers: self.remote_peers.iter().copied().collect(),
            local_muted: self.local_muted,
            local_video_off: self.local_video_off,
            chat_messages: self.chat.messages().to_vec(),
            control_state: self.control_state.clone(),
            media_state: self.media_state.clone(),
        }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub lifecycle: LifecycleState,
    pub joined: bool,
    pub session: Option<Session>,
    pub participants: Vec<Participant>,
    /// Identities with a raised hand, oldest first.
    pub raised_hands: Vec<String>,
    pub remote_peers: Vec<u32>,
    pub local_muted: bool,
    pub local_video_off: bool,
    pub chat_messages: Vec<ChatMessage>,
    pub control_state: ConnectionState,
    pub media_state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn joined_is_derived_from_lifecycle() {
        let mut state = RoomState::new();
        for (lifecycle, joined) in [
            (LifecycleState::Idle, false),
            (LifecycleState::PendingApproval, false),
            (LifecycleState::Joined, true),
            (LifecycleState::MediaConnecting, true),
            (LifecycleState::MediaConnected, true),
            (LifecycleState::Ended, false),
        ] {
            state.lifecycle = lifecycle;
            assert_eq!(state.joined(), joined, "{lifecycle:?}");
            assert_eq!(state.snapshot().joined, joined);
        }
    }

    #[test]
    fn rejected_states() {
        assert!(LifecycleState::Denied.is_rejected());
        assert!(LifecycleState::Closed.is_rejected());
        assert!(!LifecycleState::Joined.is_rejected());
        assert!(!LifecycleState::Ended.in_room());
        assert!(LifecycleState::PendingApproval.in_room());
    }

    #[test]
    fn reset_membership_keeps_session_and_lifecycle() {
        let mut state = RoomState::new();
        state.lifecycle = LifecycleState::Ended;
        state
            .participants
            .upsert(Participant::new("s1", "Sam", Role::Attendee));
        state.remote_peers.insert(7);
        state.media_started = true;
        state.control_state = ConnectionState::Connected;

        state.reset_membership();
        let snap = state.snapshot();
        assert_eq!(snap.lifecycle, LifecycleState::Ended);
        assert!(snap.participants.is_empty());
        assert!(snap.remote_peers.is_empty());
        assert_eq!(snap.control_state, ConnectionState::Disconnected);
        assert!(!state.media_started);
    }

    #[test]
    fn snapshot_orders_remote_peers() {
        let mut state = RoomState::new();
        state.remote_peers.extend([30, 10, 20]);
        assert_eq!(state.snapshot().remote_peers, vec![10, 20, 30]);
    }
}
