//! Hub frames. JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::control::ControlError;
use crate::events::ChatMessage;
use crate::models::Participant;

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlEvent {
    /// Full roster, pushed after every (re)connect.
    RosterSnapshot { participants: Vec<Participant> },
    ParticipantJoined { participant: Participant },
    ParticipantLeft { identity: String },
    ParticipantApproved { identity: String },
    ParticipantRemoved { identity: String },
    SessionEnded {
        #[serde(default)]
        session_id: Option<i64>,
    },
    HandRaised {
        identity: String,
        #[serde(default)]
        raised_at: Option<i64>,
    },
    HandLowered { identity: String },
    MuteToggled { identity: String, muted: bool },
    VideoToggled { identity: String, video_off: bool },
    ChatMessage { message: ChatMessage },
}

/// Client → server invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Invocation {
    JoinRoom { session_id: i64 },
    LeaveRoom { session_id: i64 },
    Approve { session_id: i64, identity: String },
    Remove { session_id: i64, identity: String },
    EndSession { session_id: i64 },
    SendMessage { session_id: i64, message: ChatMessage },
    RaiseHand { session_id: i64 },
    LowerHand { session_id: i64 },
    ToggleMute { session_id: i64, identity: String, muted: bool },
    ToggleVideo { session_id: i64, identity: String, video_off: bool },
}

impl Invocation {
    pub fn name(&self) -> &'static str {
        match self {
            Invocation::JoinRoom { .. } => "joinRoom",
            Invocation::LeaveRoom { .. } => "leaveRoom",
            Invocation::Approve { .. } => "approve",
            Invocation::Remove { .. } => "remove",
            Invocation::EndSession { .. } => "endSession",
            Invocation::SendMessage { .. } => "sendMessage",
            Invocation::RaiseHand { .. } => "raiseHand",
            Invocation::LowerHand { .. } => "lowerHand",
            Invocation::ToggleMute { .. } => "toggleMute",
            Invocation::ToggleVideo { .. } => "toggleVideo",
        }
    }
}

pub fn decode_event(frame: &str) -> Result<ControlEvent, ControlError> {
    serde_json::from_str(frame).map_err(|e| ControlError::Decode(e.to_string()))
}

pub fn encode_invocation(invocation: &Invocation) -> Result<String, ControlError> {
    serde_json::to_string(invocation).map_err(|e| ControlError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApprovalStatus, Role};

    #[test]
    fn decodes_roster_snapshot() {
        let frame = r#"{
            "type": "rosterSnapshot",
            "participants": [
                {"identity": "t1", "displayName": "Teacher", "role": "host"},
                {"identity": "s1", "displayName": "Sam", "role": "attendee", "approval": "pending"}
            ]
        }"#;
        match decode_event(frame).unwrap() {
            ControlEvent::RosterSnapshot { participants } => {
                assert_eq!(participants.len(), 2);
                assert_eq!(participants[0].role, Role::Host);
                assert_eq!(participants[1].approval, ApprovalStatus::Pending);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn decodes_camel_case_fields() {
        let ev = decode_event(r#"{"type":"videoToggled","identity":"s1","videoOff":true}"#).unwrap();
        assert_eq!(
            ev,
            ControlEvent::VideoToggled {
                identity: "s1".to_string(),
                video_off: true
            }
        );

        let ev = decode_event(r#"{"type":"sessionEnded"}"#).unwrap();
        assert_eq!(ev, ControlEvent::SessionEnded { session_id: None });
    }

    #[test]
    fn chat_message_without_id_is_accepted() {
        let ev = decode_event(
            r#"{"type":"chatMessage","message":{"senderIdentity":"t1","senderName":"Teacher","text":"hi","timestampMs":1}}"#,
        )
        .unwrap();
        let ControlEvent::ChatMessage { message } = ev else {
            panic!("unexpected event {ev:?}");
        };
        assert!(message.id.is_empty());
        assert_eq!(message.text, "hi");

        // id-less messages are never treated as duplicates of each other
        let mut log = crate::chat::ChatLog::new();
        assert!(log.push(message.clone()));
        assert!(log.push(message));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn rejects_unknown_or_malformed_frames() {
        assert!(matches!(
            decode_event(r#"{"type":"somethingNew","x":1}"#),
            Err(ControlError::Decode(_))
        ));
        assert!(matches!(
            decode_event(r#"{"type":"muteToggled","identity":"s1"}"#),
            Err(ControlError::Decode(_))
        ));
        assert!(matches!(decode_event("not json"), Err(ControlError::Decode(_))));
    }

    #[test]
    fn encodes_invocation_with_tag() {
        let text = encode_invocation(&Invocation::ToggleVideo {
            session_id: 3,
            identity: "s1".to_string(),
            video_off: false,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "toggleVideo");
        assert_eq!(value["sessionId"], 3);
        assert_eq!(value["videoOff"], false);
    }
}
