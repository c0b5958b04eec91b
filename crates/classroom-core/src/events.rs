use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::Participant;
use crate::state::LifecycleState;

/// Events emitted by the controller to presentation listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassroomEvent {
    LifecycleChanged(LifecycleState),
    ConnectionStateChanged { channel: ChannelKind, state: ConnectionState },
    RosterReplaced(Vec<Participant>),
    ParticipantJoined(Participant),
    ParticipantUpdated(Participant),
    ParticipantLeft(String), // identity
    RemotePeerJoined(u32),
    RemotePeerLeft(u32),
    ChatMessageReceived(ChatMessage),
    MediaError { code: i32, message: String },
    SessionTerminated(EndReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Account-wide notifications hub.
    Notifications,
    /// Presence and moderation hub of the current room.
    LiveRoom,
    /// Audio/video transport.
    Media,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    /// True while a connection is up or being established.
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }
}

/// Why the local user is no longer in the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The host ended the session for everyone.
    SessionEnded,
    /// A moderator removed the local participant.
    Removed,
    /// The local user left.
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Empty when the sender did not assign one.
    #[serde(default)]
    pub id: String,
    pub sender_identity: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp_ms: u64,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait ClassroomEventListener: Send + Sync {
    fn on_event(&self, event: ClassroomEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn ClassroomEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ClassroomEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: ClassroomEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl ClassroomEventListener for CountingListener {
        fn on_event(&self, _event: ClassroomEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emitter_dispatches_to_listener() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let listener = Arc::new(CountingListener { count: count.clone() });

        emitter.add_listener(listener);
        emitter.emit(ClassroomEvent::LifecycleChanged(LifecycleState::Joined));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emitter_dispatches_to_multiple_listeners() {
        let emitter = EventEmitter::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        emitter.add_listener(Arc::new(CountingListener { count: count1.clone() }));
        emitter.add_listener(Arc::new(CountingListener { count: count2.clone() }));

        emitter.emit(ClassroomEvent::RemotePeerJoined(7));

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    struct EventCapture {
        events: Arc<std::sync::Mutex<Vec<ClassroomEvent>>>,
    }

    impl ClassroomEventListener for EventCapture {
        fn on_event(&self, event: ClassroomEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn emitter_delivers_correct_events() {
        let emitter = EventEmitter::new();
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let listener = Arc::new(EventCapture { events: events.clone() });

        emitter.add_listener(listener);
        emitter.emit(ClassroomEvent::ParticipantLeft("u1".to_string()));

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 1);
        match &captured[0] {
            ClassroomEvent::ParticipantLeft(identity) => assert_eq!(identity, "u1"),
            _ => panic!("expected ParticipantLeft"),
        }
    }

    #[test]
    fn reconnecting_counts_as_active() {
        assert!(ConnectionState::Reconnecting { attempt: 2 }.is_active());
        assert!(ConnectionState::Connecting.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
    }
}
