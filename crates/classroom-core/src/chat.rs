use crate::events::ChatMessage;
use crate::models::LocalIdentity;

/// Ephemeral in-room chat history, in arrival order.
///
/// Lives only as long as the session; cleared on teardown.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the message for a local send. The id lets us recognise the
    /// hub's echo of our own message.
    pub fn compose(local: &LocalIdentity, text: &str) -> ChatMessage {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender_identity: local.identity.clone(),
            sender_name: local.display_name.clone(),
            text: text.to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }

    /// Append a message unless one with the same id is already present.
    /// Returns `true` if it was appended.
    pub fn push(&mut self, msg: ChatMessage) -> bool {
        if !msg.id.is_empty() && self.messages.iter().any(|m| m.id == msg.id) {
            tracing::debug!("duplicate chat message {} dropped", msg.id);
            return false;
        }
        self.messages.push(msg);
        true
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
