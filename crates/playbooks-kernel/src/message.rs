//! Message types exchanged between agents.
//!
//! A [`Message`] is the unit of delivery on every channel: direct
//! agent-to-agent messages, meeting broadcasts, and builtin control
//! messages (cross-agent playbook calls and their replies) all share the
//! same shape so inbox predicates can match on any field.

use serde::{Deserialize, Serialize};

/// How a message should be interpreted by its recipient(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// One sender, one recipient.
    Direct,
    /// Fan-out to every attendee of a meeting except the sender.
    MeetingBroadcast,
    /// Runtime-internal control message (e.g. a cross-agent playbook call
    /// or its correlated reply).  Never shown to humans.
    Builtin,
}

/// A message flowing through the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Agent id of the sender.
    pub sender_id: String,
    /// Class name of the sender.
    pub sender_klass: String,
    /// Agent id of the recipient, when addressed to a single agent.
    pub recipient_id: Option<String>,
    /// Class name of the recipient, when known.
    pub recipient_klass: Option<String>,
    /// Message body.
    pub content: String,
    /// Delivery semantics.
    pub message_type: MessageType,
    /// Meeting context, set on meeting broadcasts.
    pub meeting_id: Option<String>,
}

impl Message {
    /// Build a direct message from one agent to another.
    pub fn direct(
        sender_id: impl Into<String>,
        sender_klass: impl Into<String>,
        recipient_id: impl Into<String>,
        recipient_klass: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_klass: sender_klass.into(),
            recipient_id: Some(recipient_id.into()),
            recipient_klass: Some(recipient_klass.into()),
            content: content.into(),
            message_type: MessageType::Direct,
            meeting_id: None,
        }
    }

    /// Build a broadcast addressed to every attendee of `meeting_id`.
    pub fn meeting_broadcast(
        sender_id: impl Into<String>,
        sender_klass: impl Into<String>,
        meeting_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_klass: sender_klass.into(),
            recipient_id: None,
            recipient_klass: None,
            content: content.into(),
            message_type: MessageType::MeetingBroadcast,
            meeting_id: Some(meeting_id.into()),
        }
    }

    /// Build a runtime-internal control message.
    pub fn builtin(
        sender_id: impl Into<String>,
        sender_klass: impl Into<String>,
        recipient_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_klass: sender_klass.into(),
            recipient_id: Some(recipient_id.into()),
            recipient_klass: None,
            content: content.into(),
            message_type: MessageType::Builtin,
            meeting_id: None,
        }
    }

    /// True when this message was sent by a human agent.
    ///
    /// The reserved id `"human"` and any participant whose class is
    /// `"Human"` both count.
    pub fn is_from_human(&self) -> bool {
        self.sender_id == "human" || self.sender_klass == "Human"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_message_shape() {
        let msg = Message::direct("1000", "Host", "human", "Human", "hello");
        assert_eq!(msg.message_type, MessageType::Direct);
        assert_eq!(msg.recipient_id.as_deref(), Some("human"));
        assert!(msg.meeting_id.is_none());
    }

    #[test]
    fn meeting_broadcast_has_no_single_recipient() {
        let msg = Message::meeting_broadcast("1000", "Host", "m-1", "welcome all");
        assert_eq!(msg.message_type, MessageType::MeetingBroadcast);
        assert!(msg.recipient_id.is_none());
        assert_eq!(msg.meeting_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn human_detection() {
        assert!(Message::direct("human", "Human", "1000", "Host", "hi").is_from_human());
        assert!(Message::direct("1001", "Human", "1000", "Host", "hi").is_from_human());
        assert!(!Message::direct("1000", "Host", "human", "Human", "hi").is_from_human());
    }

    #[test]
    fn serde_round_trip() {
        let msg = Message::meeting_broadcast("1000", "Host", "m-1", "hello");
        let json = serde_json::to_string(&msg).expect("serialize");
        let back: Message = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.content, "hello");
        assert_eq!(back.message_type, MessageType::MeetingBroadcast);
    }
}
