//! Meetings: N-participant conversations with an owner.
//!
//! A meeting is created by an AI agent (the owner) who invites attendees
//! by id or class.  Broadcasts fan out to every joined attendee except the
//! sender, subject to each human's
//! [`DeliveryPreferences`](crate::delivery::DeliveryPreferences).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One attendee's membership record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingAttendee {
    /// Agent id of the attendee.
    pub agent_id: String,
    /// Class name of the attendee.
    pub klass: String,
    /// When the attendee joined.
    pub joined_at: DateTime<Utc>,
}

/// A meeting owned by one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    /// Unique meeting id.
    pub id: String,
    /// Agent id of the owner.
    pub owner_id: String,
    /// Human-readable topic.
    pub topic: String,
    /// Joined attendees, in join order.  Includes the owner.
    pub attendees: Vec<MeetingAttendee>,
}

impl Meeting {
    /// Create a meeting with the owner as its first attendee.
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        owner_klass: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        let owner_id = owner_id.into();
        Self {
            id: id.into(),
            owner_id: owner_id.clone(),
            topic: topic.into(),
            attendees: vec![MeetingAttendee {
                agent_id: owner_id,
                klass: owner_klass.into(),
                joined_at: Utc::now(),
            }],
        }
    }

    /// Record an attendee joining.  Re-joining is a no-op.
    pub fn join(&mut self, agent_id: impl Into<String>, klass: impl Into<String>) {
        let agent_id = agent_id.into();
        if self.attendees.iter().any(|a| a.agent_id == agent_id) {
            return;
        }
        self.attendees.push(MeetingAttendee {
            agent_id,
            klass: klass.into(),
            joined_at: Utc::now(),
        });
    }

    /// Remove an attendee.  The owner cannot leave their own meeting.
    pub fn leave(&mut self, agent_id: &str) {
        if agent_id == self.owner_id {
            return;
        }
        self.attendees.retain(|a| a.agent_id != agent_id);
    }

    /// Whether `agent_id` has joined.
    pub fn has_attendee(&self, agent_id: &str) -> bool {
        self.attendees.iter().any(|a| a.agent_id == agent_id)
    }

    /// Attendee ids excluding `sender_id` (broadcast fan-out set).
    pub fn recipients_for(&self, sender_id: &str) -> Vec<&str> {
        self.attendees
            .iter()
            .filter(|a| a.agent_id != sender_id)
            .map(|a| a.agent_id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_is_first_attendee() {
        let meeting = Meeting::new("m-1", "1000", "Host", "standup");
        assert!(meeting.has_attendee("1000"));
        assert_eq!(meeting.attendees.len(), 1);
    }

    #[test]
    fn join_is_idempotent() {
        let mut meeting = Meeting::new("m-1", "1000", "Host", "standup");
        meeting.join("1001", "Helper");
        meeting.join("1001", "Helper");
        assert_eq!(meeting.attendees.len(), 2);
    }

    #[test]
    fn broadcast_excludes_sender() {
        let mut meeting = Meeting::new("m-1", "1000", "Host", "standup");
        meeting.join("1001", "Helper");
        meeting.join("human", "Human");

        let recipients = meeting.recipients_for("1000");
        assert_eq!(recipients, vec!["1001", "human"]);
    }

    #[test]
    fn owner_cannot_leave() {
        let mut meeting = Meeting::new("m-1", "1000", "Host", "standup");
        meeting.join("1001", "Helper");
        meeting.leave("1000");
        meeting.leave("1001");
        assert!(meeting.has_attendee("1000"));
        assert!(!meeting.has_attendee("1001"));
    }
}
