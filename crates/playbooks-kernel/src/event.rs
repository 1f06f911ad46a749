//! Observability events published by the runtime.
//!
//! Events are the global observability spine: traces, UIs, and tests all
//! watch the program through the [`EventBus`](crate::bus::EventBus).  They
//! are distinct from [`Message`](crate::message::Message) delivery -- an
//! event never causes agent-visible side effects.
//!
//! Every variant carries enough context for subscribers to filter and
//! dispatch without parsing opaque blobs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event that flows through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // -- Lifecycle ----------------------------------------------------------
    /// The set of live agents changed (created, restored, or removed).
    AgentsChanged {
        /// `(agent_id, klass)` for every live agent, in creation order.
        agents: Vec<(String, String)>,
    },

    /// A playbook began executing on an agent.
    PlaybookStart { agent_id: String, playbook: String },

    /// A playbook finished executing.
    PlaybookEnd {
        agent_id: String,
        playbook: String,
        /// String form of the return value.
        return_value: String,
        /// Call stack depth observed after the frame was popped.
        call_stack_depth: usize,
    },

    /// One line of LLM-generated code was executed.
    LineExecuted {
        agent_id: String,
        /// The statement text that ran.
        text: String,
    },

    /// A `Step(...)` directive advanced the instruction pointer.
    StepExecuted {
        agent_id: String,
        /// `Playbook:Line:Type` form of the step.
        step: String,
        source_line_number: u32,
    },

    // -- State --------------------------------------------------------------
    /// A variable was created or reassigned.
    VariableUpdate {
        agent_id: String,
        name: String,
        /// JSON form of the new value.
        value: Value,
    },

    /// A frame was pushed onto an agent's call stack.
    CallStackPush {
        agent_id: String,
        /// String form of the pushed frame's instruction pointer.
        frame: String,
        depth: usize,
    },

    /// A frame was popped from an agent's call stack.
    CallStackPop {
        agent_id: String,
        frame: String,
        depth: usize,
    },

    /// An artifact was stored in an agent's registry.
    ArtifactCreated {
        agent_id: String,
        name: String,
        summary: String,
    },

    // -- Messaging ----------------------------------------------------------
    /// A message was sent on a channel.
    MessageSent {
        sender_id: String,
        recipient_id: Option<String>,
        meeting_id: Option<String>,
        content: String,
    },

    /// A meeting was created.
    MeetingCreated {
        meeting_id: String,
        owner_id: String,
        topic: String,
    },

    /// An agent joined a meeting.
    MeetingJoined {
        meeting_id: String,
        agent_id: String,
    },

    // -- Streaming ----------------------------------------------------------
    /// A `Say` to a human began streaming.
    StreamStart {
        stream_id: String,
        sender_id: String,
        recipient_id: Option<String>,
    },

    /// An incremental chunk of a streaming `Say`.
    StreamChunk { stream_id: String, content: String },

    /// A streaming `Say` finished.
    StreamComplete { stream_id: String },
}

impl Event {
    /// Machine-readable kind string, used as the subscription key on the
    /// bus (`"*"` subscribes to all kinds).
    pub fn kind(&self) -> &'static str {
        match self {
            Event::AgentsChanged { .. } => "agents_changed",
            Event::PlaybookStart { .. } => "playbook_start",
            Event::PlaybookEnd { .. } => "playbook_end",
            Event::LineExecuted { .. } => "line_executed",
            Event::StepExecuted { .. } => "step_executed",
            Event::VariableUpdate { .. } => "variable_update",
            Event::CallStackPush { .. } => "call_stack_push",
            Event::CallStackPop { .. } => "call_stack_pop",
            Event::ArtifactCreated { .. } => "artifact_created",
            Event::MessageSent { .. } => "message_sent",
            Event::MeetingCreated { .. } => "meeting_created",
            Event::MeetingJoined { .. } => "meeting_joined",
            Event::StreamStart { .. } => "stream_start",
            Event::StreamChunk { .. } => "stream_chunk",
            Event::StreamComplete { .. } => "stream_complete",
        }
    }
}

/// A published event, stamped by the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Session the event belongs to.
    pub session_id: String,
    /// Monotonically increasing per-bus sequence number.
    pub sequence: u64,
    /// Wall-clock publish time.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The event payload.
    pub event: Event,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        let event = Event::StreamChunk {
            stream_id: "s-1".into(),
            content: "hi".into(),
        };
        assert_eq!(event.kind(), "stream_chunk");

        let event = Event::AgentsChanged { agents: vec![] };
        assert_eq!(event.kind(), "agents_changed");
    }

    #[test]
    fn envelope_serializes() {
        let envelope = EventEnvelope {
            session_id: "sess".into(),
            sequence: 7,
            timestamp: chrono::Utc::now(),
            event: Event::StreamComplete {
                stream_id: "s-1".into(),
            },
        };
        let json = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(json["sequence"], 7);
    }
}
