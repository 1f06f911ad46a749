//! Typed LLM messages.
//!
//! Every LLM interaction while executing a frame is recorded as a typed
//! [`LlmMessage`].  The kind drives two later decisions: how the prompt
//! assembler renders the message, and whether the compactor may shrink or
//! drop it once it falls below the safe window.

use serde::{Deserialize, Serialize};

/// Chat role the message is sent under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmMessageRole {
    System,
    User,
    Assistant,
}

/// State-compression frame type for the LLM call a message belongs to.
///
/// I-frames carry a full state snapshot; P-frames carry only a delta
/// relative to the previous shipped state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    I,
    P,
}

/// What a message records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmMessageKind {
    /// The system-style preamble.
    SystemPrompt,
    /// A user-input prompt (instruction + state block).
    UserInput,
    /// The LLM's generated code/response.
    AssistantResponse,
    /// A playbook implementation shown to the LLM.
    PlaybookImplementation,
    /// Artifact content materialized into the prompt window.
    ArtifactLoad,
    /// The outcome of a playbook call or an execution error.
    ExecutionResult,
    /// A message received from another agent.
    AgentCommunication,
    /// Compact description of this agent.
    AgentInfo,
    /// Description of peer agent classes and their public playbooks.
    OtherAgentInfo,
    /// Available cross-playbook trigger instructions.
    TriggerInstructions,
}

/// One message in a frame's (or the top-level) LLM history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub kind: LlmMessageKind,
    pub role: LlmMessageRole,
    pub content: String,
    /// Prompt-cache hint: the tail message of each stream is marked cached
    /// so providers can reuse the prefix.
    pub cached: bool,
    /// Frame type of the LLM call this message was produced for.
    pub frame_type: FrameType,
}

impl LlmMessage {
    fn new(kind: LlmMessageKind, role: LlmMessageRole, content: impl Into<String>) -> Self {
        Self {
            kind,
            role,
            content: content.into(),
            cached: false,
            frame_type: FrameType::I,
        }
    }

    /// System preamble message.
    pub fn system_prompt(content: impl Into<String>) -> Self {
        Self::new(LlmMessageKind::SystemPrompt, LlmMessageRole::System, content)
    }

    /// User-input prompt for an LLM call of the given frame type.
    pub fn user_input(content: impl Into<String>, frame_type: FrameType) -> Self {
        let mut message = Self::new(LlmMessageKind::UserInput, LlmMessageRole::User, content);
        message.frame_type = frame_type;
        message
    }

    /// Assistant response (the generated code).
    pub fn assistant_response(content: impl Into<String>) -> Self {
        Self::new(
            LlmMessageKind::AssistantResponse,
            LlmMessageRole::Assistant,
            content,
        )
    }

    /// Playbook implementation shown to the LLM.
    pub fn playbook_implementation(content: impl Into<String>) -> Self {
        Self::new(
            LlmMessageKind::PlaybookImplementation,
            LlmMessageRole::User,
            content,
        )
    }

    /// Artifact content loaded into the prompt window.
    pub fn artifact_load(name: &str, summary: &str, content: &str) -> Self {
        Self::new(
            LlmMessageKind::ArtifactLoad,
            LlmMessageRole::User,
            format!("Artifact[{name}] ({summary})\n{content}"),
        )
    }

    /// Execution result (playbook return or error description).
    pub fn execution_result(content: impl Into<String>) -> Self {
        Self::new(LlmMessageKind::ExecutionResult, LlmMessageRole::User, content)
    }

    /// Reference to an artifact that now holds a playbook's large result.
    /// The content itself stays out of the prompt until `LoadArtifact`.
    pub fn artifact_result(name: &str, summary: &str) -> Self {
        Self::new(
            LlmMessageKind::ArtifactLoad,
            LlmMessageRole::User,
            format!(
                "Artifact[{name}] ({summary}) stored; use LoadArtifact('${name}') to read it"
            ),
        )
    }

    /// Message received from another agent.
    pub fn agent_communication(content: impl Into<String>) -> Self {
        Self::new(
            LlmMessageKind::AgentCommunication,
            LlmMessageRole::User,
            content,
        )
    }

    /// Compact description of this agent.
    pub fn agent_info(content: impl Into<String>) -> Self {
        Self::new(LlmMessageKind::AgentInfo, LlmMessageRole::User, content)
    }

    /// Peer agent class descriptions.
    pub fn other_agent_info(content: impl Into<String>) -> Self {
        Self::new(LlmMessageKind::OtherAgentInfo, LlmMessageRole::User, content)
    }

    /// Cross-playbook trigger instructions.
    pub fn trigger_instructions(content: impl Into<String>) -> Self {
        Self::new(
            LlmMessageKind::TriggerInstructions,
            LlmMessageRole::User,
            content,
        )
    }

    /// Mark this message as a prompt-cache boundary.
    #[must_use]
    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Compacted form of this message, used below the compactor's safe
    /// window.
    ///
    /// Returns `None` when the message should be dropped entirely.  Cache
    /// hints are preserved on the survivors.
    pub fn to_compact_message(&self) -> Option<LlmMessage> {
        match self.kind {
            // Old user prompts carry stale state blocks; drop them.
            LlmMessageKind::UserInput => None,
            // Loaded artifact content is large and reloadable; keep a stub.
            LlmMessageKind::ArtifactLoad => {
                let first_line = self.content.lines().next().unwrap_or("");
                let mut compact = LlmMessage::new(
                    self.kind,
                    self.role,
                    format!("{first_line}\n[content elided]"),
                );
                compact.cached = self.cached;
                compact.frame_type = self.frame_type;
                Some(compact)
            }
            _ => Some(self.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_input_carries_frame_type() {
        let message = LlmMessage::user_input("go", FrameType::P);
        assert_eq!(message.frame_type, FrameType::P);
        assert_eq!(message.role, LlmMessageRole::User);
    }

    #[test]
    fn compaction_drops_user_input() {
        let message = LlmMessage::user_input("old prompt", FrameType::P);
        assert!(message.to_compact_message().is_none());
    }

    #[test]
    fn compaction_stubs_artifact_loads() {
        let message = LlmMessage::artifact_load("report", "Q1", "very long content here");
        let compact = message.to_compact_message().expect("kept");
        assert!(compact.content.contains("Artifact[report]"));
        assert!(compact.content.contains("[content elided]"));
        assert!(!compact.content.contains("very long content"));
    }

    #[test]
    fn compaction_preserves_cache_hint() {
        let message = LlmMessage::artifact_load("a", "s", "c").cached();
        assert!(message.to_compact_message().expect("kept").cached);
    }

    #[test]
    fn assistant_responses_survive_compaction() {
        let message = LlmMessage::assistant_response("await Say(\"user\", \"hi\")");
        assert_eq!(message.to_compact_message(), Some(message));
    }
}
