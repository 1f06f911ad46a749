//! Deterministic LLM-context compaction.
//!
//! The flattened message sequence grows without bound over a long playbook
//! call.  Before each request the compactor shrinks the history while
//! keeping the prompt self-consistent with state compression:
//!
//! - system-role messages always survive;
//! - the **last I-frame user message** and everything after it (the safe
//!   window) is never touched -- P-frame deltas in that window need their
//!   baseline;
//! - below the safe window, each message is replaced by its
//!   [`to_compact_message`](LlmMessage::to_compact_message) form (old user
//!   prompts drop, loaded artifact content collapses to a stub);
//! - the final message is marked `cached` for prompt-cache reuse.
//!
//! The compactor is deterministic and idempotent: re-compacting compacted
//! output changes nothing but the tail cache hint.

use playbooks_state::{FrameType, LlmMessage, LlmMessageKind, LlmMessageRole};

/// Deterministic message-history compactor.
#[derive(Debug, Default)]
pub struct LlmContextCompactor;

impl LlmContextCompactor {
    /// Create a compactor.
    pub fn new() -> Self {
        Self
    }

    /// Compact a flattened message sequence.
    pub fn compact(&self, messages: &[LlmMessage]) -> Vec<LlmMessage> {
        let safe_start = last_i_frame_index(messages).unwrap_or(0);

        let mut compacted: Vec<LlmMessage> = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            if index >= safe_start || message.role == LlmMessageRole::System {
                compacted.push(message.clone());
                continue;
            }
            if let Some(compact) = message.to_compact_message() {
                compacted.push(compact);
            }
        }

        if let Some(last) = compacted.last_mut() {
            last.cached = true;
        }
        compacted
    }
}

/// Index of the last I-frame user-input message: the safe-window start.
fn last_i_frame_index(messages: &[LlmMessage]) -> Option<usize> {
    messages
        .iter()
        .rposition(|m| m.kind == LlmMessageKind::UserInput && m.frame_type == FrameType::I)
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbooks_state::FrameType;

    fn history() -> Vec<LlmMessage> {
        vec![
            LlmMessage::system_prompt("preamble"),
            LlmMessage::user_input("first prompt", FrameType::I),
            LlmMessage::assistant_response("x = 1"),
            LlmMessage::artifact_load("report", "Q1", "long content"),
            LlmMessage::user_input("second prompt", FrameType::P),
            LlmMessage::assistant_response("y = 2"),
            LlmMessage::user_input("third prompt", FrameType::I),
            LlmMessage::assistant_response("z = 3"),
            LlmMessage::user_input("fourth prompt", FrameType::P),
        ]
    }

    #[test]
    fn safe_window_is_never_compacted() {
        let compacted = LlmContextCompactor::new().compact(&history());

        // Everything from the last I-frame user message onward survives
        // verbatim (modulo the tail cache hint).
        let contents: Vec<&str> = compacted.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"third prompt"));
        assert!(contents.contains(&"z = 3"));
        assert!(contents.contains(&"fourth prompt"));
    }

    #[test]
    fn old_user_prompts_are_dropped() {
        let compacted = LlmContextCompactor::new().compact(&history());
        let contents: Vec<&str> = compacted.iter().map(|m| m.content.as_str()).collect();
        assert!(!contents.contains(&"first prompt"));
        assert!(!contents.contains(&"second prompt"));
    }

    #[test]
    fn system_messages_always_survive() {
        let compacted = LlmContextCompactor::new().compact(&history());
        assert_eq!(compacted[0].content, "preamble");
        assert_eq!(compacted[0].role, LlmMessageRole::System);
    }

    #[test]
    fn artifact_loads_collapse_to_stubs() {
        let compacted = LlmContextCompactor::new().compact(&history());
        let stub = compacted
            .iter()
            .find(|m| m.kind == LlmMessageKind::ArtifactLoad)
            .expect("stub kept");
        assert!(stub.content.contains("[content elided]"));
        assert!(!stub.content.contains("long content"));
    }

    #[test]
    fn tail_is_marked_cached() {
        let compacted = LlmContextCompactor::new().compact(&history());
        assert!(compacted.last().expect("non-empty").cached);
    }

    #[test]
    fn compaction_is_idempotent() {
        let compactor = LlmContextCompactor::new();
        let once = compactor.compact(&history());
        let twice = compactor.compact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn no_i_frame_means_nothing_compacts() {
        let messages = vec![
            LlmMessage::user_input("p1", FrameType::P),
            LlmMessage::assistant_response("a1"),
        ];
        let compacted = LlmContextCompactor::new().compact(&messages);
        assert_eq!(compacted.len(), 2);
        assert_eq!(compacted[0].content, "p1");
    }
}
