//! LLM transport.
//!
//! The core treats the LLM as a **streaming text-chunk source**: a request
//! goes out as an ordered message list with prompt-cache hints, chunks of
//! the generated code come back.  Provider specifics live behind
//! [`LlmChunkSource`]; the runtime ships one OpenAI-compatible HTTP
//! implementation ([`openai::OpenAiChunkSource`]) and a deterministic
//! scripted source for tests ([`scripted::ScriptedLlm`]).

pub mod openai;
pub mod scripted;

use async_trait::async_trait;
use futures::stream::BoxStream;
use playbooks_state::{LlmMessage, LlmMessageRole};

use crate::error::Result;

/// One wire-level chat message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    pub content: String,
    /// Prompt-cache hint for providers that support prefix caching.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache: bool,
}

impl ChatMessage {
    /// Convert a typed runtime message to the wire shape.
    pub fn from_llm_message(message: &LlmMessage) -> Self {
        let role = match message.role {
            LlmMessageRole::System => "system",
            LlmMessageRole::User => "user",
            LlmMessageRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: message.content.clone(),
            cache: message.cached,
        }
    }
}

/// A complete LLM request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl LlmRequest {
    /// Build a request from typed runtime messages.
    pub fn new(model: impl Into<String>, messages: &[LlmMessage]) -> Self {
        Self {
            model: model.into(),
            messages: messages.iter().map(ChatMessage::from_llm_message).collect(),
        }
    }
}

/// A stream of generated text chunks.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Streaming text-chunk source.
#[async_trait]
pub trait LlmChunkSource: Send + Sync {
    /// Start a streaming completion.  Chunk boundaries are arbitrary; the
    /// interpreter's buffer reassembles statements.
    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbooks_state::FrameType;

    #[test]
    fn role_mapping() {
        let message = LlmMessage::user_input("go", FrameType::I).cached();
        let wire = ChatMessage::from_llm_message(&message);
        assert_eq!(wire.role, "user");
        assert!(wire.cache);

        let message = LlmMessage::assistant_response("x = 1");
        assert_eq!(ChatMessage::from_llm_message(&message).role, "assistant");

        let message = LlmMessage::system_prompt("preamble");
        assert_eq!(ChatMessage::from_llm_message(&message).role, "system");
    }
}
