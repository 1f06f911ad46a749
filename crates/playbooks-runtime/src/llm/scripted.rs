//! Deterministic scripted chunk source for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use super::{ChunkStream, LlmChunkSource, LlmRequest};
use crate::error::{Result, RuntimeError};

/// Replays canned responses, split into fixed-size chunks, one response
/// per `stream` call.
///
/// Also records every request it receives so tests can assert on prompt
/// composition.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<LlmRequest>>,
    chunk_size: usize,
}

impl ScriptedLlm {
    /// Create a source that replays `responses` in order.
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
            chunk_size: 7,
        }
    }

    /// Override the chunk size (default is a deliberately awkward 7 bytes
    /// so statements split mid-token).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Requests observed so far.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().expect("request lock poisoned").clone()
    }

    /// Remaining unplayed responses.
    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("response lock poisoned").len()
    }
}

#[async_trait]
impl LlmChunkSource for ScriptedLlm {
    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        self.requests
            .lock()
            .expect("request lock poisoned")
            .push(request);

        let response = self
            .responses
            .lock()
            .expect("response lock poisoned")
            .pop_front()
            .ok_or_else(|| RuntimeError::llm("scripted source exhausted"))?;

        let chunks: Vec<String> = response
            .as_bytes()
            .chunks(self.chunk_size)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();

        Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn replays_in_chunks() {
        let llm = ScriptedLlm::new(["abcdefghij"]).with_chunk_size(4);
        let mut stream = llm
            .stream(LlmRequest::new("test", &[]))
            .await
            .expect("stream");

        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.expect("chunk"));
        }
        assert_eq!(collected, "abcdefghij");
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn exhaustion_is_an_error() {
        let llm = ScriptedLlm::new(Vec::<String>::new());
        assert!(llm.stream(LlmRequest::new("test", &[])).await.is_err());
    }
}
