//! OpenAI-compatible streaming chunk source.
//!
//! Speaks the `chat/completions` SSE protocol (`data: {json}` lines ending
//! with `data: [DONE]`), which most local and hosted inference servers
//! accept.  Only the text deltas are surfaced; everything else about the
//! provider response is ignored by the core.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use super::{ChunkStream, LlmChunkSource, LlmRequest};
use crate::error::{Result, RuntimeError};

/// SSE line parser for chat-completions streams.
///
/// Accumulates partial lines across network reads because SSE events can
/// split anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    partial_line: String,
}

impl SseParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the text deltas completed by this read.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial_line.push_str(&String::from_utf8_lossy(bytes));

        let mut deltas = Vec::new();
        while let Some(newline) = self.partial_line.find('\n') {
            let line: String = self.partial_line.drain(..=newline).collect();
            if let Some(delta) = parse_sse_line(line.trim_end()) {
                deltas.push(delta);
            }
        }
        deltas
    }
}

/// Parse one SSE line into a text delta, if it carries one.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(error) => {
            tracing::trace!(%error, "ignoring unparseable SSE data line");
            return None;
        }
    };
    value["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(String::from)
}

/// HTTP chunk source for OpenAI-compatible endpoints.
pub struct OpenAiChunkSource {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl OpenAiChunkSource {
    /// Create a source against `api_base` (e.g. `https://api.openai.com/v1`).
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmChunkSource for OpenAiChunkSource {
    async fn stream(&self, request: LlmRequest) -> Result<ChunkStream> {
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
        });

        let mut http_request = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .json(&body);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| RuntimeError::llm(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(RuntimeError::llm(format!(
                "llm endpoint returned {}",
                response.status()
            )));
        }

        let byte_stream = response.bytes_stream();
        let mut parser = SseParser::new();

        let chunks = byte_stream
            .map(move |read| match read {
                Ok(bytes) => Ok(parser.feed(&bytes)),
                Err(error) => Err(RuntimeError::llm(format!("stream read failed: {error}"))),
            })
            .flat_map(|result| match result {
                Ok(deltas) => futures::stream::iter(
                    deltas.into_iter().map(Ok).collect::<Vec<Result<String>>>(),
                ),
                Err(error) => futures::stream::iter(vec![Err(error)]),
            });

        Ok(chunks.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delta_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            Some("Hel".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line(": comment"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#),
            None
        );
    }

    #[test]
    fn reassembles_split_lines() {
        let mut parser = SseParser::new();
        let first = parser.feed(br#"data: {"choices":[{"delta":{"con"#);
        assert!(first.is_empty());
        let second = parser.feed("tent\":\"Hi\"}}]}\n\n".as_bytes());
        assert_eq!(second, vec!["Hi".to_string()]);
    }

    #[test]
    fn multiple_events_in_one_read() {
        let mut parser = SseParser::new();
        let deltas = parser.feed(
            concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
                "data: [DONE]\n",
            )
            .as_bytes(),
        );
        assert_eq!(deltas, vec!["a".to_string(), "b".to_string()]);
    }
}
