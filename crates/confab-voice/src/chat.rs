//! Streaming chat-completion backend.

use crate::config::OpenAiEndpoint;
use crate::error::VoiceError;
use async_trait::async_trait;
use confab_types::ChatMessage;
use futures_util::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

/// Timeout for establishing the chat connection. The stream itself has no
/// overall deadline; the consumer cancels it.
const CHAT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One chat-completion request, assembled by the turn orchestrator from the
/// robot's system prompt, the rolling history, and the current user text.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A stream of incremental text deltas from the model.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, VoiceError>> + Send>>;

/// Backend for opening a streaming chat completion.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn open_stream(&self, request: ChatRequest) -> Result<ChatStream, VoiceError>;
}

/// Incremental SSE parser for OpenAI-compatible chat streams.
///
/// Bytes arrive in arbitrary chunks; a line can be split across two chunks,
/// so unterminated bytes are carried over to the next push.
#[derive(Default)]
struct SseParser {
    carry: Vec<u8>,
    done: bool,
}

impl SseParser {
    /// Feeds one chunk of bytes, returning every completed text delta.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.done {
            return deltas;
        }
        self.carry.extend_from_slice(chunk);

        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                continue;
            };
            if data == "[DONE]" {
                self.done = true;
                break;
            }
            if let Some(delta) = delta_from_data(data) {
                deltas.push(delta);
            }
        }

        deltas
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// Extracts `choices[0].delta.content` from one SSE data payload. Empty
/// deltas (role announcements, finish chunks) yield `None`.
fn delta_from_data(data: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    let content = json["choices"][0]["delta"]["content"].as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

/// Production chat backend: OpenAI-compatible `/chat/completions` with
/// `stream: true`.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    endpoint: OpenAiEndpoint,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(endpoint: OpenAiEndpoint) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CHAT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Chat(e.to_string()))?;
        Ok(Self { endpoint, client })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn open_stream(&self, request: ChatRequest) -> Result<ChatStream, VoiceError> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Chat(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Chat(format!("chat API error {status}: {body}")));
        }

        struct State {
            bytes: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
            parser: SseParser,
            pending: VecDeque<String>,
            finished: bool,
        }

        let state = State {
            bytes: Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map(|bytes| bytes.to_vec())),
            ),
            parser: SseParser::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(delta) = state.pending.pop_front() {
                    return Some((Ok(delta), state));
                }
                if state.finished || state.parser.is_done() {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.parser.push(&chunk));
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(VoiceError::Chat(format!("recv chat: {e}"))), state));
                    }
                    None => {
                        state.finished = true;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_extracts_deltas() {
        let mut parser = SseParser::default();
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n";
        assert_eq!(parser.push(chunk), vec!["Hello", " there"]);
    }

    #[test]
    fn parser_carries_split_lines() {
        let mut parser = SseParser::default();
        let first = parser.push(b"data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.is_empty());
        let second = parser.push(b"tent\":\"Hi\"}}]}\n");
        assert_eq!(second, vec!["Hi"]);
    }

    #[test]
    fn parser_stops_at_done_marker() {
        let mut parser = SseParser::default();
        let deltas = parser.push(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}\ndata: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        );
        assert_eq!(deltas, vec!["end"]);
        assert!(parser.is_done());
        assert!(parser.push(b"data: more\n").is_empty());
    }

    #[test]
    fn parser_skips_role_and_finish_chunks() {
        let mut parser = SseParser::default();
        let deltas = parser.push(
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
        );
        assert!(deltas.is_empty());
    }
}
