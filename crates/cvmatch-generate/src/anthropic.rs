//! Streaming client for the Anthropic Messages API.
//!
//! Text arrives as `content_block_delta` events; `message_stop` ends the stream.
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cvmatch_core::{Generator, MatchError, PartialFn, Result};

use crate::sse::SseBuffer;
use crate::{http_err, StreamControl};

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicGenerator {
    client: Client,
    id: &'static str,
    model: &'static str,
    url: String,
    api_key_env: String,
    api_key: RwLock<Option<String>>,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicGenerator {
    pub fn new(client: Client, id: &'static str, model: &'static str, api_key_env: String, max_tokens: u32, temperature: f32) -> Self {
        Self { client, id, model, url: ANTHROPIC_API_URL.to_string(), api_key_env, api_key: RwLock::new(None), max_tokens, temperature }
    }

    /// Points the client at another Messages-compatible endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    MessageStop,
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Applies one `data:` payload to the accumulated text.
pub fn apply_event(payload: &str, text: &mut String) -> Result<StreamControl> {
    let event: StreamEvent = serde_json::from_str(payload)
        .map_err(|e| MatchError::InvalidOutput(format!("malformed Anthropic event: {e}")))?;
    Ok(match event {
        StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text: piece } } => {
            text.push_str(&piece);
            StreamControl::Delta
        }
        StreamEvent::ContentBlockDelta { delta: Delta::Other } | StreamEvent::Other => StreamControl::Skip,
        StreamEvent::MessageStop => StreamControl::Done,
        StreamEvent::Error { error } => return Err(MatchError::GenerationFailed(error.message)),
    })
}

#[async_trait]
impl Generator for AnthropicGenerator {
    fn id(&self) -> &str { self.id }

    async fn load_model(&self) -> Result<()> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => {
                *self.api_key.write() = Some(key.trim().to_string());
                Ok(())
            }
            _ => Err(MatchError::ModelNotFound(format!("{} requires {} to be set", self.id, self.api_key_env))),
        }
    }

    async fn generate(&self, prompt: &str, on_partial: &PartialFn) -> Result<String> {
        let api_key = self.api_key.read().clone().ok_or_else(|| MatchError::ModelNotFound(format!("{} is not loaded", self.id)))?;
        let body = AnthropicRequest {
            model: self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
            messages: vec![AnthropicMessage { role: "user", content: prompt }],
        };
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", api_key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            warn!(model = self.model, %status, "Anthropic request rejected");
            return Err(MatchError::GenerationFailed(format!("Anthropic returned {status}: {text}")));
        }

        let mut text = String::new();
        let mut sse = SseBuffer::new();
        let mut stream = response.bytes_stream();
        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(http_err)?;
            for payload in sse.push(&chunk) {
                match apply_event(&payload, &mut text)? {
                    StreamControl::Delta => on_partial(&text),
                    StreamControl::Skip => {}
                    StreamControl::Done => break 'outer,
                }
            }
        }
        if let Some(payload) = sse.finish() {
            if apply_event(&payload, &mut text)? == StreamControl::Delta { on_partial(&text); }
        }
        debug!(model = self.model, chars = text.len(), "Anthropic stream finished");
        if text.trim().is_empty() {
            return Err(MatchError::InvalidOutput("Anthropic response missing text content".into()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_deltas_accumulate() {
        let mut text = String::new();
        let start = r#"{"type":"message_start","message":{"id":"m1"}}"#;
        let d1 = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Candidate 1"}}"#;
        let d2 = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" fits."}}"#;
        assert_eq!(apply_event(start, &mut text).unwrap(), StreamControl::Skip);
        assert_eq!(apply_event(d1, &mut text).unwrap(), StreamControl::Delta);
        assert_eq!(apply_event(d2, &mut text).unwrap(), StreamControl::Delta);
        assert_eq!(apply_event(r#"{"type":"message_stop"}"#, &mut text).unwrap(), StreamControl::Done);
        assert_eq!(text, "Candidate 1 fits.");
    }

    #[test]
    fn malformed_and_error_events() {
        let mut text = String::new();
        assert!(matches!(apply_event("{not json", &mut text), Err(MatchError::InvalidOutput(_))));
        let err = apply_event(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#, &mut text);
        assert_eq!(err, Err(MatchError::GenerationFailed("Overloaded".into())));
    }

    #[tokio::test]
    async fn load_requires_api_key() {
        let g = AnthropicGenerator::new(Client::new(), "claude_haiku", "claude-3-5-haiku-latest", "CVMATCH_TEST_UNSET_KEY_7f3a".into(), 16, 0.0);
        assert!(matches!(g.load_model().await, Err(MatchError::ModelNotFound(_))));
        let noop = |_: &str| {};
        assert!(matches!(g.generate("hi", &noop).await, Err(MatchError::ModelNotFound(_))));
    }
}
