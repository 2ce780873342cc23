//! Streaming client for OpenAI-compatible `/chat/completions` servers
//! (llama.cpp server, Ollama, vLLM) hosting a local chat model.
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cvmatch_core::{Generator, MatchError, PartialFn, Result};

use crate::sse::SseBuffer;
use crate::{http_err, StreamControl};

pub struct LocalChatGenerator {
    client: Client,
    id: &'static str,
    model: &'static str,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl LocalChatGenerator {
    pub fn new(client: Client, id: &'static str, model: &'static str, base_url: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, id, model, base_url, max_tokens, temperature }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Applies one `data:` payload to the accumulated text.
pub fn apply_chunk(payload: &str, text: &mut String) -> Result<StreamControl> {
    if payload.trim() == "[DONE]" { return Ok(StreamControl::Done); }
    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| MatchError::InvalidOutput(format!("malformed chat completion chunk: {e}")))?;
    let Some(choice) = chunk.choices.into_iter().next() else { return Ok(StreamControl::Skip) };
    match choice.delta.content {
        Some(piece) if !piece.is_empty() => {
            text.push_str(&piece);
            Ok(StreamControl::Delta)
        }
        _ if choice.finish_reason.is_some() => Ok(StreamControl::Done),
        _ => Ok(StreamControl::Skip),
    }
}

/// Loose match so `tinyllama` finds `TinyLlama-1.1B-Chat-v1.0.Q4_K_M.gguf`.
fn lists_model(ids: &[String], model: &str) -> bool {
    let want = model.to_lowercase();
    ids.iter().any(|id| id.to_lowercase().contains(&want))
}

#[async_trait]
impl Generator for LocalChatGenerator {
    fn id(&self) -> &str { self.id }

    async fn load_model(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MatchError::ModelNotFound(format!("{} unreachable at {}: {}", self.id, url, e)))?;
        if !response.status().is_success() {
            return Err(MatchError::ModelNotFound(format!("{url} returned {}", response.status())));
        }
        let list: ModelList = response
            .json()
            .await
            .map_err(|e| MatchError::ModelNotFound(format!("{url} returned an unexpected model list: {e}")))?;
        let ids: Vec<String> = list.data.into_iter().map(|m| m.id).collect();
        if !lists_model(&ids, self.model) {
            return Err(MatchError::ModelNotFound(format!("{} not served at {} (available: {})", self.model, self.base_url, ids.join(", "))));
        }
        info!(model = self.model, base_url = %self.base_url, "local chat model available");
        Ok(())
    }

    async fn generate(&self, prompt: &str, on_partial: &PartialFn) -> Result<String> {
        let body = ChatRequest {
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
            warn!(model = self.model, %status, "chat completion rejected");
            return Err(MatchError::GenerationFailed(format!("{} returned {status}: {text}", self.base_url)));
        }

        let mut text = String::new();
        let mut sse = SseBuffer::new();
        let mut stream = response.bytes_stream();
        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(http_err)?;
            for payload in sse.push(&chunk) {
                match apply_chunk(&payload, &mut text)? {
                    StreamControl::Delta => on_partial(&text),
                    StreamControl::Skip => {}
                    StreamControl::Done => break 'outer,
                }
            }
        }
        if let Some(payload) = sse.finish() {
            if apply_chunk(&payload, &mut text)? == StreamControl::Delta { on_partial(&text); }
        }
        debug!(model = self.model, chars = text.len(), "chat stream finished");
        if text.trim().is_empty() {
            return Err(MatchError::InvalidOutput("chat completion produced no text".into()));
        }
        Ok(text)
    }
}
