//! Generation capability variants: the Anthropic Messages API and local
//! OpenAI-compatible chat servers, both streamed over server-sent events.

use std::sync::Arc;

use reqwest::Client;

use cvmatch_core::config::GenerationSettings;
use cvmatch_core::{GenerativeModelKind, Generator, MatchError, Result};

pub mod anthropic;
pub mod openai;
pub mod sse;

pub use anthropic::AnthropicGenerator;
pub use openai::LocalChatGenerator;

/// What a stream payload meant for the accumulated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Delta,
    Skip,
    Done,
}

pub(crate) fn http_err(e: reqwest::Error) -> MatchError {
    MatchError::GenerationFailed(e.to_string())
}

/// Served model name for `kind`.
pub fn model_name(kind: GenerativeModelKind) -> &'static str {
    match kind {
        GenerativeModelKind::ClaudeHaiku => "claude-3-5-haiku-latest",
        GenerativeModelKind::ClaudeSonnet => "claude-sonnet-4-5",
        GenerativeModelKind::LocalTinyLlama => "tinyllama",
        GenerativeModelKind::LocalLlama2Chat => "llama-2-7b-chat",
    }
}

pub fn generator_for(kind: GenerativeModelKind, settings: &GenerationSettings) -> Result<Arc<dyn Generator>> {
    // no client-level timeout: the orchestrator races generation against its own timer
    let client = Client::builder()
        .build()
        .map_err(|e| MatchError::GenerationFailed(format!("failed to build HTTP client: {e}")))?;
    let model = model_name(kind);
    Ok(match kind {
        GenerativeModelKind::ClaudeHaiku | GenerativeModelKind::ClaudeSonnet => Arc::new(AnthropicGenerator::new(
            client,
            kind.as_str(),
            model,
            settings.api_key_env.clone(),
            settings.max_tokens,
            settings.temperature,
        )),
        GenerativeModelKind::LocalTinyLlama | GenerativeModelKind::LocalLlama2Chat => Arc::new(LocalChatGenerator::new(
            client,
            kind.as_str(),
            model,
            settings.local_base_url.clone(),
            settings.max_tokens,
            settings.temperature,
        )),
    })
}
