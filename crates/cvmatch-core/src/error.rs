use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy shared by every stage of a matching run.
///
/// `Display` is the human-readable description surfaced to callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MatchError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Tokenizer not found: {0}")]
    TokenizerNotFound(String),

    #[error("Vocab not found: {0}")]
    VocabNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Inference timed out after {}s", .0.as_secs_f32())]
    InferenceTimedOut(Duration),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Vector store is not set up")]
    StoreNotReady,

    #[error("Index operation failed: {0}")]
    IndexOperationFailed(String),

    #[error("Search operation failed: {0}")]
    SearchOperationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),
}

impl MatchError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MatchError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MatchError::InferenceTimedOut(_))
    }
}

pub type Result<T> = std::result::Result<T, MatchError>;
