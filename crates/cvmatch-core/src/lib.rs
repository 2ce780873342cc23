pub mod cancel;
pub mod chunker;
pub mod config;
pub mod error;
pub mod logger;
pub mod postprocess;
pub mod prompt;
pub mod similarity;
pub mod traits;
pub mod types;

pub use cancel::CancelToken;
pub use config::{
    Config, EmbeddingModelKind, GenerativeModelKind, MatchSettings, PipelineSelection, PromptVersion,
    RetrievalBackend, SettingsHandle,
};
pub use error::{MatchError, Result};
pub use logger::{RunLogger, TracingRunLogger};
pub use traits::{Embedder, Generator, PartialFn, VectorStore};
pub use types::{Chunk, ChunkMetadata, Embedding, IndexedCandidate, MatchReport, MatchResult, ScoredCandidate};

/// Explanation returned when retrieval finds nothing; generation is skipped.
pub const NO_MATCHES_TEXT: &str = "No matching CVs found.";
