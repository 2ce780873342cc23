use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Embedding, IndexedCandidate, ScoredCandidate};

/// Text → fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    /// Idempotent; later calls are cheap once the model is resident.
    async fn load_model(&self) -> Result<()>;
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Candidate storage with nearest-neighbour search.
///
/// `index` is additive. Callers `clear` before re-indexing a new candidate set.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn id(&self) -> &str;
    async fn setup(&self, dim: usize) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn index(&self, candidates: Vec<IndexedCandidate>) -> Result<()>;
    /// At most `top_k` hits, best first. `min_score` filters before truncation.
    async fn search(&self, query: &[f32], top_k: usize, min_score: Option<f32>) -> Result<Vec<ScoredCandidate>>;
}

/// Receiver of cumulative generated text. Higher-ranked so callers may pass borrows of locals.
pub type PartialFn<'a> = dyn for<'s> Fn(&'s str) + Send + Sync + 'a;

/// Prompt → streamed text.
#[async_trait]
pub trait Generator: Send + Sync {
    fn id(&self) -> &str;
    async fn load_model(&self) -> Result<()>;
    /// `on_partial` receives the cumulative text after each increment.
    async fn generate(&self, prompt: &str, on_partial: &PartialFn) -> Result<String>;
}
