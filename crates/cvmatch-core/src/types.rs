//! Domain types shared by the chunker, the stores and the orchestrator.

use serde::{Deserialize, Serialize};

use crate::config::PipelineSelection;
use crate::postprocess::format_score;

/// Fixed-dimension embedding produced by an `Embedder`.
pub type Embedding = Vec<f32>;
pub type CandidateId = String;

/// A bounded word window cut from a longer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Traceability back to the source text.
///
/// - `word_range`: half-open `(start, end)` word indices in the source
/// - `length`: number of words in the chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub word_range: (usize, usize),
    pub length: usize,
}

/// A candidate as held by a vector store for one matching session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedCandidate {
    pub id: CandidateId,
    pub text: String,
    pub embedding: Embedding,
}

impl IndexedCandidate {
    /// Derives a stable id from the text and its position in the input batch.
    pub fn new(position: usize, text: String, embedding: Embedding) -> Self {
        Self { id: candidate_id(position, &text), text, embedding }
    }
}

/// First 16 hex chars of the blake3 digest of `text`, suffixed with `position`.
pub fn candidate_id(position: usize, text: &str) -> CandidateId {
    let digest = blake3::hash(text.as_bytes()).to_hex();
    format!("{}-{position}", &digest.as_str()[..16])
}

/// A store hit. `score` is cosine similarity, higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: CandidateId,
    pub text: String,
    pub score: f32,
}

/// One ranked candidate together with its generated explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate_text: String,
    pub score: f32,
    pub explanation: String,
}

impl MatchResult {
    pub fn pending(candidate: &ScoredCandidate) -> Self {
        Self { candidate_text: candidate.text.clone(), score: candidate.score, explanation: String::new() }
    }

    /// `score * 100` with two decimals, e.g. `"87.50%"`.
    pub fn score_percent(&self) -> String {
        format_score(self.score)
    }
}

/// Final product of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub run_id: u64,
    pub selection: PipelineSelection,
    pub matches: Vec<MatchResult>,
    pub explanation: String,
}
