use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;

use cvmatch_core::chunker::{embed_with_chunking, SlidingWindowChunker};
use cvmatch_core::{
    Config, Embedder, Embedding, EmbeddingModelKind, MatchError, PromptVersion, RetrievalBackend, Result,
};

/// Embeds each text as `[word_count, first_word_len]` and counts calls.
#[derive(Default)]
struct CountingEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn id(&self) -> &str { "counting" }
    fn dim(&self) -> usize { 2 }
    async fn load_model(&self) -> Result<()> { Ok(()) }
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let words: Vec<&str> = text.split_whitespace().collect();
        let first = words.first().map_or(0, |w| w.len());
        Ok(vec![words.len() as f32, first as f32])
    }
}

#[test]
fn config_file_overrides_defaults() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("cvmatch.toml"),
        r#"
[pipeline]
embedding_model = "hashed"
generative_model = "claude_haiku"
retrieval_backend = "exact"
prompt_version = "v2"

[retrieval]
top_k = 5
min_score = 0.8

[store]
lancedb_dir = "/tmp/cvmatch-test"
"#,
    )
    .unwrap();

    let config = Config::load_from(tmp.path()).expect("load");
    let settings = config.settings().expect("settings");
    assert_eq!(settings.pipeline.embedding_model, EmbeddingModelKind::Hashed);
    assert_eq!(settings.pipeline.retrieval_backend, RetrievalBackend::Exact);
    assert_eq!(settings.pipeline.prompt_version, PromptVersion::V2);
    assert_eq!(settings.retrieval.top_k, 5);
    assert_eq!(settings.retrieval.min_score, Some(0.8));
    assert_eq!(settings.chunking.window_size, 5, "untouched sections keep defaults");
    assert_eq!(settings.lancedb_path(), std::path::PathBuf::from("/tmp/cvmatch-test"));

    let top_k: usize = config.get("retrieval.top_k").unwrap();
    assert_eq!(top_k, 5);
}

#[test]
fn config_without_files_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let settings = Config::load_from(tmp.path()).unwrap().settings().unwrap();
    assert_eq!(settings.retrieval.top_k, 3);
    assert_eq!(settings.retrieval.min_score, None);
    assert_eq!(settings.generation.timeout_secs, 120.0);
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("cvmatch.toml"), "[chunking]\nwindow_size = 2\nstride = 3\n").unwrap();
    let err = Config::load_from(tmp.path()).unwrap().settings().unwrap_err();
    assert!(matches!(err, MatchError::InvalidConfig(_)));
}

#[tokio::test]
async fn chunked_embedding_is_mean_of_chunks() {
    let embedder = CountingEmbedder::default();
    let chunker = SlidingWindowChunker::new(3, 2).unwrap();
    // chunks: "aa bbb c" (3 words, 2), "c dddd" (2 words, 1)
    let v = embed_with_chunking(&chunker, &embedder, "aa bbb c dddd").await.unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(v, vec![2.5, 1.5]);
}

#[tokio::test]
async fn whitespace_text_is_embedded_whole() {
    let embedder = CountingEmbedder::default();
    let v = embed_with_chunking(&SlidingWindowChunker::default(), &embedder, "   ").await.unwrap();
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(v, vec![0.0, 0.0]);
}
