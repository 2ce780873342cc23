use async_trait::async_trait;
use parking_lot::RwLock;

use cvmatch_core::similarity::cosine;
use cvmatch_core::{IndexedCandidate, MatchError, Result, ScoredCandidate, VectorStore};

#[derive(Debug, Default)]
struct State {
    dim: usize,
    entries: Vec<IndexedCandidate>,
}

/// Brute-force cosine scan over an insertion-ordered list.
#[derive(Debug, Default)]
pub struct ExactStore {
    state: RwLock<Option<State>>,
}

impl ExactStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize {
        self.state.read().as_ref().map_or(0, |s| s.entries.len())
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl VectorStore for ExactStore {
    fn id(&self) -> &str { "exact" }

    /// Re-running setup with a new dimension drops existing entries.
    async fn setup(&self, dim: usize) -> Result<()> {
        let mut state = self.state.write();
        match state.as_mut() {
            Some(s) if s.dim == dim => {}
            _ => *state = Some(State { dim, entries: Vec::new() }),
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        let s = state.as_mut().ok_or(MatchError::StoreNotReady)?;
        s.entries.clear();
        Ok(())
    }

    async fn index(&self, candidates: Vec<IndexedCandidate>) -> Result<()> {
        let mut state = self.state.write();
        let s = state.as_mut().ok_or(MatchError::StoreNotReady)?;
        if let Some(bad) = candidates.iter().find(|c| c.embedding.len() != s.dim) {
            return Err(MatchError::IndexOperationFailed(format!(
                "candidate {} has {} dims, store expects {}", bad.id, bad.embedding.len(), s.dim
            )));
        }
        s.entries.extend(candidates);
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize, min_score: Option<f32>) -> Result<Vec<ScoredCandidate>> {
        let state = self.state.read();
        let s = state.as_ref().ok_or(MatchError::StoreNotReady)?;
        if query.len() != s.dim {
            return Err(MatchError::SearchOperationFailed(format!(
                "query has {} dims, store expects {}", query.len(), s.dim
            )));
        }
        let mut hits: Vec<ScoredCandidate> = s
            .entries
            .iter()
            .map(|c| ScoredCandidate { id: c.id.clone(), text: c.text.clone(), score: cosine(query, &c.embedding) })
            .filter(|h| min_score.map_or(true, |min| h.score >= min))
            .collect();
        // stable: equal scores keep insertion order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(pos: usize, text: &str, v: Vec<f32>) -> IndexedCandidate {
        IndexedCandidate::new(pos, text.to_string(), v)
    }

    #[tokio::test]
    async fn not_ready_before_setup() {
        let store = ExactStore::new();
        assert_eq!(store.search(&[1.0], 1, None).await, Err(MatchError::StoreNotReady));
        assert_eq!(store.index(vec![]).await, Err(MatchError::StoreNotReady));
        assert_eq!(store.clear().await, Err(MatchError::StoreNotReady));
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let store = ExactStore::new();
        store.setup(2).await.unwrap();
        store
            .index(vec![cand(0, "first", vec![1.0, 0.0]), cand(1, "second", vec![2.0, 0.0]), cand(2, "other", vec![0.0, 1.0])])
            .await
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 3, None).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "other"]);
    }

    #[tokio::test]
    async fn min_score_applies_before_truncation() {
        let store = ExactStore::new();
        store.setup(2).await.unwrap();
        store
            .index(vec![cand(0, "a", vec![1.0, 0.0]), cand(1, "b", vec![0.9, 0.1]), cand(2, "c", vec![0.0, 1.0])])
            .await
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 3, Some(0.8)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.score >= 0.8));
    }

    #[tokio::test]
    async fn clear_and_dimension_checks() {
        let store = ExactStore::new();
        store.setup(2).await.unwrap();
        assert!(store.index(vec![cand(0, "bad", vec![1.0])]).await.is_err());
        store.index(vec![cand(0, "ok", vec![1.0, 1.0])]).await.unwrap();
        assert_eq!(store.len(), 1);
        store.clear().await.unwrap();
        assert!(store.search(&[1.0, 1.0], 3, None).await.unwrap().is_empty());
        assert!(store.search(&[1.0], 3, None).await.is_err());
    }
}
