use std::path::PathBuf;

use async_trait::async_trait;
use lancedb::{Connection, Table};
use tokio::sync::RwLock;
use tracing::{debug, info};

use cvmatch_core::{IndexedCandidate, MatchError, Result, ScoredCandidate, VectorStore};

use crate::index_build::{build_ivfpq_index, compute_ivfpq_params, should_build};
use crate::table::{append, candidates_to_batch, ensure_table, index_err, nearest, open_db, search_err};

struct Ready {
    _conn: Connection,
    table: Table,
    dim: usize,
}

/// Persistent approximate store: one LanceDB table per embedding model.
///
/// Rows survive the process, so a new candidate set must be preceded by `clear`.
pub struct LanceStore {
    uri: PathBuf,
    table_name: String,
    ann_min_rows: usize,
    ready: RwLock<Option<Ready>>,
}

impl LanceStore {
    pub fn new(uri: impl Into<PathBuf>, table_name: impl Into<String>, ann_min_rows: usize) -> Self {
        Self { uri: uri.into(), table_name: table_name.into(), ann_min_rows, ready: RwLock::new(None) }
    }

    pub fn table_name(&self) -> &str { &self.table_name }

    pub async fn count(&self) -> Result<usize> {
        let ready = self.ready.read().await;
        let r = ready.as_ref().ok_or(MatchError::StoreNotReady)?;
        r.table.count_rows(None).await.map_err(search_err)
    }
}

#[async_trait]
impl VectorStore for LanceStore {
    fn id(&self) -> &str { "approximate" }

    async fn setup(&self, dim: usize) -> Result<()> {
        let mut ready = self.ready.write().await;
        if ready.as_ref().is_some_and(|r| r.dim == dim) { return Ok(()); }
        if let Some(parent) = self.uri.parent() {
            std::fs::create_dir_all(parent).map_err(index_err)?;
        }
        let conn = open_db(&self.uri.to_string_lossy()).await?;
        let table = ensure_table(&conn, &self.table_name, dim).await?;
        info!(table = %self.table_name, uri = %self.uri.display(), dim, "lance store ready");
        *ready = Some(Ready { _conn: conn, table, dim });
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let ready = self.ready.read().await;
        let r = ready.as_ref().ok_or(MatchError::StoreNotReady)?;
        r.table.delete("id IS NOT NULL").await.map_err(index_err)?;
        debug!(table = %self.table_name, "cleared");
        Ok(())
    }

    async fn index(&self, candidates: Vec<IndexedCandidate>) -> Result<()> {
        let ready = self.ready.read().await;
        let r = ready.as_ref().ok_or(MatchError::StoreNotReady)?;
        if candidates.is_empty() { return Ok(()); }
        let batch = candidates_to_batch(&candidates, r.dim)?;
        append(&r.table, batch).await?;
        let rows = r.table.count_rows(None).await.map_err(index_err)?;
        debug!(table = %self.table_name, added = candidates.len(), rows, "indexed");
        if should_build(rows, self.ann_min_rows) {
            let params = compute_ivfpq_params(rows, r.dim);
            build_ivfpq_index(&r.table, &format!("{}_ivfpq", self.table_name), &params).await?;
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize, min_score: Option<f32>) -> Result<Vec<ScoredCandidate>> {
        let ready = self.ready.read().await;
        let r = ready.as_ref().ok_or(MatchError::StoreNotReady)?;
        if query.len() != r.dim {
            return Err(MatchError::SearchOperationFailed(format!("query has {} dims, store expects {}", query.len(), r.dim)));
        }
        let rows = r.table.count_rows(None).await.map_err(search_err)?;
        if top_k == 0 || rows == 0 { return Ok(Vec::new()); }
        // the threshold must see every row, not just the K nearest
        let limit = if min_score.is_some() { rows.max(top_k) } else { top_k };
        let mut hits = nearest(&r.table, query, limit).await?;
        if let Some(min) = min_score { hits.retain(|h| h.score >= min); }
        hits.truncate(top_k);
        Ok(hits)
    }
}
