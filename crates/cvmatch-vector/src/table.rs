//! LanceDB connection and row helpers.
//!
//! Opens the database, creates per-model candidate tables on demand and converts
//! between `IndexedCandidate`s and Arrow record batches.
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use chrono::Utc;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{connect, Connection, DistanceType, Table};
use std::sync::Arc;

use cvmatch_core::{IndexedCandidate, MatchError, Result, ScoredCandidate};

use crate::schema::{candidate_schema, vector_dim};

pub(crate) fn index_err(e: impl std::fmt::Display) -> MatchError { MatchError::IndexOperationFailed(e.to_string()) }
pub(crate) fn search_err(e: impl std::fmt::Display) -> MatchError { MatchError::SearchOperationFailed(e.to_string()) }

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(index_err)
}

/// Opens `name`, creating it empty when missing. An existing table with a different
/// vector width is rejected.
pub async fn ensure_table(conn: &Connection, name: &str, dim: usize) -> Result<Table> {
    let names = conn.table_names().execute().await.map_err(index_err)?;
    if !names.contains(&name.to_string()) {
        let schema = candidate_schema(dim as i32);
        // create empty table with 0 rows
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
        conn.create_table(name, Box::new(iter)).execute().await.map_err(index_err)?;
    }
    let table = conn.open_table(name).execute().await.map_err(index_err)?;
    let schema = table.schema().await.map_err(index_err)?;
    match vector_dim(&schema) {
        Some(d) if d as usize == dim => Ok(table),
        other => Err(MatchError::IndexOperationFailed(format!(
            "table '{name}' has vector width {other:?}, expected {dim}"
        ))),
    }
}

pub fn candidates_to_batch(candidates: &[IndexedCandidate], dim: usize) -> Result<RecordBatch> {
    let now = Utc::now().timestamp_millis();
    let mut ids = Vec::with_capacity(candidates.len());
    let mut texts = Vec::with_capacity(candidates.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if c.embedding.len() != dim {
            return Err(MatchError::IndexOperationFailed(format!(
                "candidate {} has {} dims, store expects {dim}", c.id, c.embedding.len()
            )));
        }
        ids.push(c.id.clone());
        texts.push(c.text.clone());
        vectors.push(Some(c.embedding.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(candidate_schema(dim as i32), vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(texts)),
        Arc::new(TimestampMillisecondArray::from(vec![now; candidates.len()])),
        Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(vectors.into_iter(), dim as i32)),
    ])
    .map_err(index_err)
}

pub async fn append(table: &Table, batch: RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    table.add(reader).execute().await.map_err(index_err)?;
    Ok(())
}

/// Cosine nearest neighbours, best first. Score is `1 - distance`.
pub async fn nearest(table: &Table, query: &[f32], limit: usize) -> Result<Vec<ScoredCandidate>> {
    let mut stream = table
        .vector_search(query.to_vec())
        .map_err(search_err)?
        .distance_type(DistanceType::Cosine)
        .select(Select::columns(&["id", "text"]))
        .limit(limit)
        .execute()
        .await
        .map_err(search_err)?;
    let mut hits = Vec::new();
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await.map_err(search_err)? {
        let ids = string_column(&batch, "id")?;
        let texts = string_column(&batch, "text")?;
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| MatchError::SearchOperationFailed("result has no _distance column".into()))?;
        for i in 0..batch.num_rows() {
            if distances.is_null(i) { continue; }
            hits.push(ScoredCandidate { id: ids.value(i).to_string(), text: texts.value(i).to_string(), score: 1.0 - distances.value(i) });
        }
    }
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(hits)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| MatchError::SearchOperationFailed(format!("result has no '{name}' column")))
}
