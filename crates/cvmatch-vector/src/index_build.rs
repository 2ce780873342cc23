//! IVF_PQ training for candidate tables.
//!
//! Small tables are answered by flat scan; once a table reaches the configured row
//! count an IVF_PQ index is (re)built over `vector` with cosine distance.
use lancedb::index::{vector::IvfPqIndexBuilder, Index};
use lancedb::{DistanceType, Table};
use tracing::info;

use cvmatch_core::Result;

use crate::table::index_err;

/// PQ with 8 bits needs at least this many rows to train its codebooks.
pub const MIN_TRAINING_ROWS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfPqParams {
    pub nlist: usize,
    pub m: usize,
}

pub fn compute_ivfpq_params(total_rows: usize, dim: usize) -> IvfPqParams {
    let sqrt_n = (total_rows as f64).sqrt() as usize;
    let nlist = sqrt_n.clamp(1, 256);
    // sub-vectors must divide the dimension
    let m = [32, 16, 8, 4, 2, 1].into_iter().find(|m| dim >= 16 * m && dim % m == 0).unwrap_or(1);
    IvfPqParams { nlist, m }
}

pub fn should_build(rows: usize, ann_min_rows: usize) -> bool {
    rows >= ann_min_rows.max(MIN_TRAINING_ROWS)
}

pub async fn build_ivfpq_index(table: &Table, index_name: &str, params: &IvfPqParams) -> Result<()> {
    info!(table = table.name(), nlist = params.nlist, m = params.m, "training IVF_PQ index");
    table
        .create_index(
            &["vector"],
            Index::IvfPq(
                IvfPqIndexBuilder::default()
                    .distance_type(DistanceType::Cosine)
                    .num_partitions(params.nlist as u32)
                    .num_sub_vectors(params.m as u32),
            ),
        )
        .name(index_name.to_string())
        .replace(true)
        .execute()
        .await
        .map_err(index_err)?;
    Ok(())
}
