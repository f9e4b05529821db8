//! Fictitious-entry marking.
//!
//! One synthesized row per thousand records, built from keyed draws so a
//! detector holding the marker id and the secret can rebuild every row and
//! probe the suspect for it. Insertion positions are drawn from an
//! unkeyed generator on purpose: the marker id must not reveal where the
//! synthetic rows sit.

use krng::{rng_for, CancelToken, Secret};
use log::{debug, info};
use rand::Rng as _;

use crate::dataset::row_exists;
use crate::transform::transform_value;
use crate::{Value, VectorDataset, VwmError};

// One synthetic row is added per chunk of this many records; chunks
// shorter than a tenth of it contribute none.
pub const CHUNK_SIZE: usize = 1000;
const CHUNK_MINIMUM: usize = CHUNK_SIZE / 10;

fn chunk_bounds(total: usize) -> Vec<(usize, usize)> {
    let parts = (total + CHUNK_SIZE - 1) / CHUNK_SIZE;
    (0..parts)
        .map(|i| (i * CHUNK_SIZE, ((i + 1) * CHUNK_SIZE).min(total)))
        .filter(|(lower, upper)| upper - lower >= CHUNK_MINIMUM)
        .collect()
}

/// Rebuild the synthetic rows for a marker, one per qualifying chunk.
fn synth_rows(
    df: &VectorDataset,
    marker_id: &str,
    secret: &Secret,
    cancel: &CancelToken,
) -> Result<Vec<VectorDataset>, VwmError> {
    let mut rng = rng_for(marker_id, secret)?;
    let columns = df.column_names().to_vec();
    let mut rows = Vec::new();
    for (lower, upper) in chunk_bounds(df.len()) {
        cancel.checkpoint()?;
        let mut size = columns.len();
        if df.has_geometry() {
            size += 1;
        }
        let rand_map = rng.ints(lower as u64, upper as u64, size);
        let values: Vec<Value> = (0..columns.len())
            .map(|c| {
                let source_row = rand_map[c] as usize;
                transform_value(df.value(c, source_row), rand_map[c])
            })
            .collect();
        let geometry = if df.has_geometry() {
            let source_row = *rand_map.last().expect("geometry draw present") as usize;
            df.geometry_opt().map(|g| g[source_row].clone())
        } else {
            None
        };
        rows.push(VectorDataset::single_row(columns.clone(), values, geometry));
    }
    debug!(
        "synthesized rows [marker_id={:?} rows={}]",
        marker_id,
        rows.len()
    );
    Ok(rows)
}

/// Insertion positions, one per qualifying chunk.
///
/// These draws are intentionally not keyed; an embed places its rows at
/// positions that cannot be recomputed from the marker id.
fn insertion_indices(total: usize) -> Vec<usize> {
    let mut rng = rand::rng();
    chunk_bounds(total)
        .into_iter()
        .map(|(lower, upper)| rng.random_range(lower..upper))
        .collect()
}

/// Interleave fictitious rows into a copy of the dataset.
pub fn embed_fictitious(
    df: &VectorDataset,
    marker_id: &str,
    secret: &Secret,
    cancel: &CancelToken,
) -> Result<VectorDataset, VwmError> {
    let rows = synth_rows(df, marker_id, secret, cancel)?;
    let indices = insertion_indices(df.len());

    let mut parts = Vec::with_capacity(rows.len() * 2 + 1);
    let mut offset = 0usize;
    for (row, index) in rows.into_iter().zip(indices.into_iter()) {
        parts.push(df.slice(offset, index));
        parts.push(row);
        offset = index;
    }
    parts.push(df.slice(offset, df.len()));
    let marked = VectorDataset::concat(&parts);
    info!(
        "embedded fictitious entries [marker_id={:?} rows={} total={}]",
        marker_id,
        marked.len() - df.len(),
        marked.len()
    );
    Ok(marked)
}

/// Whether `suspect` contains the fictitious rows of `(original, marker)`.
pub fn detect_fictitious(
    original: &VectorDataset,
    suspect: &VectorDataset,
    marker_id: &str,
    secret: &Secret,
    cancel: &CancelToken,
) -> Result<bool, VwmError> {
    let rows = synth_rows(original, marker_id, secret, cancel)?;
    for row in &rows {
        cancel.checkpoint()?;
        if row_exists(suspect, row) {
            info!("fictitious entry found [marker_id={:?}]", marker_id);
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_bounds_skips_short_tail() {
        let bounds = chunk_bounds(2050);
        // the 50-row tail is below the minimum
        assert_eq!(vec![(0, 1000), (1000, 2000)], bounds);
        assert_eq!(vec![(0, 1000), (1000, 2000), (2000, 2150)], chunk_bounds(2150));
        assert!(chunk_bounds(99).is_empty());
        assert_eq!(vec![(0, 100)], chunk_bounds(100));
    }
}
