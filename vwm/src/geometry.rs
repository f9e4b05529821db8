//! Geometry marking.
//!
//! A keyed selection of (multi)line and (multi)polygon features has their
//! geometry replaced by a shape-preserving extension. Selection and
//! transformation consume the keyed generator in a fixed order, so the
//! detector rebuilds the exact candidates by replaying the same draws.

use geo_types::Geometry;
use krng::{rng_for, CancelToken, Rng, Secret};
use log::{debug, info};
use std::collections::BTreeSet;

use crate::fictitious::CHUNK_SIZE;
use crate::transform::{transform_geometry, type_id};
use crate::{VectorDataset, VwmError};

// Selection draws are oversampled by this factor; duplicate draws still
// leave roughly one unique pick per thousand candidates.
const OVERSAMPLE: usize = 10;

/// Keyed pick of marking candidates: ascending unique feature indices and
/// their geometries.
fn select_candidates(
    df: &VectorDataset,
    rng: &mut Rng,
) -> Result<(Vec<usize>, Vec<Geometry<f64>>), VwmError> {
    let geometries = df.geometry_opt().ok_or(VwmError::NotGeometric)?;
    let candidates: Vec<usize> = geometries
        .iter()
        .enumerate()
        .filter(|(_, g)| matches!(type_id(g), 1 | 3 | 5 | 6))
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let count = ((candidates.len() + CHUNK_SIZE - 1) / CHUNK_SIZE) * OVERSAMPLE;
    let draws = rng.ints(0, candidates.len() as u64, count);
    let unique: BTreeSet<usize> = draws.into_iter().map(|d| candidates[d as usize]).collect();
    let indices: Vec<usize> = unique.into_iter().collect();
    let picked = indices.iter().map(|i| geometries[*i].clone()).collect();
    debug!(
        "selected candidate geometries [candidates={} picked={}]",
        candidates.len(),
        indices.len()
    );
    Ok((indices, picked))
}

/// Replace selected geometries with collinearly extended ones.
pub fn embed_geometries(
    df: &VectorDataset,
    marker_id: &str,
    secret: &Secret,
    cancel: &CancelToken,
) -> Result<VectorDataset, VwmError> {
    if !df.has_geometry() {
        return Err(VwmError::NotGeometric);
    }
    let mut rng = rng_for(marker_id, secret)?;
    let (indices, geometries) = select_candidates(df, &mut rng)?;

    let mut parts = Vec::with_capacity(indices.len() * 2 + 1);
    let mut offset = 0usize;
    for (i, index) in indices.iter().enumerate() {
        cancel.checkpoint()?;
        parts.push(df.slice(offset, *index));
        let transformed = transform_geometry(&geometries[i], &mut rng)?;
        parts.push(df.slice(*index, index + 1).with_geometry(vec![transformed]));
        offset = index + 1;
    }
    parts.push(df.slice(offset, df.len()));
    let marked = VectorDataset::concat(&parts);
    info!(
        "embedded geometry marks [marker_id={:?} features={}]",
        marker_id,
        indices.len()
    );
    Ok(marked)
}

/// Whether `suspect` contains any geometry the embedder would have
/// produced for `(original, marker)`.
pub fn detect_geometries(
    original: &VectorDataset,
    suspect: &VectorDataset,
    marker_id: &str,
    secret: &Secret,
    cancel: &CancelToken,
) -> Result<bool, VwmError> {
    if !original.has_geometry() {
        return Err(VwmError::NotGeometric);
    }
    let mut rng = rng_for(marker_id, secret)?;
    let (_, geometries) = select_candidates(original, &mut rng)?;
    let suspect_geometries = suspect.geometry_opt().unwrap_or(&[]);

    for geometry in &geometries {
        cancel.checkpoint()?;
        let candidate = transform_geometry(geometry, &mut rng)?;
        if suspect_geometries.iter().any(|g| *g == candidate) {
            info!("marked geometry found [marker_id={:?}]", marker_id);
            return Ok(true);
        }
    }
    Ok(false)
}
