use krng::{CancelToken, KrngError, Secret};
use std::error;
use std::fmt;

pub mod dataset;
mod fictitious;
mod geometry;
pub mod io;
mod transform;
pub mod wkt;

pub use dataset::{row_exists, Value, VectorDataset};
pub use fictitious::{detect_fictitious, embed_fictitious, CHUNK_SIZE};
pub use geometry::{detect_geometries, embed_geometries};
pub use io::{read_dataset, write_dataset, ReadOptions};
pub use transform::{round_to_sample, transform_geometry, transform_value, type_id};

#[derive(Debug)]
pub enum VwmError {
    // The process secret was never provided to a keyed operation.
    Uninitialized,

    // Geometry transform invoked on a type it cannot extend.
    UnsupportedGeometry { type_id: u32 },

    // Geometry marking invoked on a dataset without geometry.
    NotGeometric,

    // An option failed validation before any file was touched.
    InvalidOption { message: String },

    // The path does not lead to a readable dataset.
    DatasetMissing { message: String },

    // The cancellation flag was observed between processing units.
    Canceled,

    // I/O or parsing failure from the dataset layer.
    Internal { message: String },
}

impl error::Error for VwmError {}
impl fmt::Display for VwmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Uninitialized => {
                write!(f, "secret key has not been set")
            }
            Self::UnsupportedGeometry { type_id } => {
                write!(
                    f,
                    "geometry of type id {} is not a (multi)line or (multi)polygon",
                    type_id
                )
            }
            Self::NotGeometric => {
                write!(f, "dataset does not contain geometries")
            }
            Self::InvalidOption { message } => {
                write!(f, "invalid option: {}", message)
            }
            Self::DatasetMissing { message } => {
                write!(f, "no recognized vector dataset: {}", message)
            }
            Self::Canceled => {
                write!(f, "operation canceled")
            }
            Self::Internal { message } => {
                write!(f, "vector layer failure: {}", message)
            }
        }
    }
}

impl From<KrngError> for VwmError {
    fn from(e: KrngError) -> VwmError {
        match e {
            KrngError::Uninitialized => VwmError::Uninitialized,
            KrngError::Canceled => VwmError::Canceled,
        }
    }
}

/// Probe `suspect` for fictitious entries under each marker id in turn;
/// the first id that matches wins.
pub fn detect_fictitious_any(
    original: &VectorDataset,
    suspect: &VectorDataset,
    marker_ids: &[String],
    secret: &Secret,
    cancel: &CancelToken,
) -> Result<Option<String>, VwmError> {
    for marker_id in marker_ids {
        if detect_fictitious(original, suspect, marker_id, secret, cancel)? {
            return Ok(Some(marker_id.clone()));
        }
    }
    Ok(None)
}

/// Probe `suspect` for marked geometries under each marker id in turn.
pub fn detect_geometries_any(
    original: &VectorDataset,
    suspect: &VectorDataset,
    marker_ids: &[String],
    secret: &Secret,
    cancel: &CancelToken,
) -> Result<Option<String>, VwmError> {
    for marker_id in marker_ids {
        if detect_geometries(original, suspect, marker_id, secret, cancel)? {
            return Ok(Some(marker_id.clone()));
        }
    }
    Ok(None)
}
