//! Invisible message embedding in the wavelet domain.
//!
//! The message becomes a QR symbol, Arnold-scrambled and pressed into the
//! level-3 diagonal sub-band of each color band as a per-coefficient
//! modulation of one mean magnitude. Detection subtracts the original's
//! sub-band from the suspect's, so both sides must run the identical
//! decomposition, including the reconstruction crop of the last row and
//! column.

use krng::CancelToken;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::haar::{waverec2, wavedec2, Matrix};
use crate::{
    create_copy, read_dataset, Driver, RasterAsset, RwmError,
};

// Arnold iterations applied to the QR symbol before modulation.
const SCRAMBLE_ITERATIONS: usize = 20;
const DECOMPOSITION_LEVELS: usize = 3;

fn band_matrix(data: &[f64], width: usize, height: usize) -> Matrix {
    Matrix::from_data(height, width, data.to_vec())
}

impl RasterAsset {
    /// Embed `message` invisibly and write the marked raster to `out`.
    ///
    /// The artifact is written as GeoTIFF first and copy-created to the
    /// source driver when that differs; color-mapped sources are
    /// re-palettized with their original color count.
    pub fn embed_message(
        &self,
        out: &Path,
        message: &str,
        cancel: &CancelToken,
    ) -> Result<PathBuf, RwmError> {
        let source = self.dataset();
        let width = source.width;
        let height = source.height;
        let tif_out = if source.driver == Driver::GTiff {
            out.to_path_buf()
        } else {
            let mut with_tif = out.as_os_str().to_owned();
            with_tif.push(".tif");
            PathBuf::from(with_tif)
        };

        let mut merged = source.clone();
        let mut scrambled = None;

        for band_index in self.color_band_indices() {
            cancel.checkpoint().map_err(RwmError::from)?;
            let band = &source.bands[band_index];
            let mut decomposition =
                wavedec2(&band_matrix(&band.data, width, height), DECOMPOSITION_LEVELS);
            let hh3 = &mut decomposition.details[0].hh;
            let dim = hh3.rows().min(hh3.cols());

            if scrambled.is_none() {
                let qr = qrm::encode(message, Some(dim))?;
                scrambled = Some(qrm::scramble(&qr, SCRAMBLE_ITERATIONS));
                debug!("built scrambled QR [dim={}]", dim);
            }
            let bits = scrambled.as_ref().expect("built on first band");

            let alpha = hh3.mean_abs();
            for x in 0..dim {
                for y in 0..dim {
                    let value = hh3.get(x, y);
                    if bits.get(x, y) {
                        hh3.set(x, y, value + alpha);
                    } else {
                        hh3.set(x, y, value - alpha);
                    }
                }
            }

            // reconstruct and drop the trailing row/column; those samples
            // stay as in the source copy
            let reconstructed = waverec2(&decomposition);
            let target = &mut merged.bands[band_index].data;
            for i in 0..height.saturating_sub(1) {
                for j in 0..width.saturating_sub(1) {
                    target[i * width + j] = reconstructed.get(i, j);
                }
            }
            debug!(
                "modulated sub-band [band={} dim={} alpha={}]",
                band_index, dim, alpha
            );
        }

        merged.driver = Driver::GTiff;
        create_copy(&merged, &tif_out)?;

        if source.driver != Driver::GTiff {
            let mut produced = read_dataset(&tif_out)?;
            produced.driver = source.driver;
            create_copy(&produced, out)?;
            std::fs::remove_file(&tif_out)?;
        }

        if let Some(count) = self.palette_count() {
            crate::pct::rgb2pct(out, out, source.driver, count, self.scratch())?;
        }
        info!("embedded invisible message [out={:?}]", out);
        Ok(out.to_path_buf())
    }

    /// Recover the message embedded in `suspect`, using this raster as the
    /// unmarked original. `None` when nothing decodes or no band of the
    /// suspect matches a band role of the original.
    pub fn detect_message(
        &self,
        suspect_path: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<String>, RwmError> {
        let suspect = RasterAsset::open(suspect_path, None, self.scratch())?;
        let original = self.dataset();

        let mut bitmap: Option<Vec<f64>> = None;
        let mut dim = 0usize;

        for band_index in suspect.color_band_indices() {
            cancel.checkpoint().map_err(RwmError::from)?;
            let role = suspect.dataset().bands[band_index].role;
            let original_index = match self.interp().get(role) {
                Some(index) => index,
                None => {
                    warn!("suspect band role {} absent from original", role);
                    continue;
                }
            };

            let original_band = &original.bands[original_index];
            let suspect_band = &suspect.dataset().bands[band_index];
            let original_dec = wavedec2(
                &band_matrix(&original_band.data, original.width, original.height),
                DECOMPOSITION_LEVELS,
            );
            let suspect_dec = wavedec2(
                &band_matrix(
                    &suspect_band.data,
                    suspect.dataset().width,
                    suspect.dataset().height,
                ),
                DECOMPOSITION_LEVELS,
            );
            let hh3 = &original_dec.details[0].hh;
            let hh3_suspect = &suspect_dec.details[0].hh;

            if bitmap.is_none() {
                dim = hh3.rows().min(hh3.cols());
                bitmap = Some(vec![0.0; dim * dim]);
            }
            let accumulator = bitmap.as_mut().expect("initialized above");

            let alpha = hh3.mean_abs();
            if alpha == 0.0 {
                warn!("flat sub-band on original, skipping band {}", band_index);
                continue;
            }
            for x in 0..dim {
                for y in 0..dim {
                    // out-of-range suspect coefficients contribute nothing
                    if x >= hh3_suspect.rows() || y >= hh3_suspect.cols() {
                        continue;
                    }
                    if x >= hh3.rows() || y >= hh3.cols() {
                        continue;
                    }
                    accumulator[x * dim + y] += (hh3_suspect.get(x, y) - hh3.get(x, y)) / alpha;
                }
            }
            debug!("accumulated sub-band difference [band={}]", band_index);
        }

        let accumulator = match bitmap {
            Some(acc) => acc,
            None => return Ok(None),
        };

        let mut matrix = qrm::BitMatrix::new(dim);
        for x in 0..dim {
            for y in 0..dim {
                matrix.set(x, y, accumulator[x * dim + y] >= 0.0);
            }
        }
        let unscrambled = qrm::unscramble(&matrix, SCRAMBLE_ITERATIONS);
        Ok(qrm::decode(&unscrambled))
    }
}
