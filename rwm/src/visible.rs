//! Visible watermark compositing.
//!
//! The watermark image is resized or tiled onto a canvas matching the
//! raster, re-opened as a raster sharing the source's georeferencing, and
//! alpha-blended into the color bands. Pixels where the watermark carries
//! no weight are left bit-identical to the source.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbaImage};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{
    append_to_filename, classify, create_copy, read_dataset, ColorRole, RasterAsset,
    RasterDataset, RasterMode, RwmError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    Stretch,
    Height,
    Width,
    Original,
    Tile,
}

impl FromStr for Fit {
    type Err = RwmError;

    fn from_str(s: &str) -> Result<Fit, RwmError> {
        match s {
            "stretch" => Ok(Fit::Stretch),
            "height" => Ok(Fit::Height),
            "width" => Ok(Fit::Width),
            "original" => Ok(Fit::Original),
            "tile" => Ok(Fit::Tile),
            other => Err(RwmError::InvalidOption {
                message: format!(
                    "fit {:?} is not one of stretch, height, width, original, tile",
                    other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    TopLeft,
    TopRight,
    BottomRight,
    BottomLeft,
    Center,
}

impl FromStr for Position {
    type Err = RwmError;

    fn from_str(s: &str) -> Result<Position, RwmError> {
        match s {
            "topleft" => Ok(Position::TopLeft),
            "topright" => Ok(Position::TopRight),
            "bottomright" => Ok(Position::BottomRight),
            "bottomleft" => Ok(Position::BottomLeft),
            "center" => Ok(Position::Center),
            other => Err(RwmError::InvalidOption {
                message: format!(
                    "position {:?} is not one of topleft, topright, bottomright, bottomleft, center",
                    other
                ),
            }),
        }
    }
}

/// Placement options for the visible watermark.
#[derive(Debug, Clone)]
pub struct VisibleOptions {
    pub fit: Fit,
    pub position: Position,
    pub transparency: f64,
    /// Tile spacing in pixels; required for `Fit::Tile`, ignored otherwise.
    pub distance: Option<(i64, i64)>,
    pub grayscale: bool,
}

impl Default for VisibleOptions {
    fn default() -> VisibleOptions {
        VisibleOptions {
            fit: Fit::Width,
            position: Position::Center,
            transparency: 1.0,
            distance: None,
            grayscale: true,
        }
    }
}

impl VisibleOptions {
    /// Reject bad combinations before any file is touched.
    fn validate(&self, raster_width: usize, raster_height: usize) -> Result<(), RwmError> {
        if !(0.0..=1.0).contains(&self.transparency) {
            return Err(RwmError::InvalidOption {
                message: format!("transparency {} outside [0, 1]", self.transparency),
            });
        }
        if self.fit == Fit::Tile {
            let (dx, dy) = self.distance.ok_or_else(|| RwmError::InvalidOption {
                message: "tile fit requires x and y distances".to_string(),
            })?;
            if dx <= 0 || dy <= 0 || dx >= raster_width as i64 || dy >= raster_height as i64 {
                return Err(RwmError::InvalidOption {
                    message: format!(
                        "tile distances ({}, {}) must be positive and below the raster size",
                        dx, dy
                    ),
                });
            }
        }
        Ok(())
    }
}

// Weights below this threshold leave the target pixel untouched.
const WEIGHT_THRESHOLD: f64 = 0.1;

fn round_half_even(value: f64) -> f64 {
    value.round_ties_even()
}

/// Margins (top, right, bottom, left) placing `size` inside `wall`.
fn calc_margins(wall: (u32, u32), size: (u32, u32), position: Position) -> (u32, u32, u32, u32) {
    let (wall_w, wall_h) = (wall.0 as i64, wall.1 as i64);
    let (w, h) = (size.0 as i64, size.1 as i64);
    let (ml, mr) = match position {
        Position::TopLeft | Position::BottomLeft => (0, wall_w - w),
        Position::TopRight | Position::BottomRight => (wall_w - w, 0),
        Position::Center => {
            let m = round_half_even((wall_w - w) as f64 / 2.0) as i64;
            (m, m)
        }
    };
    let (mt, mb) = match position {
        Position::TopLeft | Position::TopRight => (0, wall_h - h),
        Position::BottomLeft | Position::BottomRight => (wall_h - h, 0),
        Position::Center => {
            let m = round_half_even((wall_h - h) as f64 / 2.0) as i64;
            (m, m)
        }
    };
    (
        mt.max(0) as u32,
        mr.max(0) as u32,
        mb.max(0) as u32,
        ml.max(0) as u32,
    )
}

/// Paste `src` over `dst` at (x, y), clipping at the canvas edges.
fn paste(dst: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64) {
    for (sx, sy, pixel) in src.enumerate_pixels() {
        let tx = x + i64::from(sx);
        let ty = y + i64::from(sy);
        if tx < 0 || ty < 0 || tx >= i64::from(dst.width()) || ty >= i64::from(dst.height()) {
            continue;
        }
        dst.put_pixel(tx as u32, ty as u32, *pixel);
    }
}

fn save_prepared(
    img: DynamicImage,
    grayscale: bool,
    path: &Path,
) -> Result<(), RwmError> {
    if grayscale {
        DynamicImage::ImageLumaA8(img.to_luma_alpha8()).save(path)?;
    } else {
        DynamicImage::ImageRgba8(img.to_rgba8()).save(path)?;
    }
    Ok(())
}

/// Resize, position or tile the watermark onto a canvas matching the
/// raster; the prepared image lands in the scratch directory.
fn prepare_watermark(
    asset: &RasterAsset,
    wm_path: &Path,
    options: &VisibleOptions,
) -> Result<PathBuf, RwmError> {
    let raster_w = asset.dataset().width as u32;
    let raster_h = asset.dataset().height as u32;
    let wm = image::open(wm_path)?;
    let (wm_w, wm_h) = wm.dimensions();

    if options.fit == Fit::Tile {
        let (dx, dy) = options.distance.ok_or_else(|| RwmError::InvalidOption {
            message: "tile fit requires x and y distances".to_string(),
        })?;
        let mut canvas = RgbaImage::new(raster_w, raster_h);
        let tile = wm.to_rgba8();
        let mut x = dx;
        let mut y = dy;
        while y < i64::from(raster_h) {
            paste(&mut canvas, &tile, x, y);
            x += i64::from(wm_w) + dx;
            if x > i64::from(raster_w) {
                x -= i64::from(raster_w);
                y += i64::from(wm_h) + dy;
            }
        }
        let out = append_to_filename(asset.scratch(), wm_path, "-tiled", Some("png"));
        save_prepared(DynamicImage::ImageRgba8(canvas), options.grayscale, &out)?;
        debug!("tiled watermark [distance=({}, {}) out={:?}]", dx, dy, out);
        return Ok(out);
    }

    let mut size = match options.fit {
        Fit::Stretch => (raster_w, raster_h),
        Fit::Height => (
            round_half_even(f64::from(wm_w) * f64::from(raster_h) / f64::from(wm_h)) as u32,
            raster_h,
        ),
        Fit::Width => (
            raster_w,
            round_half_even(f64::from(wm_h) * f64::from(raster_w) / f64::from(wm_w)) as u32,
        ),
        Fit::Original => (wm_w, wm_h),
        Fit::Tile => unreachable!(),
    };

    let mut prepared = if size == (wm_w, wm_h) {
        wm
    } else {
        wm.resize_exact(size.0, size.1, FilterType::Lanczos3)
    };

    // overflow in either dimension is cropped symmetrically
    if size.0 > raster_w {
        let left = round_half_even(f64::from(size.0 - raster_w) / 2.0) as u32;
        prepared = prepared.crop_imm(left, 0, raster_w, size.1);
        size = (raster_w, size.1);
    }
    if size.1 > raster_h {
        let top = round_half_even(f64::from(size.1 - raster_h) / 2.0) as u32;
        prepared = prepared.crop_imm(0, top, size.0, raster_h);
        size = (size.0, raster_h);
    }

    let (mt, _mr, _mb, ml) = calc_margins((raster_w, raster_h), size, options.position);
    let mut canvas = RgbaImage::new(raster_w, raster_h);
    paste(&mut canvas, &prepared.to_rgba8(), i64::from(ml), i64::from(mt));

    let out = append_to_filename(asset.scratch(), wm_path, "-resized", Some("png"));
    save_prepared(DynamicImage::ImageRgba8(canvas), options.grayscale, &out)?;
    debug!(
        "prepared watermark [fit={:?} position={:?} size=({}, {}) out={:?}]",
        options.fit, options.position, size.0, size.1, out
    );
    Ok(out)
}

/// Re-open the prepared watermark as a raster sharing the source's bounds,
/// ground control points and spatial reference.
fn translate_watermark(asset: &RasterAsset, prepared: &Path) -> Result<RasterDataset, RwmError> {
    let mut translated = read_dataset(prepared)?;
    translated.carried = asset.dataset().carried.clone();
    let (ulx, uly, lrx, lry) = asset.dataset().bounds();
    debug!(
        "translated watermark onto bounds [({}, {}) - ({}, {})]",
        ulx, uly, lrx, lry
    );
    Ok(translated)
}

impl RasterAsset {
    /// Embed a visible watermark and write the marked raster to `out`.
    ///
    /// Returns the artifact path. Output dimensions and georeferencing
    /// equal the source's; color-mapped sources are re-palettized with
    /// their original color count.
    pub fn embed_image(
        &self,
        watermark: &Path,
        out: &Path,
        options: &VisibleOptions,
    ) -> Result<PathBuf, RwmError> {
        options.validate(self.dataset().width, self.dataset().height)?;
        let prepared = prepare_watermark(self, watermark, options)?;
        let translated = translate_watermark(self, &prepared)?;
        let (_, wm_interp) = classify(&translated)?;
        let wm_alpha = wm_interp
            .get(ColorRole::Alpha)
            .ok_or_else(|| RwmError::Internal {
                message: "prepared watermark lost its alpha channel".to_string(),
            })?;

        let roles: Vec<ColorRole> = match self.mode() {
            RasterMode::Grayscale => vec![ColorRole::Gray],
            RasterMode::Rgb => vec![ColorRole::Red, ColorRole::Green, ColorRole::Blue],
            RasterMode::Rgba | RasterMode::Palette => vec![
                ColorRole::Red,
                ColorRole::Green,
                ColorRole::Blue,
                ColorRole::Alpha,
            ],
        };

        let mut merged = self.dataset().clone();
        let type_max = merged.sample_type.max_value();
        let width = merged.width;
        let height = merged.height;

        for role in roles {
            let band_index = match self.interp().get(role) {
                Some(index) => index,
                None => continue,
            };
            // a grayscaled watermark stands in for any missing color role
            let wm_band = wm_interp
                .get(role)
                .or_else(|| wm_interp.get(ColorRole::Gray))
                .or_else(|| wm_interp.get(ColorRole::Red))
                .ok_or_else(|| RwmError::Internal {
                    message: format!("prepared watermark has no band usable for {}", role),
                })?;

            let stats = self.dataset().bands[band_index].stats();
            let nodata = self.dataset().bands[band_index].nodata;
            let max_value = if stats.max == 0.0 { type_max } else { stats.max };
            let opaque_fill = round_half_even(stats.mean + stats.std);

            let wm_data = &translated.bands[wm_band].data;
            let wm_alpha_data = &translated.bands[wm_alpha].data;
            let target = &mut merged.bands[band_index].data;

            for i in 0..height {
                for j in 0..width {
                    let at = i * width + j;
                    let wm_value = wm_data[at] / 255.0;
                    let alpha = wm_alpha_data[at] / 255.0;
                    if wm_value * alpha <= WEIGHT_THRESHOLD {
                        continue;
                    }
                    if role == ColorRole::Alpha {
                        let current = target[at];
                        if nodata == Some(current) || current == 0.0 {
                            target[at] = opaque_fill;
                        }
                        continue;
                    }
                    let a = alpha * options.transparency;
                    let n = (1.0 - wm_value) * a;
                    let current = target[at];
                    let blended = if nodata != Some(current) {
                        let true_value = current / max_value;
                        (1.0 - (1.0 - true_value) * (1.0 - a) - n) * max_value
                    } else {
                        (1.0 - n) * max_value
                    };
                    target[at] = round_half_even(blended).clamp(0.0, type_max);
                }
            }
            debug!("composited watermark into band [role={}]", role);
        }

        create_copy(&merged, out)?;
        if let Some(count) = self.palette_count() {
            crate::pct::rgb2pct(out, out, merged.driver, count, self.scratch())?;
        }
        info!("embedded visible watermark [out={:?}]", out);
        Ok(out.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margins_corner_positions() {
        assert_eq!(
            (0, 60, 30, 0),
            calc_margins((100, 50), (40, 20), Position::TopLeft)
        );
        assert_eq!(
            (30, 0, 0, 60),
            calc_margins((100, 50), (40, 20), Position::BottomRight)
        );
    }

    #[test]
    fn test_margins_center_half_even() {
        // (100 - 41) / 2 = 29.5 rounds to 30 under half-even
        let (mt, mr, mb, ml) = calc_margins((100, 100), (41, 41), Position::Center);
        assert_eq!((30, 30, 30, 30), (mt, mr, mb, ml));
        // (100 - 39) / 2 = 30.5 also rounds to 30
        let (mt, _, _, ml) = calc_margins((100, 100), (39, 39), Position::Center);
        assert_eq!((30, 30), (mt, ml));
    }

    #[test]
    fn test_fit_parsing() {
        assert_eq!(Fit::Tile, "tile".parse().unwrap());
        assert!("diagonal".parse::<Fit>().is_err());
        assert_eq!(Position::BottomLeft, "bottomleft".parse().unwrap());
        assert!("middle".parse::<Position>().is_err());
    }

    #[test]
    fn test_validate_transparency() {
        let mut options = VisibleOptions::default();
        options.transparency = -0.25;
        assert!(matches!(
            options.validate(100, 100),
            Err(RwmError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_validate_tile_distances() {
        let mut options = VisibleOptions::default();
        options.fit = Fit::Tile;
        options.distance = None;
        assert!(options.validate(100, 100).is_err());
        options.distance = Some((0, 10));
        assert!(options.validate(100, 100).is_err());
        options.distance = Some((10, 120));
        assert!(options.validate(100, 100).is_err());
        options.distance = Some((10, 10));
        assert!(options.validate(100, 100).is_ok());
    }

    #[test]
    fn test_paste_clips() {
        let mut dst = RgbaImage::new(4, 4);
        let mut src = RgbaImage::new(3, 3);
        for p in src.pixels_mut() {
            p.0 = [9, 9, 9, 255];
        }
        paste(&mut dst, &src, 2, 2);
        assert_eq!([9, 9, 9, 255], dst.get_pixel(3, 3).0);
        assert_eq!([0, 0, 0, 0], dst.get_pixel(1, 1).0);
    }
}
