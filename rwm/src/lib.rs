use image::GenericImageView as _;
use log::{debug, info};
use std::error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub mod geotiff;
pub mod haar;
mod invisible;
mod pct;
mod visible;

pub use pct::rgb2pct;
pub use visible::{Fit, Position, VisibleOptions};

use geotiff::{CarriedTag, Tiff, TiffError};

#[derive(Debug)]
pub enum RwmError {
    // The raster is neither grayscale, RGB(A), nor color-mapped.
    UnsupportedMode,

    // An embedding option failed validation before any file was touched.
    InvalidOption { message: String },

    // The path does not lead to a recognized raster.
    DatasetMissing { path: PathBuf },

    // The cancellation flag was observed between processing units.
    Canceled,

    // I/O or codec failure from the raster layer.
    Internal { message: String },
}

impl error::Error for RwmError {}
impl fmt::Display for RwmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnsupportedMode => {
                write!(
                    f,
                    "only grayscale, RGB(A), and color-mapped rasters are supported"
                )
            }
            Self::InvalidOption { message } => {
                write!(f, "invalid option: {}", message)
            }
            Self::DatasetMissing { path } => {
                write!(f, "no recognized raster at {:?}", path)
            }
            Self::Canceled => {
                write!(f, "operation canceled")
            }
            Self::Internal { message } => {
                write!(f, "raster layer failure: {}", message)
            }
        }
    }
}

impl From<TiffError> for RwmError {
    fn from(e: TiffError) -> RwmError {
        RwmError::Internal {
            message: e.to_string(),
        }
    }
}

impl From<io::Error> for RwmError {
    fn from(e: io::Error) -> RwmError {
        RwmError::Internal {
            message: e.to_string(),
        }
    }
}

impl From<image::ImageError> for RwmError {
    fn from(e: image::ImageError) -> RwmError {
        RwmError::Internal {
            message: e.to_string(),
        }
    }
}

impl From<qrm::QrmError> for RwmError {
    fn from(e: qrm::QrmError) -> RwmError {
        RwmError::Internal {
            message: e.to_string(),
        }
    }
}

impl From<krng::KrngError> for RwmError {
    fn from(e: krng::KrngError) -> RwmError {
        match e {
            krng::KrngError::Canceled => RwmError::Canceled,
            other => RwmError::Internal {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorRole {
    Red,
    Green,
    Blue,
    Alpha,
    Gray,
    Palette,
    Undefined,
}

impl fmt::Display for ColorRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Byte,
    UInt16,
}

impl SampleType {
    pub fn max_value(self) -> f64 {
        match self {
            SampleType::Byte => 255.0,
            SampleType::UInt16 => 65_535.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    GTiff,
    Png,
}

impl Driver {
    pub fn short_name(self) -> &'static str {
        match self {
            Driver::GTiff => "GTiff",
            Driver::Png => "PNG",
        }
    }

    fn from_path(path: &Path) -> Option<Driver> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tif" | "tiff" => Some(Driver::GTiff),
            "png" => Some(Driver::Png),
            _ => None,
        }
    }
}

/// One raster band: a color role and its samples as doubles.
#[derive(Clone)]
pub struct Band {
    pub role: ColorRole,
    pub data: Vec<f64>,
    pub nodata: Option<f64>,
}

/// Summary statistics over the valid (non-nodata) samples of a band.
#[derive(Debug, Clone, Copy)]
pub struct BandStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl Band {
    pub fn stats(&self) -> BandStats {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;
        for v in &self.data {
            if let Some(nd) = self.nodata {
                if *v == nd {
                    continue;
                }
            }
            min = min.min(*v);
            max = max.max(*v);
            sum += *v;
            count += 1;
        }
        if count == 0 {
            return BandStats {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std: 0.0,
            };
        }
        let mean = sum / count as f64;
        let mut var = 0.0;
        for v in &self.data {
            if let Some(nd) = self.nodata {
                if *v == nd {
                    continue;
                }
            }
            var += (*v - mean) * (*v - mean);
        }
        BandStats {
            min,
            max,
            mean,
            std: (var / count as f64).sqrt(),
        }
    }
}

/// An open raster: pixel planes plus everything needed to write an
/// equivalent, equally georeferenced file.
#[derive(Clone)]
pub struct RasterDataset {
    pub width: usize,
    pub height: usize,
    pub bands: Vec<Band>,
    pub sample_type: SampleType,
    pub driver: Driver,
    /// Palette colors (r, g, b) for color-mapped rasters.
    pub palette: Option<Vec<(u8, u8, u8)>>,
    /// Georeferencing and any other metadata tags, carried verbatim.
    pub carried: Vec<CarriedTag>,
}

impl RasterDataset {
    /// Affine transform from pixel to model space, derived from the carried
    /// pixel-scale/tiepoint (or transformation matrix) tags.
    pub fn geotransform(&self) -> [f64; 6] {
        let find = |tag: u16| self.carried.iter().find(|t| t.tag == tag);
        if let (Some(scale), Some(tie)) = (
            find(geotiff::TAG_MODEL_PIXEL_SCALE),
            find(geotiff::TAG_MODEL_TIEPOINT),
        ) {
            let s = scale.doubles();
            let t = tie.doubles();
            if s.len() >= 2 && t.len() >= 6 {
                let origin_x = t[3] - t[0] * s[0];
                let origin_y = t[4] + t[1] * s[1];
                return [origin_x, s[0], 0.0, origin_y, 0.0, -s[1]];
            }
        }
        if let Some(m) = find(geotiff::TAG_MODEL_TRANSFORMATION) {
            let v = m.doubles();
            if v.len() >= 16 {
                return [v[3], v[0], v[1], v[7], v[4], v[5]];
            }
        }
        [0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
    }

    /// Ground control points as (pixel, line, x, y, z), when the tiepoint
    /// tag holds more than one point.
    pub fn gcps(&self) -> Vec<(f64, f64, f64, f64, f64)> {
        let tie = match self
            .carried
            .iter()
            .find(|t| t.tag == geotiff::TAG_MODEL_TIEPOINT)
        {
            Some(t) => t.doubles(),
            None => return Vec::new(),
        };
        if tie.len() <= 6 {
            return Vec::new();
        }
        tie.chunks_exact(6)
            .map(|p| (p[0], p[1], p[3], p[4], p[5]))
            .collect()
    }

    /// Model-space bounds (ulx, uly, lrx, lry).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let gt = self.geotransform();
        let ulx = gt[0];
        let uly = gt[3];
        (
            ulx,
            uly,
            ulx + self.width as f64 * gt[1],
            uly + self.height as f64 * gt[5],
        )
    }

    pub fn band_by_role(&self, role: ColorRole) -> Option<&Band> {
        self.bands.iter().find(|b| b.role == role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterMode {
    Grayscale,
    Rgb,
    Rgba,
    Palette,
}

/// Band interpretation: recognized color roles mapped to band indices.
#[derive(Debug, Clone)]
pub struct BandInterp {
    entries: Vec<(ColorRole, usize)>,
}

impl BandInterp {
    pub fn get(&self, role: ColorRole) -> Option<usize> {
        self.entries
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, i)| *i)
    }

    pub fn roles(&self) -> impl Iterator<Item = ColorRole> + '_ {
        self.entries.iter().map(|(r, _)| *r)
    }
}

/// Classify the raster mode and map color roles to band indices.
pub fn classify(dataset: &RasterDataset) -> Result<(RasterMode, BandInterp), RwmError> {
    let mut entries: Vec<(ColorRole, usize)> = Vec::new();
    for (index, band) in dataset.bands.iter().enumerate() {
        match band.role {
            ColorRole::Undefined => {}
            role => {
                if entries.iter().all(|(r, _)| *r != role) {
                    entries.push((role, index));
                }
            }
        }
    }
    let has = |role: ColorRole| entries.iter().any(|(r, _)| *r == role);

    let mode = if has(ColorRole::Gray) {
        RasterMode::Grayscale
    } else if has(ColorRole::Red)
        && has(ColorRole::Green)
        && has(ColorRole::Blue)
        && entries.len() == 3
    {
        // a fourth undefined band with byte-range samples is taken as alpha
        let fourth_free = entries.iter().all(|(_, i)| *i != 3);
        if dataset.bands.len() == 4 && fourth_free {
            let stats = dataset.bands[3].stats();
            if dataset.bands[3].role == ColorRole::Undefined && stats.max < 256.0 {
                entries.push((ColorRole::Alpha, 3));
                RasterMode::Rgba
            } else {
                RasterMode::Rgb
            }
        } else {
            RasterMode::Rgb
        }
    } else if has(ColorRole::Red)
        && has(ColorRole::Green)
        && has(ColorRole::Blue)
        && has(ColorRole::Alpha)
        && entries.len() == 4
    {
        RasterMode::Rgba
    } else if has(ColorRole::Palette) {
        RasterMode::Palette
    } else {
        return Err(RwmError::UnsupportedMode);
    };

    Ok((mode, BandInterp { entries }))
}

fn tiff_band_roles(tiff: &Tiff) -> Vec<ColorRole> {
    let alpha_extra = tiff
        .extra_samples
        .first()
        .map(|e| *e == geotiff::EXTRA_SAMPLE_ALPHA || *e == 1)
        .unwrap_or(false);
    match tiff.photometric {
        geotiff::PHOTOMETRIC_GRAY => {
            let mut roles = vec![ColorRole::Gray];
            for i in 1..tiff.samples_per_pixel {
                roles.push(if i == 1 && alpha_extra {
                    ColorRole::Alpha
                } else {
                    ColorRole::Undefined
                });
            }
            roles
        }
        geotiff::PHOTOMETRIC_RGB => {
            let mut roles = vec![ColorRole::Red, ColorRole::Green, ColorRole::Blue];
            for i in 3..tiff.samples_per_pixel {
                roles.push(if i == 3 && alpha_extra {
                    ColorRole::Alpha
                } else {
                    ColorRole::Undefined
                });
            }
            roles
        }
        geotiff::PHOTOMETRIC_PALETTE => {
            let mut roles = vec![ColorRole::Palette];
            for _ in 1..tiff.samples_per_pixel {
                roles.push(ColorRole::Undefined);
            }
            roles
        }
        _ => vec![ColorRole::Undefined; tiff.samples_per_pixel],
    }
}

/// Read a raster file into a dataset, without mode classification.
pub fn read_dataset(path: &Path) -> Result<RasterDataset, RwmError> {
    let driver = Driver::from_path(path).ok_or_else(|| RwmError::DatasetMissing {
        path: path.to_path_buf(),
    })?;
    match driver {
        Driver::GTiff => {
            let tiff = geotiff::read(path)?;
            let roles = tiff_band_roles(&tiff);
            let palette = tiff.color_map.as_ref().map(|map| {
                let colors = map.len() / 3;
                (0..colors)
                    .map(|i| {
                        (
                            (map[i] / 257) as u8,
                            (map[colors + i] / 257) as u8,
                            (map[2 * colors + i] / 257) as u8,
                        )
                    })
                    .collect()
            });
            let sample_type = if tiff.bits_per_sample == 8 {
                SampleType::Byte
            } else {
                SampleType::UInt16
            };
            let bands = tiff
                .planes
                .iter()
                .zip(roles.into_iter())
                .map(|(plane, role)| Band {
                    role,
                    data: plane.clone(),
                    nodata: tiff.nodata,
                })
                .collect();
            Ok(RasterDataset {
                width: tiff.width,
                height: tiff.height,
                bands,
                sample_type,
                driver,
                palette,
                carried: tiff.carried,
            })
        }
        Driver::Png => {
            let img = image::open(path)?;
            Ok(dataset_from_image(img, driver))
        }
    }
}

fn dataset_from_image(img: image::DynamicImage, driver: Driver) -> RasterDataset {
    use image::DynamicImage::*;
    let width = img.width() as usize;
    let height = img.height() as usize;
    let (roles, sample_type): (Vec<ColorRole>, SampleType) = match &img {
        ImageLuma8(_) => (vec![ColorRole::Gray], SampleType::Byte),
        ImageLumaA8(_) => (vec![ColorRole::Gray, ColorRole::Alpha], SampleType::Byte),
        ImageRgb8(_) => (
            vec![ColorRole::Red, ColorRole::Green, ColorRole::Blue],
            SampleType::Byte,
        ),
        ImageLuma16(_) => (vec![ColorRole::Gray], SampleType::UInt16),
        ImageLumaA16(_) => (vec![ColorRole::Gray, ColorRole::Alpha], SampleType::UInt16),
        ImageRgb16(_) => (
            vec![ColorRole::Red, ColorRole::Green, ColorRole::Blue],
            SampleType::UInt16,
        ),
        ImageRgba16(_) => (
            vec![
                ColorRole::Red,
                ColorRole::Green,
                ColorRole::Blue,
                ColorRole::Alpha,
            ],
            SampleType::UInt16,
        ),
        _ => (
            vec![
                ColorRole::Red,
                ColorRole::Green,
                ColorRole::Blue,
                ColorRole::Alpha,
            ],
            SampleType::Byte,
        ),
    };
    let channels = roles.len();
    let mut planes = vec![vec![0.0f64; width * height]; channels];
    match sample_type {
        SampleType::Byte => {
            let buf = if channels == 4 {
                img.to_rgba8().into_raw()
            } else {
                match img {
                    ImageLuma8(b) => b.into_raw(),
                    ImageLumaA8(b) => b.into_raw(),
                    ImageRgb8(b) => b.into_raw(),
                    other => other.to_rgba8().into_raw(),
                }
            };
            for pixel in 0..width * height {
                for c in 0..channels {
                    planes[c][pixel] = f64::from(buf[pixel * channels + c]);
                }
            }
        }
        SampleType::UInt16 => {
            let buf: Vec<u16> = match img {
                ImageLuma16(b) => b.into_raw(),
                ImageLumaA16(b) => b.into_raw(),
                ImageRgb16(b) => b.into_raw(),
                ImageRgba16(b) => b.into_raw(),
                other => other.to_rgba16().into_raw(),
            };
            for pixel in 0..width * height {
                for c in 0..channels {
                    planes[c][pixel] = f64::from(buf[pixel * channels + c]);
                }
            }
        }
    }
    let bands = planes
        .into_iter()
        .zip(roles.into_iter())
        .map(|(data, role)| Band {
            role,
            data,
            nodata: None,
        })
        .collect();
    RasterDataset {
        width,
        height,
        bands,
        sample_type,
        driver,
        palette: None,
        carried: Vec::new(),
    }
}

/// Write a dataset to `path` in the given driver format, preserving the
/// carried georeferencing tags (GeoTIFF only; PNG has none to keep).
pub fn write_dataset(dataset: &RasterDataset, path: &Path, driver: Driver) -> Result<(), RwmError> {
    match driver {
        Driver::GTiff => {
            let (photometric, extra_samples, color_map) = match dataset
                .bands
                .first()
                .map(|b| b.role)
                .unwrap_or(ColorRole::Undefined)
            {
                ColorRole::Gray => (
                    geotiff::PHOTOMETRIC_GRAY,
                    if dataset.bands.len() > 1 {
                        vec![geotiff::EXTRA_SAMPLE_ALPHA]
                    } else {
                        Vec::new()
                    },
                    None,
                ),
                ColorRole::Palette => {
                    let palette = dataset.palette.clone().unwrap_or_default();
                    let colors = palette.len();
                    let mut map = vec![0u16; colors * 3];
                    for (i, (r, g, b)) in palette.iter().enumerate() {
                        map[i] = u16::from(*r) * 257;
                        map[colors + i] = u16::from(*g) * 257;
                        map[2 * colors + i] = u16::from(*b) * 257;
                    }
                    (geotiff::PHOTOMETRIC_PALETTE, Vec::new(), Some(map))
                }
                _ => (
                    geotiff::PHOTOMETRIC_RGB,
                    if dataset.bands.len() > 3 {
                        vec![geotiff::EXTRA_SAMPLE_ALPHA]
                    } else {
                        Vec::new()
                    },
                    None,
                ),
            };
            let tiff = Tiff {
                width: dataset.width,
                height: dataset.height,
                samples_per_pixel: dataset.bands.len(),
                bits_per_sample: match dataset.sample_type {
                    SampleType::Byte => 8,
                    SampleType::UInt16 => 16,
                },
                photometric,
                extra_samples,
                color_map,
                nodata: dataset.bands.first().and_then(|b| b.nodata),
                planes: dataset.bands.iter().map(|b| b.data.clone()).collect(),
                carried: dataset.carried.clone(),
            };
            geotiff::write(&tiff, path)?;
            Ok(())
        }
        Driver::Png => {
            let width = dataset.width as u32;
            let height = dataset.height as u32;
            // color-mapped content is expanded on PNG output
            let bands: Vec<&Band> = if dataset.bands.first().map(|b| b.role) == Some(ColorRole::Palette)
            {
                return Err(RwmError::Internal {
                    message: "palette output requires the GeoTIFF driver".to_string(),
                });
            } else {
                dataset.bands.iter().collect()
            };
            let channels = bands.len();
            match dataset.sample_type {
                SampleType::Byte => {
                    let mut buf = vec![0u8; dataset.width * dataset.height * channels];
                    for pixel in 0..dataset.width * dataset.height {
                        for (c, band) in bands.iter().enumerate() {
                            buf[pixel * channels + c] =
                                band.data[pixel].round_ties_even().clamp(0.0, 255.0) as u8;
                        }
                    }
                    let img: image::DynamicImage = match channels {
                        1 => image::GrayImage::from_raw(width, height, buf)
                            .map(image::DynamicImage::ImageLuma8),
                        2 => image::GrayAlphaImage::from_raw(width, height, buf)
                            .map(image::DynamicImage::ImageLumaA8),
                        3 => image::RgbImage::from_raw(width, height, buf)
                            .map(image::DynamicImage::ImageRgb8),
                        _ => image::RgbaImage::from_raw(width, height, buf)
                            .map(image::DynamicImage::ImageRgba8),
                    }
                    .ok_or_else(|| RwmError::Internal {
                        message: "band buffer does not match raster shape".to_string(),
                    })?;
                    img.save(path)?;
                }
                SampleType::UInt16 => {
                    let mut buf = vec![0u16; dataset.width * dataset.height * channels];
                    for pixel in 0..dataset.width * dataset.height {
                        for (c, band) in bands.iter().enumerate() {
                            buf[pixel * channels + c] =
                                band.data[pixel].round_ties_even().clamp(0.0, 65_535.0) as u16;
                        }
                    }
                    let img: image::DynamicImage = match channels {
                        1 => image::ImageBuffer::from_raw(width, height, buf)
                            .map(image::DynamicImage::ImageLuma16),
                        2 => image::ImageBuffer::from_raw(width, height, buf)
                            .map(image::DynamicImage::ImageLumaA16),
                        3 => image::ImageBuffer::from_raw(width, height, buf)
                            .map(image::DynamicImage::ImageRgb16),
                        _ => image::ImageBuffer::from_raw(width, height, buf)
                            .map(image::DynamicImage::ImageRgba16),
                    }
                    .ok_or_else(|| RwmError::Internal {
                        message: "band buffer does not match raster shape".to_string(),
                    })?;
                    img.save(path)?;
                }
            }
            Ok(())
        }
    }
}

/// Write `dataset`'s pixels and georeferencing to `path` in its own driver
/// format, band order preserved.
pub fn create_copy(dataset: &RasterDataset, path: &Path) -> Result<(), RwmError> {
    write_dataset(dataset, path, dataset.driver)
}

/// An opened raster prepared for marking: classified mode, band
/// interpretation, palette bookkeeping, and a scratch directory for the
/// intermediates of an invocation.
pub struct RasterAsset {
    dataset: RasterDataset,
    mode: RasterMode,
    interp: BandInterp,
    palette_count: Option<usize>,
    scratch: PathBuf,
}

impl RasterAsset {
    /// Open a raster read-only; optionally assign a spatial reference by
    /// EPSG code. Color-mapped rasters are expanded to a working RGBA copy
    /// inside the scratch directory, with the color count remembered for
    /// output re-palettization.
    pub fn open(path: &Path, epsg: Option<u32>, scratch: &Path) -> Result<RasterAsset, RwmError> {
        std::fs::create_dir_all(scratch)?;
        let mut dataset = read_dataset(path)?;
        if let Some(code) = epsg {
            assign_epsg(&mut dataset, code);
        }
        let (mode, interp) = classify(&dataset)?;
        info!(
            "opened raster [path={:?} size={}x{} mode={:?}]",
            path, dataset.width, dataset.height, mode
        );

        let mut palette_count = None;
        let (dataset, mode, interp) = if mode == RasterMode::Palette {
            let count = dataset.palette.as_ref().map(|p| p.len()).unwrap_or(256);
            palette_count = Some(count);
            let expanded_path = append_to_filename(scratch, path, "-toRGB", Some("tif"));
            let expanded = expand_palette(&dataset);
            write_dataset(&expanded, &expanded_path, Driver::GTiff)?;
            let mut reopened = read_dataset(&expanded_path)?;
            reopened.driver = dataset.driver;
            let (mode, interp) = classify(&reopened)?;
            debug!(
                "expanded color-mapped raster [colors={} working={:?}]",
                count, expanded_path
            );
            (reopened, mode, interp)
        } else {
            (dataset, mode, interp)
        };

        Ok(RasterAsset {
            dataset,
            mode,
            interp,
            palette_count,
            scratch: scratch.to_path_buf(),
        })
    }

    pub fn dataset(&self) -> &RasterDataset {
        &self.dataset
    }

    pub fn mode(&self) -> RasterMode {
        self.mode
    }

    pub fn interp(&self) -> &BandInterp {
        &self.interp
    }

    pub fn palette_count(&self) -> Option<usize> {
        self.palette_count
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    /// Band indices carrying color (not transparency): Gray for grayscale
    /// rasters, Red/Green/Blue otherwise.
    pub fn color_band_indices(&self) -> Vec<usize> {
        if self.mode == RasterMode::Grayscale {
            self.interp.get(ColorRole::Gray).into_iter().collect()
        } else {
            [ColorRole::Red, ColorRole::Green, ColorRole::Blue]
                .iter()
                .filter_map(|role| self.interp.get(*role))
                .collect()
        }
    }
}

fn expand_palette(dataset: &RasterDataset) -> RasterDataset {
    let palette = dataset.palette.clone().unwrap_or_default();
    let index_band = &dataset.bands[0];
    let pixels = dataset.width * dataset.height;
    let mut planes = vec![vec![0.0f64; pixels]; 4];
    for pixel in 0..pixels {
        let idx = index_band.data[pixel].round_ties_even().max(0.0) as usize;
        let (r, g, b) = palette.get(idx).copied().unwrap_or((0, 0, 0));
        planes[0][pixel] = f64::from(r);
        planes[1][pixel] = f64::from(g);
        planes[2][pixel] = f64::from(b);
        planes[3][pixel] = 255.0;
    }
    let roles = [
        ColorRole::Red,
        ColorRole::Green,
        ColorRole::Blue,
        ColorRole::Alpha,
    ];
    RasterDataset {
        width: dataset.width,
        height: dataset.height,
        bands: planes
            .into_iter()
            .zip(roles.iter())
            .map(|(data, role)| Band {
                role: *role,
                data,
                nodata: None,
            })
            .collect(),
        sample_type: SampleType::Byte,
        driver: Driver::GTiff,
        palette: None,
        carried: dataset.carried.clone(),
    }
}

fn assign_epsg(dataset: &mut RasterDataset, code: u32) {
    // Minimal geo-key directory naming the coordinate system; geographic
    // codes fill the geodetic key, anything else the projected key.
    let geographic = (4000..5000).contains(&code);
    let (model_type, cs_key) = if geographic { (2u16, 2048u16) } else { (1u16, 3072u16) };
    let directory: Vec<u16> = vec![
        1, 1, 0, 2, // version, revision, minor, key count
        1024, 0, 1, model_type,
        cs_key, 0, 1, code as u16,
    ];
    dataset
        .carried
        .retain(|t| t.tag != geotiff::TAG_GEO_KEY_DIRECTORY);
    dataset.carried.push(CarriedTag::from_shorts(
        geotiff::TAG_GEO_KEY_DIRECTORY,
        &directory,
    ));
    debug!("assigned spatial reference [epsg={}]", code);
}

/// Build a scratch-file path as `<stem><suffix>.<ext>`, with the extension
/// optionally replaced.
pub fn append_to_filename(
    scratch: &Path,
    original: &Path,
    suffix: &str,
    new_ext: Option<&str>,
) -> PathBuf {
    let stem = original
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("raster");
    let ext = new_ext
        .map(|e| e.to_string())
        .or_else(|| {
            original
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_string())
        })
        .unwrap_or_else(|| "tif".to_string());
    scratch.join(format!("{}{}.{}", stem, suffix, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(role: ColorRole, data: Vec<f64>) -> Band {
        Band {
            role,
            data,
            nodata: None,
        }
    }

    fn rgb_dataset(extra: Option<Band>) -> RasterDataset {
        let mut bands = vec![
            band(ColorRole::Red, vec![10.0, 20.0, 30.0, 40.0]),
            band(ColorRole::Green, vec![10.0, 20.0, 30.0, 40.0]),
            band(ColorRole::Blue, vec![10.0, 20.0, 30.0, 40.0]),
        ];
        if let Some(b) = extra {
            bands.push(b);
        }
        RasterDataset {
            width: 2,
            height: 2,
            bands,
            sample_type: SampleType::Byte,
            driver: Driver::GTiff,
            palette: None,
            carried: Vec::new(),
        }
    }

    #[test]
    fn test_classify_rgb() {
        let (mode, interp) = classify(&rgb_dataset(None)).unwrap();
        assert_eq!(RasterMode::Rgb, mode);
        assert_eq!(Some(0), interp.get(ColorRole::Red));
        assert_eq!(None, interp.get(ColorRole::Alpha));
    }

    #[test]
    fn test_classify_inferred_alpha() {
        let extra = band(ColorRole::Undefined, vec![255.0, 255.0, 0.0, 255.0]);
        let (mode, interp) = classify(&rgb_dataset(Some(extra))).unwrap();
        assert_eq!(RasterMode::Rgba, mode);
        assert_eq!(Some(3), interp.get(ColorRole::Alpha));
    }

    #[test]
    fn test_classify_grayscale_wins() {
        let ds = RasterDataset {
            width: 1,
            height: 1,
            bands: vec![band(ColorRole::Gray, vec![7.0])],
            sample_type: SampleType::Byte,
            driver: Driver::GTiff,
            palette: None,
            carried: Vec::new(),
        };
        let (mode, _) = classify(&ds).unwrap();
        assert_eq!(RasterMode::Grayscale, mode);
    }

    #[test]
    fn test_classify_rejects_undefined() {
        let ds = RasterDataset {
            width: 1,
            height: 1,
            bands: vec![band(ColorRole::Undefined, vec![7.0])],
            sample_type: SampleType::Byte,
            driver: Driver::GTiff,
            palette: None,
            carried: Vec::new(),
        };
        assert!(matches!(classify(&ds), Err(RwmError::UnsupportedMode)));
    }

    #[test]
    fn test_band_stats_skip_nodata() {
        let b = Band {
            role: ColorRole::Gray,
            data: vec![0.0, 10.0, 20.0, 30.0],
            nodata: Some(0.0),
        };
        let stats = b.stats();
        assert_eq!(10.0, stats.min);
        assert_eq!(30.0, stats.max);
        assert_eq!(20.0, stats.mean);
    }

    #[test]
    fn test_geotransform_from_tags() {
        let mut ds = rgb_dataset(None);
        ds.carried.push(CarriedTag::from_doubles(
            geotiff::TAG_MODEL_PIXEL_SCALE,
            &[0.25, 0.5, 0.0],
        ));
        ds.carried.push(CarriedTag::from_doubles(
            geotiff::TAG_MODEL_TIEPOINT,
            &[0.0, 0.0, 0.0, 100.0, 200.0, 0.0],
        ));
        let gt = ds.geotransform();
        assert_eq!([100.0, 0.25, 0.0, 200.0, 0.0, -0.5], gt);
        let (ulx, uly, lrx, lry) = ds.bounds();
        assert_eq!((100.0, 200.0), (ulx, uly));
        assert_eq!(100.5, lrx);
        assert_eq!(199.0, lry);
    }
}
