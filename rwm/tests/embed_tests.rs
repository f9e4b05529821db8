use std::path::{Path, PathBuf};

use krng::CancelToken;
use rwm::geotiff::{CarriedTag, TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT};
use rwm::{
    create_copy, read_dataset, Band, ColorRole, Driver, RasterAsset, RasterDataset, RasterMode,
    RwmError, SampleType, VisibleOptions,
};

fn noise_plane(width: usize, height: usize, seed: u64) -> Vec<f64> {
    let mut plane = vec![0.0; width * height];
    for y in 0..height {
        for x in 0..width {
            let h = (x as u64)
                .wrapping_mul(7919)
                .wrapping_add((y as u64).wrapping_mul(104_729))
                .wrapping_add(seed.wrapping_mul(131))
                .wrapping_mul(2_654_435_761);
            plane[y * width + x] = (96 + (h >> 16) % 97) as f64;
        }
    }
    plane
}

fn rgb_raster(width: usize, height: usize) -> RasterDataset {
    let roles = [ColorRole::Red, ColorRole::Green, ColorRole::Blue];
    RasterDataset {
        width,
        height,
        bands: roles
            .iter()
            .enumerate()
            .map(|(i, role)| Band {
                role: *role,
                data: noise_plane(width, height, i as u64),
                nodata: None,
            })
            .collect(),
        sample_type: SampleType::Byte,
        driver: Driver::GTiff,
        palette: None,
        carried: vec![
            CarriedTag::from_doubles(TAG_MODEL_PIXEL_SCALE, &[0.1, 0.1, 0.0]),
            CarriedTag::from_doubles(TAG_MODEL_TIEPOINT, &[0.0, 0.0, 0.0, 23.0, 38.0, 0.0]),
        ],
    }
}

fn write_raster(dataset: &RasterDataset, dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    create_copy(dataset, &path).expect("raster written");
    path
}

#[test]
fn test_invisible_roundtrip_geotiff() {
    let dir = tempfile::tempdir().unwrap();
    let source = rgb_raster(512, 512);
    let raster_path = write_raster(&source, dir.path(), "source.tif");

    let message = "09061d7e-3b1a-4a14-bfa5-b65b9ce0412d";
    let scratch = dir.path().join("work");
    let asset = RasterAsset::open(&raster_path, None, &scratch).unwrap();
    let out = dir.path().join("marked.tif");
    let cancel = CancelToken::new();
    asset.embed_message(&out, message, &cancel).unwrap();

    // artifact keeps shape and georeferencing
    let marked = read_dataset(&out).unwrap();
    assert_eq!(source.width, marked.width);
    assert_eq!(source.height, marked.height);
    assert_eq!(source.geotransform(), marked.geotransform());

    let recovered = asset.detect_message(&out, &cancel).unwrap();
    assert_eq!(Some(message.to_string()), recovered);
}

#[test]
fn test_invisible_detect_on_unmarked_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let source = rgb_raster(256, 256);
    let raster_path = write_raster(&source, dir.path(), "source.tif");
    let copy_path = write_raster(&source, dir.path(), "copy.tif");

    let scratch = dir.path().join("work");
    let asset = RasterAsset::open(&raster_path, None, &scratch).unwrap();
    let cancel = CancelToken::new();
    let recovered = asset.detect_message(&copy_path, &cancel).unwrap();
    assert_eq!(None, recovered);
}

#[test]
fn test_invisible_roundtrip_png() {
    let dir = tempfile::tempdir().unwrap();
    let gray = RasterDataset {
        width: 256,
        height: 256,
        bands: vec![Band {
            role: ColorRole::Gray,
            data: noise_plane(256, 256, 9),
            nodata: None,
        }],
        sample_type: SampleType::Byte,
        driver: Driver::Png,
        palette: None,
        carried: Vec::new(),
    };
    let raster_path = write_raster(&gray, dir.path(), "source.png");

    let scratch = dir.path().join("work");
    let asset = RasterAsset::open(&raster_path, None, &scratch).unwrap();
    assert_eq!(RasterMode::Grayscale, asset.mode());

    let out = dir.path().join("marked.png");
    let cancel = CancelToken::new();
    asset.embed_message(&out, "Hello world!", &cancel).unwrap();
    assert!(out.exists());
    assert!(!dir.path().join("marked.png.tif").exists());

    let recovered = asset.detect_message(&out, &cancel).unwrap();
    assert_eq!(Some("Hello world!".to_string()), recovered);
}

#[test]
fn test_invisible_embed_honors_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let source = rgb_raster(64, 64);
    let raster_path = write_raster(&source, dir.path(), "source.tif");

    let scratch = dir.path().join("work");
    let asset = RasterAsset::open(&raster_path, None, &scratch).unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = asset.embed_message(&dir.path().join("marked.tif"), "msg", &cancel);
    assert!(matches!(result, Err(RwmError::Canceled)));
}

fn white_watermark(dir: &Path, alpha_left: u8) -> PathBuf {
    // left half carries `alpha_left`, right half is fully opaque white
    let mut img = image::RgbaImage::new(8, 8);
    for (x, _, p) in img.enumerate_pixels_mut() {
        let a = if x < 4 { alpha_left } else { 255 };
        p.0 = [255, 255, 255, a];
    }
    let path = dir.join("watermark.png");
    img.save(&path).unwrap();
    path
}

#[test]
fn test_visible_embed_blends_and_preserves_threshold_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = rgb_raster(8, 8);
    for band in &mut source.bands {
        for v in band.data.iter_mut() {
            *v = 200.0;
        }
        band.data[0] = 230.0; // band maximum
    }
    let raster_path = write_raster(&source, dir.path(), "source.tif");
    let wm_path = white_watermark(dir.path(), 0);

    let scratch = dir.path().join("work");
    let asset = RasterAsset::open(&raster_path, None, &scratch).unwrap();
    let out = dir.path().join("marked.tif");
    let options = VisibleOptions {
        fit: "stretch".parse().unwrap(),
        ..VisibleOptions::default()
    };
    asset.embed_image(&wm_path, &out, &options).unwrap();

    let marked = read_dataset(&out).unwrap();
    assert_eq!(source.width, marked.width);
    assert_eq!(source.height, marked.height);
    for band in 0..3 {
        for y in 0..8 {
            for x in 0..8 {
                let at = y * 8 + x;
                let original = source.bands[band].data[at];
                let value = marked.bands[band].data[at];
                if x < 4 {
                    // zero watermark weight leaves the pixel bit-identical
                    assert_eq!(original, value, "band {} pixel ({}, {})", band, x, y);
                } else {
                    // fully opaque white at transparency 1 saturates to the
                    // band maximum
                    assert_eq!(230.0, value, "band {} pixel ({}, {})", band, x, y);
                }
            }
        }
    }
}

#[test]
fn test_visible_embed_validates_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let source = rgb_raster(8, 8);
    let raster_path = write_raster(&source, dir.path(), "source.tif");
    let wm_path = white_watermark(dir.path(), 255);

    let scratch = dir.path().join("work");
    let asset = RasterAsset::open(&raster_path, None, &scratch).unwrap();
    let out = dir.path().join("marked.tif");
    let options = VisibleOptions {
        transparency: 1.5,
        ..VisibleOptions::default()
    };
    let result = asset.embed_image(&wm_path, &out, &options);
    assert!(matches!(result, Err(RwmError::InvalidOption { .. })));
    assert!(!out.exists());
}

#[test]
fn test_visible_embed_tile_requires_distances() {
    let dir = tempfile::tempdir().unwrap();
    let source = rgb_raster(16, 16);
    let raster_path = write_raster(&source, dir.path(), "source.tif");
    let wm_path = white_watermark(dir.path(), 255);

    let scratch = dir.path().join("work");
    let asset = RasterAsset::open(&raster_path, None, &scratch).unwrap();
    let options = VisibleOptions {
        fit: "tile".parse().unwrap(),
        distance: Some((20, 4)),
        ..VisibleOptions::default()
    };
    let result = asset.embed_image(&wm_path, &dir.path().join("marked.tif"), &options);
    assert!(matches!(result, Err(RwmError::InvalidOption { .. })));
}

#[test]
fn test_palette_open_expands_and_remembers_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut palette = Vec::with_capacity(256);
    for i in 0..256usize {
        palette.push((i as u8, (255 - i) as u8, 0));
    }
    let indices = noise_plane(16, 16, 3)
        .into_iter()
        .map(|v| (v as usize % 256) as f64)
        .collect();
    let source = RasterDataset {
        width: 16,
        height: 16,
        bands: vec![Band {
            role: ColorRole::Palette,
            data: indices,
            nodata: None,
        }],
        sample_type: SampleType::Byte,
        driver: Driver::GTiff,
        palette: Some(palette),
        carried: Vec::new(),
    };
    let raster_path = write_raster(&source, dir.path(), "paletted.tif");

    let scratch = dir.path().join("work");
    let asset = RasterAsset::open(&raster_path, None, &scratch).unwrap();
    assert_eq!(RasterMode::Rgba, asset.mode());
    assert_eq!(Some(256), asset.palette_count());

    // visible embedding re-palettizes the artifact
    let wm_path = white_watermark(dir.path(), 255);
    let out = dir.path().join("marked.tif");
    asset
        .embed_image(&wm_path, &out, &VisibleOptions::default())
        .unwrap();
    let marked = read_dataset(&out).unwrap();
    assert_eq!(1, marked.bands.len());
    assert!(marked.palette.is_some());
    assert_eq!(ColorRole::Palette, marked.bands[0].role);
}
