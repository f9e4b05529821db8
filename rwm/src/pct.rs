//! RGB to pseudo-color conversion.
//!
//! An optimal color table is computed with a median cut over a
//! downsampled (5 bits per channel) histogram, and the image is converted
//! to indexed color under Floyd-Steinberg error diffusion. Used to restore
//! the palette of color-mapped sources after an embed widened them to RGBA.

use log::{debug, info};
use std::path::Path;

use crate::{
    append_to_filename, read_dataset, write_dataset, Band, ColorRole, Driver, RasterDataset,
    RwmError, SampleType,
};

struct HistEntry {
    // 5-bit channel values
    color: [u8; 3],
    count: u64,
}

struct ColorBox {
    entries: Vec<usize>,
    count: u64,
}

fn widest_channel(hist: &[HistEntry], entries: &[usize]) -> usize {
    let mut min = [31u8; 3];
    let mut max = [0u8; 3];
    for index in entries {
        for c in 0..3 {
            let v = hist[*index].color[c];
            min[c] = min[c].min(v);
            max[c] = max[c].max(v);
        }
    }
    let spans = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
    let mut widest = 0;
    for c in 1..3 {
        if spans[c] > spans[widest] {
            widest = c;
        }
    }
    widest
}

fn median_cut(hist: &[HistEntry], color_count: usize) -> Vec<(u8, u8, u8)> {
    let mut boxes = vec![ColorBox {
        entries: (0..hist.len()).collect(),
        count: hist.iter().map(|e| e.count).sum(),
    }];

    while boxes.len() < color_count {
        // split the most populated box that still has room to split
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.entries.len() > 1)
            .max_by_key(|(_, b)| b.count)
            .map(|(i, _)| i);
        let index = match candidate {
            Some(i) => i,
            None => break,
        };
        let rich = boxes.swap_remove(index);

        let channel = widest_channel(hist, &rich.entries);
        let mut entries = rich.entries;
        entries.sort_by_key(|i| hist[*i].color[channel]);

        let half = rich.count / 2;
        let mut running = 0u64;
        let mut split_at = 0usize;
        for (i, entry) in entries.iter().enumerate() {
            running += hist[*entry].count;
            if running >= half {
                split_at = i + 1;
                break;
            }
        }
        split_at = split_at.clamp(1, entries.len() - 1);

        let right = entries.split_off(split_at);
        let left_count = entries.iter().map(|i| hist[*i].count).sum();
        let right_count = right.iter().map(|i| hist[*i].count).sum();
        boxes.push(ColorBox {
            entries,
            count: left_count,
        });
        boxes.push(ColorBox {
            entries: right,
            count: right_count,
        });
    }

    boxes
        .iter()
        .map(|b| {
            let mut sums = [0u64; 3];
            let mut total = 0u64;
            for index in &b.entries {
                let e = &hist[*index];
                for c in 0..3 {
                    sums[c] += u64::from(e.color[c]) * e.count;
                }
                total += e.count;
            }
            let widen = |v: u64| {
                let five = (v / total.max(1)) as u8;
                (five << 3) | (five >> 2)
            };
            (widen(sums[0]), widen(sums[1]), widen(sums[2]))
        })
        .collect()
}

fn nearest(palette: &[(u8, u8, u8)], r: f64, g: f64, b: f64) -> usize {
    let mut best = 0usize;
    let mut best_distance = f64::INFINITY;
    for (i, (pr, pg, pb)) in palette.iter().enumerate() {
        let dr = r - f64::from(*pr);
        let dg = g - f64::from(*pg);
        let db = b - f64::from(*pb);
        let distance = dr * dr + dg * dg + db * db;
        if distance < best_distance {
            best_distance = distance;
            best = i;
        }
    }
    best
}

/// Convert a 24-bit RGB raster to 8-bit paletted.
///
/// The table is computed over `src`'s first three bands and the conversion
/// dithers with error diffusion. Non-GeoTIFF targets go through a GeoTIFF
/// intermediate in the scratch directory; projection, geotransform and
/// ground control points transfer with the carried tags.
pub fn rgb2pct(
    src: &Path,
    dst: &Path,
    driver: Driver,
    color_count: usize,
    scratch: &Path,
) -> Result<(), RwmError> {
    let color_count = color_count.clamp(2, 256);
    let source = read_dataset(src)?;
    if source.bands.len() < 3 {
        return Err(RwmError::Internal {
            message: "pseudo-color conversion needs three color bands".to_string(),
        });
    }
    let pixels = source.width * source.height;

    // 5-bit histogram
    let mut counts = vec![0u64; 1 << 15];
    for at in 0..pixels {
        let r = (source.bands[0].data[at] as u32).min(255) >> 3;
        let g = (source.bands[1].data[at] as u32).min(255) >> 3;
        let b = (source.bands[2].data[at] as u32).min(255) >> 3;
        counts[((r << 10) | (g << 5) | b) as usize] += 1;
    }
    let hist: Vec<HistEntry> = counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(key, count)| HistEntry {
            color: [
                ((key >> 10) & 31) as u8,
                ((key >> 5) & 31) as u8,
                (key & 31) as u8,
            ],
            count: *count,
        })
        .collect();
    let palette = median_cut(&hist, color_count);
    debug!(
        "computed color table [colors={} histogram={}]",
        palette.len(),
        hist.len()
    );

    // Floyd-Steinberg error diffusion
    let mut r_plane: Vec<f64> = source.bands[0].data.clone();
    let mut g_plane: Vec<f64> = source.bands[1].data.clone();
    let mut b_plane: Vec<f64> = source.bands[2].data.clone();
    let mut indices = vec![0.0f64; pixels];
    let width = source.width;
    let height = source.height;
    for y in 0..height {
        for x in 0..width {
            let at = y * width + x;
            let index = nearest(&palette, r_plane[at], g_plane[at], b_plane[at]);
            indices[at] = index as f64;
            let (pr, pg, pb) = palette[index];
            let err = [
                r_plane[at] - f64::from(pr),
                g_plane[at] - f64::from(pg),
                b_plane[at] - f64::from(pb),
            ];
            let mut diffuse = |dx: i64, dy: i64, weight: f64| {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                    return;
                }
                let target = (ny as usize) * width + nx as usize;
                r_plane[target] += err[0] * weight;
                g_plane[target] += err[1] * weight;
                b_plane[target] += err[2] * weight;
            };
            diffuse(1, 0, 7.0 / 16.0);
            diffuse(-1, 1, 3.0 / 16.0);
            diffuse(0, 1, 5.0 / 16.0);
            diffuse(1, 1, 1.0 / 16.0);
        }
    }

    let paletted = RasterDataset {
        width: source.width,
        height: source.height,
        bands: vec![Band {
            role: ColorRole::Palette,
            data: indices,
            nodata: None,
        }],
        sample_type: SampleType::Byte,
        driver: Driver::GTiff,
        palette: Some(palette.clone()),
        carried: source.carried.clone(),
    };

    match driver {
        Driver::GTiff => {
            write_dataset(&paletted, dst, Driver::GTiff)?;
        }
        Driver::Png => {
            // the PNG writer has no indexed form; expand through the table
            let tif = append_to_filename(scratch, dst, "-pct", Some("tif"));
            write_dataset(&paletted, &tif, Driver::GTiff)?;
            let mut planes = vec![vec![0.0f64; pixels]; 3];
            for at in 0..pixels {
                let (r, g, b) = palette[paletted.bands[0].data[at] as usize];
                planes[0][at] = f64::from(r);
                planes[1][at] = f64::from(g);
                planes[2][at] = f64::from(b);
            }
            let roles = [ColorRole::Red, ColorRole::Green, ColorRole::Blue];
            let expanded = RasterDataset {
                width: source.width,
                height: source.height,
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
                driver: Driver::Png,
                palette: None,
                carried: Vec::new(),
            };
            write_dataset(&expanded, dst, Driver::Png)?;
            std::fs::remove_file(&tif)?;
        }
    }
    info!(
        "re-palettized raster [dst={:?} colors={}]",
        dst,
        palette.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_cut_two_colors() {
        let hist = vec![
            HistEntry {
                color: [0, 0, 0],
                count: 50,
            },
            HistEntry {
                color: [31, 31, 31],
                count: 50,
            },
        ];
        let palette = median_cut(&hist, 2);
        assert_eq!(2, palette.len());
        assert!(palette.contains(&(0, 0, 0)));
        assert!(palette.contains(&(255, 255, 255)));
    }

    #[test]
    fn test_median_cut_caps_at_distinct_colors() {
        let hist = vec![
            HistEntry {
                color: [4, 4, 4],
                count: 10,
            },
            HistEntry {
                color: [20, 20, 20],
                count: 10,
            },
        ];
        let palette = median_cut(&hist, 16);
        assert_eq!(2, palette.len());
    }

    #[test]
    fn test_nearest_picks_closest() {
        let palette = vec![(0, 0, 0), (255, 255, 255), (255, 0, 0)];
        assert_eq!(0, nearest(&palette, 10.0, 5.0, 20.0));
        assert_eq!(1, nearest(&palette, 250.0, 240.0, 255.0));
        assert_eq!(2, nearest(&palette, 240.0, 20.0, 10.0));
    }
}
