//! Baseline TIFF reader and writer.
//!
//! Marked artifacts must come back with the georeferencing of their source
//! intact, so every tag this module does not interpret itself — the GeoTIFF
//! model tags, the geo-key directory, GDAL metadata — is carried through
//! byte-for-byte from input to output. Only uncompressed, chunky,
//! strip-organized files with 8- or 16-bit unsigned samples are handled;
//! that is the working format every embedding step normalizes to.

use log::{debug, warn};
use std::convert::TryInto;
use std::error;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub enum TiffError {
    BadMagic { magic: [u8; 4] },
    TruncatedFile { offset: usize },
    TagMalformed { tag: u16 },
    TagMissing { tag: u16 },
    CompressionUnsupported { value: u16 },
    LayoutUnsupported { reason: &'static str },
    DepthUnsupported { bits: u16 },
}

impl error::Error for TiffError {}
impl fmt::Display for TiffError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadMagic { magic } => {
                write!(f, "not a TIFF file (header {:02x?})", magic)
            }
            Self::TruncatedFile { offset } => {
                write!(f, "file truncated at byte offset {}", offset)
            }
            Self::TagMalformed { tag } => {
                write!(f, "malformed entry for tag {}", tag)
            }
            Self::TagMissing { tag } => {
                write!(f, "required tag {} missing", tag)
            }
            Self::CompressionUnsupported { value } => {
                write!(f, "compression scheme {} is not supported", value)
            }
            Self::LayoutUnsupported { reason } => {
                write!(f, "unsupported layout: {}", reason)
            }
            Self::DepthUnsupported { bits } => {
                write!(f, "unsupported sample depth of {} bits", bits)
            }
        }
    }
}

// Baseline tags interpreted by this module.
pub const TAG_IMAGE_WIDTH: u16 = 256;
pub const TAG_IMAGE_LENGTH: u16 = 257;
pub const TAG_BITS_PER_SAMPLE: u16 = 258;
pub const TAG_COMPRESSION: u16 = 259;
pub const TAG_PHOTOMETRIC: u16 = 262;
pub const TAG_STRIP_OFFSETS: u16 = 273;
pub const TAG_SAMPLES_PER_PIXEL: u16 = 277;
pub const TAG_ROWS_PER_STRIP: u16 = 278;
pub const TAG_STRIP_BYTE_COUNTS: u16 = 279;
pub const TAG_PLANAR_CONFIGURATION: u16 = 284;
pub const TAG_TILE_WIDTH: u16 = 322;
pub const TAG_COLOR_MAP: u16 = 320;
pub const TAG_EXTRA_SAMPLES: u16 = 338;
pub const TAG_SAMPLE_FORMAT: u16 = 339;

// GeoTIFF model tags and GDAL extensions; parsed for georeferencing but
// also preserved verbatim on the carried-tag list.
pub const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
pub const TAG_MODEL_TIEPOINT: u16 = 33922;
pub const TAG_MODEL_TRANSFORMATION: u16 = 34264;
pub const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
pub const TAG_GEO_DOUBLE_PARAMS: u16 = 34736;
pub const TAG_GEO_ASCII_PARAMS: u16 = 34737;
pub const TAG_GDAL_METADATA: u16 = 42112;
pub const TAG_GDAL_NODATA: u16 = 42113;

// Photometric interpretations.
pub const PHOTOMETRIC_GRAY: u16 = 1;
pub const PHOTOMETRIC_RGB: u16 = 2;
pub const PHOTOMETRIC_PALETTE: u16 = 3;

// Extra-sample kinds.
pub const EXTRA_SAMPLE_UNSPECIFIED: u16 = 0;
pub const EXTRA_SAMPLE_ALPHA: u16 = 2;

const FIELD_BYTE: u16 = 1;
const FIELD_ASCII: u16 = 2;
const FIELD_SHORT: u16 = 3;
const FIELD_LONG: u16 = 4;
const FIELD_RATIONAL: u16 = 5;
const FIELD_UNDEFINED: u16 = 7;
const FIELD_DOUBLE: u16 = 12;

fn field_size(field_type: u16) -> usize {
    match field_type {
        1 | 2 | 6 | 7 => 1,
        3 | 8 => 2,
        4 | 9 | 11 => 4,
        5 | 10 | 12 => 8,
        _ => 1,
    }
}

/// One carried IFD entry, byte order already normalized to little endian.
#[derive(Debug, Clone)]
pub struct CarriedTag {
    pub tag: u16,
    pub field_type: u16,
    pub count: u32,
    pub data: Vec<u8>,
}

impl CarriedTag {
    pub fn doubles(&self) -> Vec<f64> {
        if self.field_type != FIELD_DOUBLE {
            return Vec::new();
        }
        self.data
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    pub fn from_doubles(tag: u16, values: &[f64]) -> CarriedTag {
        let mut data = Vec::with_capacity(values.len() * 8);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        CarriedTag {
            tag,
            field_type: FIELD_DOUBLE,
            count: values.len() as u32,
            data,
        }
    }

    pub fn from_shorts(tag: u16, values: &[u16]) -> CarriedTag {
        let mut data = Vec::with_capacity(values.len() * 2);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        CarriedTag {
            tag,
            field_type: FIELD_SHORT,
            count: values.len() as u32,
            data,
        }
    }
}

/// Decoded TIFF image: per-sample planes plus the metadata needed to write
/// an equivalent file back.
pub struct Tiff {
    pub width: usize,
    pub height: usize,
    pub samples_per_pixel: usize,
    pub bits_per_sample: u16,
    pub photometric: u16,
    pub extra_samples: Vec<u16>,
    /// Interleaved color map (all reds, all greens, all blues), 16-bit as
    /// stored; present for palette images.
    pub color_map: Option<Vec<u16>>,
    pub nodata: Option<f64>,
    /// Row-major planes, one per sample, length `width * height`.
    pub planes: Vec<Vec<f64>>,
    /// Every tag not interpreted above, preserved for the writer.
    pub carried: Vec<CarriedTag>,
}

struct Reader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl<'a> Reader<'a> {
    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], TiffError> {
        self.data
            .get(offset..offset + len)
            .ok_or(TiffError::TruncatedFile { offset })
    }

    fn u16_at(&self, offset: usize) -> Result<u16, TiffError> {
        let b = self.bytes(offset, 2)?;
        Ok(if self.big_endian {
            u16::from_be_bytes([b[0], b[1]])
        } else {
            u16::from_le_bytes([b[0], b[1]])
        })
    }

    fn u32_at(&self, offset: usize) -> Result<u32, TiffError> {
        let b = self.bytes(offset, 4)?;
        Ok(if self.big_endian {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        })
    }
}

struct RawEntry {
    tag: u16,
    field_type: u16,
    count: u32,
    data: Vec<u8>,
}

impl RawEntry {
    /// Entry payload re-serialized as little-endian element stream.
    fn normalized(&self, big_endian: bool) -> Vec<u8> {
        if !big_endian {
            return self.data.clone();
        }
        let size = field_size(self.field_type);
        if size == 1 {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(self.data.len());
        match size {
            2 => {
                for c in self.data.chunks_exact(2) {
                    out.extend_from_slice(&u16::from_be_bytes([c[0], c[1]]).to_le_bytes());
                }
            }
            4 => {
                for c in self.data.chunks_exact(4) {
                    out.extend_from_slice(
                        &u32::from_be_bytes([c[0], c[1], c[2], c[3]]).to_le_bytes(),
                    );
                }
            }
            8 => {
                // rationals are two longs; doubles are one 8-byte value
                if self.field_type == FIELD_RATIONAL || self.field_type == 10 {
                    for c in self.data.chunks_exact(4) {
                        out.extend_from_slice(
                            &u32::from_be_bytes([c[0], c[1], c[2], c[3]]).to_le_bytes(),
                        );
                    }
                } else {
                    for c in self.data.chunks_exact(8) {
                        let v = u64::from_be_bytes(c.try_into().unwrap());
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }
            _ => out.extend_from_slice(&self.data),
        }
        out
    }

    fn shorts(&self, big_endian: bool) -> Result<Vec<u16>, TiffError> {
        if self.field_type != FIELD_SHORT {
            return Err(TiffError::TagMalformed { tag: self.tag });
        }
        let data = self.normalized(big_endian);
        Ok(data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    fn longs(&self, big_endian: bool) -> Result<Vec<u32>, TiffError> {
        let data = self.normalized(big_endian);
        match self.field_type {
            FIELD_SHORT => Ok(data
                .chunks_exact(2)
                .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
                .collect()),
            FIELD_LONG => Ok(data
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            _ => Err(TiffError::TagMalformed { tag: self.tag }),
        }
    }

    fn first_long(&self, big_endian: bool) -> Result<u32, TiffError> {
        self.longs(big_endian)?
            .first()
            .copied()
            .ok_or(TiffError::TagMalformed { tag: self.tag })
    }

    fn ascii(&self, big_endian: bool) -> Option<String> {
        if self.field_type != FIELD_ASCII {
            return None;
        }
        let data = self.normalized(big_endian);
        let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
        String::from_utf8(data[..end].to_vec()).ok()
    }
}

/// Decode a TIFF file into planes and carried metadata.
pub fn read(path: &Path) -> Result<Tiff, TiffError> {
    let data = fs::read(path).map_err(|_| TiffError::TruncatedFile { offset: 0 })?;
    decode(&data)
}

pub fn decode(data: &[u8]) -> Result<Tiff, TiffError> {
    if data.len() < 8 {
        return Err(TiffError::TruncatedFile { offset: 0 });
    }
    let big_endian = match &data[0..2] {
        b"II" => false,
        b"MM" => true,
        _ => {
            return Err(TiffError::BadMagic {
                magic: [data[0], data[1], data[2], data[3]],
            })
        }
    };
    let reader = Reader { data, big_endian };
    if reader.u16_at(2)? != 42 {
        return Err(TiffError::BadMagic {
            magic: [data[0], data[1], data[2], data[3]],
        });
    }

    let ifd_offset = reader.u32_at(4)? as usize;
    let entry_count = reader.u16_at(ifd_offset)? as usize;
    let mut entries = Vec::with_capacity(entry_count);
    for i in 0..entry_count {
        let base = ifd_offset + 2 + i * 12;
        let tag = reader.u16_at(base)?;
        let field_type = reader.u16_at(base + 2)?;
        let count = reader.u32_at(base + 4)?;
        let byte_len = field_size(field_type) * count as usize;
        let payload = if byte_len <= 4 {
            reader.bytes(base + 8, byte_len)?.to_vec()
        } else {
            let offset = reader.u32_at(base + 8)? as usize;
            reader.bytes(offset, byte_len)?.to_vec()
        };
        entries.push(RawEntry {
            tag,
            field_type,
            count,
            data: payload,
        });
    }

    let find = |tag: u16| entries.iter().find(|e| e.tag == tag);
    let require = |tag: u16| find(tag).ok_or(TiffError::TagMissing { tag });

    if find(TAG_TILE_WIDTH).is_some() {
        return Err(TiffError::LayoutUnsupported {
            reason: "tiled organization",
        });
    }

    let width = require(TAG_IMAGE_WIDTH)?.first_long(big_endian)? as usize;
    let height = require(TAG_IMAGE_LENGTH)?.first_long(big_endian)? as usize;
    let compression = match find(TAG_COMPRESSION) {
        Some(e) => e.first_long(big_endian)? as u16,
        None => 1,
    };
    if compression != 1 {
        return Err(TiffError::CompressionUnsupported { value: compression });
    }
    let samples_per_pixel = match find(TAG_SAMPLES_PER_PIXEL) {
        Some(e) => e.first_long(big_endian)? as usize,
        None => 1,
    };
    let bits_per_sample = match find(TAG_BITS_PER_SAMPLE) {
        Some(e) => {
            let all = e.shorts(big_endian)?;
            let first = *all.first().ok_or(TiffError::TagMalformed {
                tag: TAG_BITS_PER_SAMPLE,
            })?;
            if all.iter().any(|b| *b != first) {
                return Err(TiffError::LayoutUnsupported {
                    reason: "mixed sample depths",
                });
            }
            first
        }
        None => 1,
    };
    if bits_per_sample != 8 && bits_per_sample != 16 {
        return Err(TiffError::DepthUnsupported {
            bits: bits_per_sample,
        });
    }
    if let Some(e) = find(TAG_PLANAR_CONFIGURATION) {
        if e.first_long(big_endian)? != 1 {
            return Err(TiffError::LayoutUnsupported {
                reason: "planar sample organization",
            });
        }
    }
    if let Some(e) = find(TAG_SAMPLE_FORMAT) {
        if e.longs(big_endian)?.iter().any(|f| *f != 1) {
            return Err(TiffError::LayoutUnsupported {
                reason: "non-unsigned sample format",
            });
        }
    }
    let photometric = require(TAG_PHOTOMETRIC)?.first_long(big_endian)? as u16;
    let extra_samples = match find(TAG_EXTRA_SAMPLES) {
        Some(e) => e.shorts(big_endian)?,
        None => Vec::new(),
    };
    let color_map = match find(TAG_COLOR_MAP) {
        Some(e) => Some(e.shorts(big_endian)?),
        None => None,
    };
    let nodata = find(TAG_GDAL_NODATA)
        .and_then(|e| e.ascii(big_endian))
        .and_then(|s| s.trim().parse::<f64>().ok());

    let strip_offsets = require(TAG_STRIP_OFFSETS)?.longs(big_endian)?;
    let strip_byte_counts = require(TAG_STRIP_BYTE_COUNTS)?.longs(big_endian)?;
    if strip_offsets.len() != strip_byte_counts.len() {
        return Err(TiffError::TagMalformed {
            tag: TAG_STRIP_BYTE_COUNTS,
        });
    }

    let bytes_per_sample = (bits_per_sample / 8) as usize;
    let row_bytes = width * samples_per_pixel * bytes_per_sample;
    let mut pixel_bytes = Vec::with_capacity(row_bytes * height);
    for (offset, count) in strip_offsets.iter().zip(strip_byte_counts.iter()) {
        pixel_bytes.extend_from_slice(reader.bytes(*offset as usize, *count as usize)?);
    }
    if pixel_bytes.len() < row_bytes * height {
        return Err(TiffError::TruncatedFile {
            offset: data.len(),
        });
    }

    let mut planes = vec![vec![0.0f64; width * height]; samples_per_pixel];
    for pixel in 0..width * height {
        for sample in 0..samples_per_pixel {
            let at = (pixel * samples_per_pixel + sample) * bytes_per_sample;
            let value = if bytes_per_sample == 1 {
                f64::from(pixel_bytes[at])
            } else if big_endian {
                f64::from(u16::from_be_bytes([pixel_bytes[at], pixel_bytes[at + 1]]))
            } else {
                f64::from(u16::from_le_bytes([pixel_bytes[at], pixel_bytes[at + 1]]))
            };
            planes[sample][pixel] = value;
        }
    }

    // Tags this module re-derives on write; everything else is carried.
    const OWNED: [u16; 14] = [
        TAG_IMAGE_WIDTH,
        TAG_IMAGE_LENGTH,
        TAG_BITS_PER_SAMPLE,
        TAG_COMPRESSION,
        TAG_PHOTOMETRIC,
        TAG_STRIP_OFFSETS,
        TAG_SAMPLES_PER_PIXEL,
        TAG_ROWS_PER_STRIP,
        TAG_STRIP_BYTE_COUNTS,
        TAG_PLANAR_CONFIGURATION,
        TAG_COLOR_MAP,
        TAG_EXTRA_SAMPLES,
        TAG_SAMPLE_FORMAT,
        TAG_GDAL_NODATA,
    ];
    let carried = entries
        .iter()
        .filter(|e| !OWNED.contains(&e.tag))
        .map(|e| CarriedTag {
            tag: e.tag,
            field_type: e.field_type,
            count: e.count,
            data: e.normalized(big_endian),
        })
        .collect();

    debug!(
        "decoded TIFF [size={}x{} samples={} bits={} photometric={}]",
        width, height, samples_per_pixel, bits_per_sample, photometric
    );

    Ok(Tiff {
        width,
        height,
        samples_per_pixel,
        bits_per_sample,
        photometric,
        extra_samples,
        color_map,
        nodata,
        planes,
        carried,
    })
}

/// Encode the image back to a little-endian baseline TIFF.
pub fn write(tiff: &Tiff, path: &Path) -> Result<(), TiffError> {
    let bytes = encode(tiff)?;
    fs::write(path, bytes).map_err(|_| TiffError::TruncatedFile { offset: 0 })
}

pub fn encode(tiff: &Tiff) -> Result<Vec<u8>, TiffError> {
    if tiff.planes.len() != tiff.samples_per_pixel {
        return Err(TiffError::LayoutUnsupported {
            reason: "plane count does not match samples per pixel",
        });
    }
    let bytes_per_sample = (tiff.bits_per_sample / 8) as usize;
    let max_value = if tiff.bits_per_sample == 8 {
        255.0
    } else {
        65_535.0
    };

    // Interleave the planes into one strip.
    let mut pixel_bytes =
        Vec::with_capacity(tiff.width * tiff.height * tiff.samples_per_pixel * bytes_per_sample);
    for pixel in 0..tiff.width * tiff.height {
        for plane in &tiff.planes {
            let clamped = plane[pixel].round_ties_even().clamp(0.0, max_value);
            if bytes_per_sample == 1 {
                pixel_bytes.push(clamped as u8);
            } else {
                pixel_bytes.extend_from_slice(&(clamped as u16).to_le_bytes());
            }
        }
    }

    struct Entry {
        tag: u16,
        field_type: u16,
        count: u32,
        data: Vec<u8>,
    }

    let short_entry = |tag: u16, values: &[u16]| {
        let mut data = Vec::with_capacity(values.len() * 2);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Entry {
            tag,
            field_type: FIELD_SHORT,
            count: values.len() as u32,
            data,
        }
    };
    let long_entry = |tag: u16, values: &[u32]| {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Entry {
            tag,
            field_type: FIELD_LONG,
            count: values.len() as u32,
            data,
        }
    };

    const HEADER_LEN: usize = 8;
    let strip_offset = HEADER_LEN as u32;

    let mut entries: Vec<Entry> = Vec::new();
    entries.push(long_entry(TAG_IMAGE_WIDTH, &[tiff.width as u32]));
    entries.push(long_entry(TAG_IMAGE_LENGTH, &[tiff.height as u32]));
    entries.push(short_entry(
        TAG_BITS_PER_SAMPLE,
        &vec![tiff.bits_per_sample; tiff.samples_per_pixel],
    ));
    entries.push(short_entry(TAG_COMPRESSION, &[1]));
    entries.push(short_entry(TAG_PHOTOMETRIC, &[tiff.photometric]));
    entries.push(long_entry(TAG_STRIP_OFFSETS, &[strip_offset]));
    entries.push(short_entry(
        TAG_SAMPLES_PER_PIXEL,
        &[tiff.samples_per_pixel as u16],
    ));
    entries.push(long_entry(TAG_ROWS_PER_STRIP, &[tiff.height as u32]));
    entries.push(long_entry(
        TAG_STRIP_BYTE_COUNTS,
        &[pixel_bytes.len() as u32],
    ));
    entries.push(short_entry(TAG_PLANAR_CONFIGURATION, &[1]));
    if let Some(map) = &tiff.color_map {
        entries.push(short_entry(TAG_COLOR_MAP, map));
    }
    if !tiff.extra_samples.is_empty() {
        entries.push(short_entry(TAG_EXTRA_SAMPLES, &tiff.extra_samples));
    }
    entries.push(short_entry(
        TAG_SAMPLE_FORMAT,
        &vec![1u16; tiff.samples_per_pixel],
    ));
    if let Some(nodata) = tiff.nodata {
        let mut text = format!("{}", nodata).into_bytes();
        text.push(0);
        entries.push(Entry {
            tag: TAG_GDAL_NODATA,
            field_type: FIELD_ASCII,
            count: text.len() as u32,
            data: text,
        });
    }
    for carried in &tiff.carried {
        if entries.iter().any(|e| e.tag == carried.tag) {
            warn!("dropping duplicate carried tag {}", carried.tag);
            continue;
        }
        entries.push(Entry {
            tag: carried.tag,
            field_type: carried.field_type,
            count: carried.count,
            data: carried.data.clone(),
        });
    }
    entries.sort_by_key(|e| e.tag);

    // Layout: header, strip, overflow values, IFD.
    let mut overflow: Vec<u8> = Vec::new();
    let overflow_base = HEADER_LEN + pixel_bytes.len();
    let mut located: Vec<(u16, u16, u32, [u8; 4])> = Vec::new();
    for entry in &entries {
        let mut inline = [0u8; 4];
        if entry.data.len() <= 4 {
            inline[..entry.data.len()].copy_from_slice(&entry.data);
        } else {
            // offsets must be word-aligned
            if (overflow_base + overflow.len()) % 2 == 1 {
                overflow.push(0);
            }
            let at = (overflow_base + overflow.len()) as u32;
            inline.copy_from_slice(&at.to_le_bytes());
            overflow.extend_from_slice(&entry.data);
        }
        located.push((entry.tag, entry.field_type, entry.count, inline));
    }

    let ifd_offset = overflow_base + overflow.len();
    let ifd_offset = if ifd_offset % 2 == 1 {
        overflow.push(0);
        ifd_offset + 1
    } else {
        ifd_offset
    };

    let mut out = Vec::with_capacity(ifd_offset + 6 + located.len() * 12);
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&(ifd_offset as u32).to_le_bytes());
    out.extend_from_slice(&pixel_bytes);
    out.extend_from_slice(&overflow);
    out.extend_from_slice(&(located.len() as u16).to_le_bytes());
    for (tag, field_type, count, inline) in &located {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&field_type.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(inline);
    }
    // no next IFD
    out.extend_from_slice(&0u32.to_le_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_ramp(width: usize, height: usize) -> Tiff {
        let mut plane = vec![0.0; width * height];
        for (i, v) in plane.iter_mut().enumerate() {
            *v = (i % 256) as f64;
        }
        Tiff {
            width,
            height,
            samples_per_pixel: 1,
            bits_per_sample: 8,
            photometric: PHOTOMETRIC_GRAY,
            extra_samples: Vec::new(),
            color_map: None,
            nodata: None,
            planes: vec![plane],
            carried: Vec::new(),
        }
    }

    #[test]
    fn test_roundtrip_gray() {
        let tiff = gray_ramp(37, 21);
        let bytes = encode(&tiff).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(tiff.width, back.width);
        assert_eq!(tiff.height, back.height);
        assert_eq!(tiff.planes, back.planes);
        assert_eq!(PHOTOMETRIC_GRAY, back.photometric);
    }

    #[test]
    fn test_roundtrip_rgb_with_geo_tags() {
        let mut tiff = gray_ramp(16, 16);
        tiff.samples_per_pixel = 3;
        tiff.photometric = PHOTOMETRIC_RGB;
        tiff.planes = vec![
            tiff.planes[0].clone(),
            tiff.planes[0].clone(),
            tiff.planes[0].clone(),
        ];
        tiff.nodata = Some(0.0);
        tiff.carried.push(CarriedTag::from_doubles(
            TAG_MODEL_PIXEL_SCALE,
            &[0.5, 0.5, 0.0],
        ));
        tiff.carried.push(CarriedTag::from_doubles(
            TAG_MODEL_TIEPOINT,
            &[0.0, 0.0, 0.0, 23.5, 37.5, 0.0],
        ));
        let bytes = encode(&tiff).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(3, back.samples_per_pixel);
        assert_eq!(Some(0.0), back.nodata);
        let scale = back
            .carried
            .iter()
            .find(|t| t.tag == TAG_MODEL_PIXEL_SCALE)
            .expect("pixel scale carried");
        assert_eq!(vec![0.5, 0.5, 0.0], scale.doubles());
        let tiepoint = back
            .carried
            .iter()
            .find(|t| t.tag == TAG_MODEL_TIEPOINT)
            .expect("tiepoint carried");
        assert_eq!(6, tiepoint.doubles().len());
    }

    #[test]
    fn test_roundtrip_sixteen_bit() {
        let mut tiff = gray_ramp(8, 8);
        tiff.bits_per_sample = 16;
        tiff.planes[0][0] = 40_000.0;
        let bytes = encode(&tiff).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(40_000.0, back.planes[0][0]);
    }

    #[test]
    fn test_palette_roundtrip() {
        let mut tiff = gray_ramp(4, 4);
        tiff.photometric = PHOTOMETRIC_PALETTE;
        let mut map = vec![0u16; 3 * 256];
        for i in 0..256 {
            map[i] = (i * 257) as u16;
            map[256 + i] = 0;
            map[512 + i] = ((255 - i) * 257) as u16;
        }
        tiff.color_map = Some(map.clone());
        let bytes = encode(&tiff).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(Some(map), back.color_map);
    }

    #[test]
    fn test_reject_compressed() {
        let tiff = gray_ramp(4, 4);
        let mut bytes = encode(&tiff).unwrap();
        // flip the compression entry (sorted IFD, tag 259) to LZW
        let ifd = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let count = u16::from_le_bytes([bytes[ifd], bytes[ifd + 1]]) as usize;
        for i in 0..count {
            let base = ifd + 2 + i * 12;
            let tag = u16::from_le_bytes([bytes[base], bytes[base + 1]]);
            if tag == TAG_COMPRESSION {
                bytes[base + 8] = 5;
            }
        }
        assert!(matches!(
            decode(&bytes),
            Err(TiffError::CompressionUnsupported { value: 5 })
        ));
    }

    #[test]
    fn test_reject_not_tiff() {
        assert!(matches!(
            decode(b"PNG\x0d\x0a\x1a\x0a________"),
            Err(TiffError::BadMagic { .. })
        ));
    }
}
