use image::GrayImage;
use log::debug;
use qrcodegen::{QrCode, QrCodeEcc};
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum QrmError {
    // The message does not fit the largest QR symbol at the configured
    // error-correction level.
    MessageOverflow { length: usize },
}

impl error::Error for QrmError {}
impl fmt::Display for QrmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MessageOverflow { length } => {
                write!(f, "message of {} bytes does not fit a QR symbol", length)
            }
        }
    }
}

/// Square boolean matrix, row-major. `true` is a light module.
#[derive(Clone, PartialEq)]
pub struct BitMatrix {
    side: usize,
    bits: Vec<bool>,
}

impl BitMatrix {
    pub fn new(side: usize) -> BitMatrix {
        BitMatrix {
            side,
            bits: vec![false; side * side],
        }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.bits[row * self.side + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        self.bits[row * self.side + col] = value;
    }
}

impl fmt::Debug for BitMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "BitMatrix({})", self.side)?;
        for row in 0..self.side {
            for col in 0..self.side {
                write!(f, "{}", if self.get(row, col) { '#' } else { '.' })?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// The cat-map index arithmetic is 1-based with results folded into 0-based
// storage; a folded index of -1 wraps to the last row/column.
fn fold(value: isize, side: isize) -> usize {
    (value.rem_euclid(side) - 1).rem_euclid(side) as usize
}

/// Arnold transformation of a square matrix, applied `iterations` times.
pub fn scramble(matrix: &BitMatrix, iterations: usize) -> BitMatrix {
    let side = matrix.side() as isize;
    let mut current = matrix.clone();
    for _ in 0..iterations.max(1) {
        let mut scrambled = BitMatrix::new(current.side());
        for y in 1..=side {
            for x in 1..=side {
                let col = fold(x + y, side);
                let row = fold(x + 2 * y, side);
                scrambled.set(row, col, current.get((y - 1) as usize, (x - 1) as usize));
            }
        }
        current = scrambled;
    }
    current
}

/// Inverse Arnold transformation; `iterations` must match the scramble.
pub fn unscramble(scrambled: &BitMatrix, iterations: usize) -> BitMatrix {
    let side = scrambled.side() as isize;
    let mut current = scrambled.clone();
    for _ in 0..iterations.max(1) {
        let mut matrix = BitMatrix::new(current.side());
        for y in 1..=side {
            for x in 1..=side {
                let col = fold(2 * x - y, side);
                let row = fold(-x + y, side);
                matrix.set(row, col, current.get((y - 1) as usize, (x - 1) as usize));
            }
        }
        current = matrix;
    }
    current
}

// Rendering parameters of the QR symbol: module size in pixels and quiet
// zone in modules.
const MODULE_PIXELS: usize = 10;
const QUIET_MODULES: usize = 4;

/// Encode a message as a QR bit matrix.
///
/// The symbol auto-fits from version 1 at error-correction level L and is
/// rendered at 10 px per module with a 4-module quiet zone. When `dim` is
/// given, the rendering is resampled (nearest, centre sampling) to
/// `dim x dim`; the scrambler consumes the matrix at whatever square side
/// comes out of this step.
pub fn encode(message: &str, dim: Option<usize>) -> Result<BitMatrix, QrmError> {
    let qr = QrCode::encode_text(message, QrCodeEcc::Low).map_err(|_| QrmError::MessageOverflow {
        length: message.len(),
    })?;
    let modules = qr.size() as usize + 2 * QUIET_MODULES;
    let natural = modules * MODULE_PIXELS;
    debug!(
        "encoded QR [version_side={} rendered_side={}]",
        qr.size(),
        natural
    );

    let mut rendered = BitMatrix::new(natural);
    for row in 0..natural {
        for col in 0..natural {
            let mx = (col / MODULE_PIXELS) as i32 - QUIET_MODULES as i32;
            let my = (row / MODULE_PIXELS) as i32 - QUIET_MODULES as i32;
            // get_module is light outside the symbol, which covers the
            // quiet zone.
            rendered.set(row, col, !qr.get_module(mx, my));
        }
    }

    match dim {
        Some(dim) if dim != natural => Ok(resample(&rendered, dim)),
        _ => Ok(rendered),
    }
}

fn resample(matrix: &BitMatrix, dim: usize) -> BitMatrix {
    let scale = matrix.side() as f64 / dim as f64;
    let mut out = BitMatrix::new(dim);
    for row in 0..dim {
        let src_row = (((row as f64 + 0.5) * scale) as usize).min(matrix.side() - 1);
        for col in 0..dim {
            let src_col = (((col as f64 + 0.5) * scale) as usize).min(matrix.side() - 1);
            out.set(row, col, matrix.get(src_row, src_col));
        }
    }
    out
}

// Minimum rendered side handed to the locator; small recovered matrices are
// pixel-replicated up to it.
const MIN_DECODE_SIDE: usize = 240;

// Largest symbol version probed when re-gridding a downsampled matrix.
const MAX_SCAN_VERSION: usize = 10;

fn render(matrix: &BitMatrix, scale: usize) -> GrayImage {
    let rendered = matrix.side() * scale;
    let mut img = GrayImage::new(rendered as u32, rendered as u32);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let light = matrix.get(y as usize / scale, x as usize / scale);
        pixel.0[0] = if light { 255 } else { 0 };
    }
    img
}

fn try_read(img: GrayImage) -> Option<String> {
    let mut prepared = rqrr::PreparedImage::prepare(img);
    let grids = prepared.detect_grids();
    for grid in grids {
        match grid.decode() {
            Ok((_, content)) => {
                debug!("decoded QR payload [bytes={}]", content.len());
                return Some(content);
            }
            Err(e) => {
                debug!("grid failed to decode [error={}]", e);
            }
        }
    }
    None
}

// Re-sample the matrix at the module centres a symbol of this version would
// occupy, quiet zone included. A matrix that came out of `encode` with a
// small `dim` has fractional-width modules; sampling their centres restores
// a crisp module grid.
fn regrid(matrix: &BitMatrix, version: usize) -> BitMatrix {
    let total = 17 + 4 * version + 2 * QUIET_MODULES;
    let scale = matrix.side() as f64 / total as f64;
    let mut out = BitMatrix::new(total);
    for row in 0..total {
        let src_row = (((row as f64 + 0.5) * scale) as usize).min(matrix.side() - 1);
        for col in 0..total {
            let src_col = (((col as f64 + 0.5) * scale) as usize).min(matrix.side() - 1);
            out.set(row, col, matrix.get(src_row, src_col));
        }
    }
    out
}

/// Decode a QR bit matrix back to its payload.
///
/// Returns the first decoded payload, or `None` when the matrix does not
/// contain a readable symbol. A straight read of the rendered matrix is
/// tried first; when that fails, plausible module grids are re-sampled and
/// read one by one. Decode failures are not errors: a detector probing an
/// unmarked asset lands here.
pub fn decode(matrix: &BitMatrix) -> Option<String> {
    let side = matrix.side();
    if side == 0 {
        return None;
    }
    let scale = if side >= MIN_DECODE_SIDE {
        1
    } else {
        (MIN_DECODE_SIDE + side - 1) / side
    };
    if let Some(content) = try_read(render(matrix, scale)) {
        return Some(content);
    }
    for version in 1..=MAX_SCAN_VERSION {
        let total = 17 + 4 * version + 2 * QUIET_MODULES;
        if total > side {
            break;
        }
        let regridded = regrid(matrix, version);
        if let Some(content) = try_read(render(&regridded, MODULE_PIXELS)) {
            debug!("decoded after re-gridding [version={}]", version);
            return Some(content);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_rows(rows: &[&[bool]]) -> BitMatrix {
        let mut m = BitMatrix::new(rows.len());
        for (r, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                m.set(r, c, *v);
            }
        }
        m
    }

    #[test]
    fn test_scramble_two_by_two() {
        let m = from_rows(&[&[true, false], &[false, true]]);
        let s = scramble(&m, 1);
        assert_eq!(m, unscramble(&s, 1));
        assert_ne!(m, s);
    }

    #[test]
    fn test_scramble_roundtrip_many_sides() {
        for side in 2..=32 {
            let mut m = BitMatrix::new(side);
            // arbitrary but deterministic pattern
            for r in 0..side {
                for c in 0..side {
                    m.set(r, c, (r * 31 + c * 17 + side) % 3 == 0);
                }
            }
            for k in [1usize, 2, 7, 20, 32].iter() {
                let s = scramble(&m, *k);
                assert_eq!(m, unscramble(&s, *k), "side={} k={}", side, k);
            }
        }
    }

    #[test]
    fn test_scramble_is_permutation() {
        let mut m = BitMatrix::new(5);
        for c in 0..5 {
            m.set(0, c, true);
        }
        let s = scramble(&m, 3);
        let count = (0..5)
            .flat_map(|r| (0..5).map(move |c| (r, c)))
            .filter(|(r, c)| s.get(*r, *c))
            .count();
        assert_eq!(5, count);
    }

    #[test]
    fn test_encode_natural_side() {
        let qr = encode("Hello world!", None).unwrap();
        // version 1 is 21 modules; 8 quiet modules at 10 px each
        assert_eq!(290, qr.side());
    }

    #[test]
    fn test_encode_resized() {
        let qr = encode("Hello world!", Some(256)).unwrap();
        assert_eq!(256, qr.side());
    }

    #[test]
    fn test_encode_decode() {
        let qr = encode("Hello world!", None).unwrap();
        assert_eq!(Some("Hello world!".to_string()), decode(&qr));
    }

    #[test]
    fn test_encode_scramble_unscramble_decode() {
        let qr = encode("Hello world!", Some(256)).unwrap();
        let scrambled = scramble(&qr, 20);
        assert_eq!(None, decode(&scrambled));
        let restored = unscramble(&scrambled, 20);
        assert_eq!(Some("Hello world!".to_string()), decode(&restored));
    }

    #[test]
    fn test_decode_blank_is_none() {
        let blank = BitMatrix::new(64);
        assert_eq!(None, decode(&blank));
    }
}
