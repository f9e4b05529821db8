//! Two-dimensional Haar wavelet transform.
//!
//! The invisible mark lives in the diagonal high-frequency sub-band of the
//! third decomposition level, where a small modulation of the coefficients
//! is least visible. Odd extents are handled by duplicating the trailing
//! sample, which keeps the analysis/synthesis pair exactly invertible at
//! every level; the detector depends on both sides of an embed/detect pair
//! using this identical convention.

const SQRT2: f64 = std::f64::consts::SQRT_2;

/// Row-major matrix of coefficients or samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize) -> Matrix {
        Matrix {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn from_data(rows: usize, cols: usize, data: Vec<f64>) -> Matrix {
        debug_assert_eq!(rows * cols, data.len());
        Matrix { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    /// Mean of absolute values over the whole matrix.
    pub fn mean_abs(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|v| v.abs()).sum::<f64>() / self.data.len() as f64
    }
}

/// Detail sub-bands of one decomposition level, with the extent of the
/// matrix they were analyzed from (needed to undo edge duplication).
pub struct Detail {
    pub lh: Matrix,
    pub hl: Matrix,
    pub hh: Matrix,
    from_rows: usize,
    from_cols: usize,
}

/// Multi-level decomposition; `details[0]` is the coarsest level, so a
/// three-level analysis of `a` is `(ll, details[0])` at level 3 followed by
/// the finer levels in order.
pub struct Decomposition {
    pub ll: Matrix,
    pub details: Vec<Detail>,
}

fn half(n: usize) -> usize {
    (n + 1) / 2
}

fn sample(values: &Matrix, row: usize, col: usize, rows: usize, cols: usize) -> f64 {
    // duplicate the trailing row/column for odd extents
    values.get(row.min(rows - 1), col.min(cols - 1))
}

/// One analysis step: split into low/high along columns, then rows.
fn analyze(a: &Matrix) -> (Matrix, Matrix, Matrix, Matrix) {
    let rows = a.rows();
    let cols = a.cols();
    let hrows = half(rows);
    let hcols = half(cols);

    // horizontal pass
    let mut low = Matrix::new(rows, hcols);
    let mut high = Matrix::new(rows, hcols);
    for r in 0..rows {
        for c in 0..hcols {
            let x0 = sample(a, r, 2 * c, rows, cols);
            let x1 = sample(a, r, 2 * c + 1, rows, cols);
            low.set(r, c, (x0 + x1) / SQRT2);
            high.set(r, c, (x0 - x1) / SQRT2);
        }
    }

    // vertical pass
    let mut ll = Matrix::new(hrows, hcols);
    let mut lh = Matrix::new(hrows, hcols);
    let mut hl = Matrix::new(hrows, hcols);
    let mut hh = Matrix::new(hrows, hcols);
    for r in 0..hrows {
        for c in 0..hcols {
            let l0 = sample(&low, 2 * r, c, rows, hcols);
            let l1 = sample(&low, 2 * r + 1, c, rows, hcols);
            let h0 = sample(&high, 2 * r, c, rows, hcols);
            let h1 = sample(&high, 2 * r + 1, c, rows, hcols);
            ll.set(r, c, (l0 + l1) / SQRT2);
            lh.set(r, c, (l0 - l1) / SQRT2);
            hl.set(r, c, (h0 + h1) / SQRT2);
            hh.set(r, c, (h0 - h1) / SQRT2);
        }
    }
    (ll, lh, hl, hh)
}

/// One synthesis step back to `from_rows x from_cols`.
fn synthesize(ll: &Matrix, detail: &Detail) -> Matrix {
    let hrows = ll.rows();
    let hcols = ll.cols();
    let rows = detail.from_rows;
    let cols = detail.from_cols;

    // vertical pass
    let mut low = Matrix::new(rows, hcols);
    let mut high = Matrix::new(rows, hcols);
    for r in 0..hrows {
        for c in 0..hcols {
            let l0 = (ll.get(r, c) + detail.lh.get(r, c)) / SQRT2;
            let l1 = (ll.get(r, c) - detail.lh.get(r, c)) / SQRT2;
            let h0 = (detail.hl.get(r, c) + detail.hh.get(r, c)) / SQRT2;
            let h1 = (detail.hl.get(r, c) - detail.hh.get(r, c)) / SQRT2;
            if 2 * r < rows {
                low.set(2 * r, c, l0);
                high.set(2 * r, c, h0);
            }
            if 2 * r + 1 < rows {
                low.set(2 * r + 1, c, l1);
                high.set(2 * r + 1, c, h1);
            }
        }
    }

    // horizontal pass
    let mut out = Matrix::new(rows, cols);
    for r in 0..rows {
        for c in 0..hcols {
            let x0 = (low.get(r, c) + high.get(r, c)) / SQRT2;
            let x1 = (low.get(r, c) - high.get(r, c)) / SQRT2;
            if 2 * c < cols {
                out.set(r, 2 * c, x0);
            }
            if 2 * c + 1 < cols {
                out.set(r, 2 * c + 1, x1);
            }
        }
    }
    out
}

/// Multi-level analysis; `levels >= 1`.
pub fn wavedec2(a: &Matrix, levels: usize) -> Decomposition {
    let mut ll = a.clone();
    let mut details = Vec::with_capacity(levels);
    for _ in 0..levels.max(1) {
        let from_rows = ll.rows();
        let from_cols = ll.cols();
        let (next_ll, lh, hl, hh) = analyze(&ll);
        details.push(Detail {
            lh,
            hl,
            hh,
            from_rows,
            from_cols,
        });
        ll = next_ll;
    }
    details.reverse();
    Decomposition { ll, details }
}

/// Full synthesis of a multi-level decomposition.
pub fn waverec2(decomposition: &Decomposition) -> Matrix {
    let mut current = decomposition.ll.clone();
    for detail in &decomposition.details {
        current = synthesize(&current, detail);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkered(rows: usize, cols: usize) -> Matrix {
        let mut m = Matrix::new(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                m.set(r, c, ((r * 7 + c * 13) % 251) as f64);
            }
        }
        m
    }

    fn assert_close(a: &Matrix, b: &Matrix) {
        assert_eq!(a.rows(), b.rows());
        assert_eq!(a.cols(), b.cols());
        for r in 0..a.rows() {
            for c in 0..a.cols() {
                assert!(
                    (a.get(r, c) - b.get(r, c)).abs() < 1e-9,
                    "mismatch at ({}, {})",
                    r,
                    c
                );
            }
        }
    }

    #[test]
    fn test_single_level_roundtrip_even() {
        let m = checkered(16, 24);
        let dec = wavedec2(&m, 1);
        assert_close(&m, &waverec2(&dec));
    }

    #[test]
    fn test_single_level_roundtrip_odd() {
        let m = checkered(15, 9);
        let dec = wavedec2(&m, 1);
        assert_close(&m, &waverec2(&dec));
    }

    #[test]
    fn test_three_level_roundtrip() {
        for (rows, cols) in [(64, 64), (512, 512), (100, 37), (33, 65)].iter() {
            let m = checkered(*rows, *cols);
            let dec = wavedec2(&m, 3);
            assert_close(&m, &waverec2(&dec));
        }
    }

    #[test]
    fn test_three_level_shapes() {
        let m = checkered(512, 512);
        let dec = wavedec2(&m, 3);
        assert_eq!(3, dec.details.len());
        assert_eq!(64, dec.ll.rows());
        assert_eq!(64, dec.details[0].hh.rows());
        assert_eq!(128, dec.details[1].hh.rows());
        assert_eq!(256, dec.details[2].hh.rows());
    }

    #[test]
    fn test_constant_image_has_empty_details() {
        let mut m = Matrix::new(32, 32);
        for r in 0..32 {
            for c in 0..32 {
                m.set(r, c, 120.0);
            }
        }
        let dec = wavedec2(&m, 3);
        assert!(dec.details[0].hh.mean_abs() < 1e-12);
        // 3 halvings of both axes scale the approximation by 2^3
        assert!((dec.ll.get(0, 0) - 120.0 * 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_modulated_hh_survives_roundtrip() {
        let m = checkered(64, 64);
        let mut dec = wavedec2(&m, 3);
        let dim = dec.details[0].hh.rows().min(dec.details[0].hh.cols());
        for x in 0..dim {
            for y in 0..dim {
                let v = dec.details[0].hh.get(x, y);
                dec.details[0].hh.set(x, y, v + 3.0);
            }
        }
        let rec = waverec2(&dec);
        let dec2 = wavedec2(&rec, 3);
        for x in 0..dim {
            for y in 0..dim {
                let original = wavedec2(&m, 3).details[0].hh.get(x, y);
                let diff = dec2.details[0].hh.get(x, y) - original;
                assert!((diff - 3.0).abs() < 1e-9, "at ({}, {})", x, y);
            }
        }
    }
}
