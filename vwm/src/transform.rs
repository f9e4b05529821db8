//! Deterministic value and geometry transforms.
//!
//! Values mutate while keeping their shape: numeric parts are replaced by
//! equally long numbers drawn from a generator seeded with the value's own
//! row index, so an embedder and its detector regenerate identical cells.
//! Geometries gain vertices that sit on existing segments, which changes
//! the vertex list without changing the footprint.

use geo_types::{Geometry, LineString, MultiLineString, MultiPolygon, Polygon};
use krng::Rng;
use log::debug;
use regex::Regex;

use crate::{Value, VwmError};

// Upper bound on vertices inserted into one geometry.
const MAX_EXTRA_POINTS: usize = 5;

/// Pseudo-OGC type id of a geometry (line string 1, polygon 3, multi line
/// string 5, multi polygon 6).
pub fn type_id(geometry: &Geometry<f64>) -> u32 {
    match geometry {
        Geometry::Point(_) => 0,
        Geometry::LineString(_) => 1,
        Geometry::Polygon(_) => 3,
        Geometry::MultiPoint(_) => 4,
        Geometry::MultiLineString(_) => 5,
        Geometry::MultiPolygon(_) => 6,
        Geometry::GeometryCollection(_) => 7,
        _ => 8,
    }
}

fn digit_span(text: &str) -> usize {
    text.len().clamp(1, 19)
}

/// A uniformly drawn integer with `span` decimal digits.
fn random_with_digits(span: usize, seed: u64) -> u64 {
    let mut rng = Rng::from_seed(seed);
    let lo = 10u64.pow(span as u32 - 1);
    let hi = 10u64.pow(span as u32);
    rng.int(lo, hi)
}

/// Shape-preserving deterministic mutation of a cell.
///
/// Integers are replaced by a number with the same count of characters in
/// their decimal form (a sign counts as a character, the replacement is
/// non-negative). Floats run the integer rule over their digit string and
/// re-insert the decimal point at its original position. Strings have each
/// embedded number replaced, the match at position `i` seeded by
/// `seed + i`.
pub fn transform_value(value: &Value, seed: u64) -> Value {
    match value {
        Value::Int(v) => {
            let span = digit_span(&v.to_string());
            Value::Int(random_with_digits(span, seed) as i64)
        }
        Value::Float(v) => {
            let mut text = format!("{}", v);
            if !text.contains('.') {
                text.push_str(".0");
            }
            let decimal_at = text.find('.').expect("decimal point present");
            let digits: String = text.chars().filter(|c| *c != '.').collect();
            // the digit string goes through integer form, so leading
            // zeros collapse before the span is measured
            let span = match digits.parse::<i128>() {
                Ok(v) => digit_span(&v.to_string()),
                Err(_) => digit_span(&digits),
            };
            let transformed = random_with_digits(span, seed).to_string();
            let rebuilt = format!(
                "{}.{}",
                &transformed[..decimal_at.min(transformed.len())],
                &transformed[decimal_at.min(transformed.len())..]
            );
            Value::Float(rebuilt.parse().unwrap_or(*v))
        }
        Value::Str(v) => {
            let pattern = Regex::new("([1-9][0-9]*)").expect("static pattern");
            let matches: Vec<String> = pattern
                .find_iter(v)
                .map(|m| m.as_str().to_string())
                .collect();
            let mut out = v.clone();
            for (i, matched) in matches.iter().enumerate() {
                let span = digit_span(matched);
                let transformed = random_with_digits(span, seed + i as u64).to_string();
                out = out.replace(matched.as_str(), &transformed);
            }
            Value::Str(out)
        }
        Value::Null => Value::Null,
    }
}

fn decimal_exponent(value: f64) -> i32 {
    let text = format!("{}", value);
    match text.find('.') {
        Some(at) => -((text.len() - at - 1) as i32),
        None => 0,
    }
}

/// Round `value` to the finest decimal precision present in `sample`.
///
/// A sample of integral values yields precision 0 and whole-number
/// rounding.
pub fn round_to_sample(value: f64, sample: &[f64]) -> f64 {
    let precision = sample
        .iter()
        .map(|v| decimal_exponent(*v))
        .min()
        .unwrap_or(0)
        .abs() as u32;
    let factor = 10f64.powi(precision as i32);
    (value * factor).round_ties_even() / factor
}

fn insert_collinear(vertices: &[(f64, f64)], rng: &mut Rng) -> Vec<(f64, f64)> {
    if vertices.len() < 2 {
        return vertices.to_vec();
    }
    let size = MAX_EXTRA_POINTS.min((vertices.len() + 5) / 6);
    let mut ids = rng.ints(1, vertices.len() as u64, size);
    ids.sort_unstable();

    let mut inserted: Vec<(usize, (f64, f64))> = Vec::with_capacity(ids.len());
    for idx in ids {
        let idx = idx as usize;
        let (xa, ya) = vertices[idx - 1];
        let (xb, yb) = vertices[idx];
        let (x, y) = if xa == xb {
            (xa, rng.float(ya, yb))
        } else {
            let x = rng.float(xa, xb);
            (x, (yb - ya) * (x - xa) / (xb - xa) + ya)
        };
        let x = round_to_sample(x, &[xa, xb]);
        let y = round_to_sample(y, &[ya, yb]);
        inserted.push((idx, (x, y)));
    }

    let mut extended = Vec::with_capacity(vertices.len() + inserted.len());
    let mut offset = 0usize;
    for (idx, point) in inserted {
        extended.extend_from_slice(&vertices[offset..idx]);
        extended.push(point);
        offset = idx;
    }
    extended.extend_from_slice(&vertices[offset..]);
    extended
}

fn line_vertices(line: &LineString<f64>) -> Vec<(f64, f64)> {
    line.0.iter().map(|c| (c.x, c.y)).collect()
}

// A polygon contributes its rings as one flat vertex list, exterior first,
// and is rebuilt as a single ring.
fn polygon_vertices(polygon: &Polygon<f64>) -> Vec<(f64, f64)> {
    let mut vertices = line_vertices(polygon.exterior());
    for interior in polygon.interiors() {
        vertices.extend(line_vertices(interior));
    }
    vertices
}

fn line_from(vertices: Vec<(f64, f64)>) -> LineString<f64> {
    LineString::from(vertices)
}

fn polygon_from(vertices: Vec<(f64, f64)>) -> Polygon<f64> {
    Polygon::new(LineString::from(vertices), Vec::new())
}

/// Insert collinear vertices into a (multi)line or (multi)polygon.
///
/// Multi geometries descend into one uniformly drawn part; everything else
/// is rejected. The generator stream is consumed in a fixed order, which a
/// paired detector replays to rebuild the identical candidate.
pub fn transform_geometry(
    geometry: &Geometry<f64>,
    rng: &mut Rng,
) -> Result<Geometry<f64>, VwmError> {
    match geometry {
        Geometry::LineString(line) => {
            let extended = insert_collinear(&line_vertices(line), rng);
            debug!("extended line string [vertices={}]", extended.len());
            Ok(Geometry::LineString(line_from(extended)))
        }
        Geometry::Polygon(polygon) => {
            let extended = insert_collinear(&polygon_vertices(polygon), rng);
            Ok(Geometry::Polygon(polygon_from(extended)))
        }
        Geometry::MultiLineString(multi) => {
            let mut parts = multi.0.clone();
            let part = rng.int(0, parts.len() as u64) as usize;
            let extended = insert_collinear(&line_vertices(&parts[part]), rng);
            parts[part] = line_from(extended);
            Ok(Geometry::MultiLineString(MultiLineString::new(parts)))
        }
        Geometry::MultiPolygon(multi) => {
            let mut parts = multi.0.clone();
            let part = rng.int(0, parts.len() as u64) as usize;
            let extended = insert_collinear(&polygon_vertices(&parts[part]), rng);
            parts[part] = polygon_from(extended);
            Ok(Geometry::MultiPolygon(MultiPolygon::new(parts)))
        }
        other => Err(VwmError::UnsupportedGeometry {
            type_id: type_id(other),
        }),
    }
}
