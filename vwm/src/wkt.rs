//! Well-Known-Text reader and writer.
//!
//! Covers the geometry kinds the markers operate on (point, line string,
//! polygon and their multi forms). Coordinates are written with the
//! shortest round-tripping decimal form so a written dataset reads back
//! value-identical.

use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPolygon, Point, Polygon,
};
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum WktError {
    UnknownKeyword { keyword: String },
    UnbalancedParentheses,
    BadCoordinate { text: String },
    EmptyGeometry,
}

impl error::Error for WktError {}
impl fmt::Display for WktError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownKeyword { keyword } => {
                write!(f, "unknown geometry keyword {:?}", keyword)
            }
            Self::UnbalancedParentheses => {
                write!(f, "unbalanced parentheses")
            }
            Self::BadCoordinate { text } => {
                write!(f, "malformed coordinate {:?}", text)
            }
            Self::EmptyGeometry => {
                write!(f, "empty geometry")
            }
        }
    }
}

/// Body between the outermost parentheses, after the keyword.
fn body(text: &str) -> Result<&str, WktError> {
    let open = text.find('(').ok_or(WktError::UnbalancedParentheses)?;
    let close = text.rfind(')').ok_or(WktError::UnbalancedParentheses)?;
    if close < open {
        return Err(WktError::UnbalancedParentheses);
    }
    Ok(&text[open + 1..close])
}

/// Split at commas that sit at parenthesis depth zero.
fn split_top_level(text: &str) -> Result<Vec<&str>, WktError> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(WktError::UnbalancedParentheses);
                }
            }
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(WktError::UnbalancedParentheses);
    }
    parts.push(text[start..].trim());
    Ok(parts)
}

fn parse_coord(text: &str) -> Result<Coord<f64>, WktError> {
    let mut numbers = text.split_whitespace();
    let x = numbers
        .next()
        .and_then(|t| t.parse::<f64>().ok())
        .ok_or_else(|| WktError::BadCoordinate {
            text: text.to_string(),
        })?;
    let y = numbers
        .next()
        .and_then(|t| t.parse::<f64>().ok())
        .ok_or_else(|| WktError::BadCoordinate {
            text: text.to_string(),
        })?;
    Ok(Coord { x, y })
}

fn parse_coord_sequence(text: &str) -> Result<Vec<Coord<f64>>, WktError> {
    split_top_level(text)?
        .into_iter()
        .map(|t| parse_coord(t.trim_matches(|c| c == '(' || c == ')').trim()))
        .collect()
}

fn parse_polygon_body(text: &str) -> Result<Polygon<f64>, WktError> {
    let mut rings = Vec::new();
    for ring in split_top_level(text)? {
        rings.push(LineString::from(parse_coord_sequence(body_or_self(ring))?));
    }
    if rings.is_empty() {
        return Err(WktError::EmptyGeometry);
    }
    let exterior = rings.remove(0);
    Ok(Polygon::new(exterior, rings))
}

// Ring bodies arrive either already stripped or still parenthesized.
fn body_or_self(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

/// Parse a WKT string into a geometry.
pub fn parse(text: &str) -> Result<Geometry<f64>, WktError> {
    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with("POINT") {
        let coords = parse_coord_sequence(body(trimmed)?)?;
        let coord = coords.first().ok_or(WktError::EmptyGeometry)?;
        Ok(Geometry::Point(Point::from(*coord)))
    } else if upper.starts_with("LINESTRING") {
        Ok(Geometry::LineString(LineString::from(
            parse_coord_sequence(body(trimmed)?)?,
        )))
    } else if upper.starts_with("POLYGON") {
        Ok(Geometry::Polygon(parse_polygon_body(body(trimmed)?)?))
    } else if upper.starts_with("MULTILINESTRING") {
        let parts = split_top_level(body(trimmed)?)?
            .into_iter()
            .map(|p| Ok(LineString::from(parse_coord_sequence(body_or_self(p))?)))
            .collect::<Result<Vec<_>, WktError>>()?;
        Ok(Geometry::MultiLineString(MultiLineString::new(parts)))
    } else if upper.starts_with("MULTIPOLYGON") {
        let parts = split_top_level(body(trimmed)?)?
            .into_iter()
            .map(|p| parse_polygon_body(body_or_self(p)))
            .collect::<Result<Vec<_>, WktError>>()?;
        Ok(Geometry::MultiPolygon(MultiPolygon::new(parts)))
    } else {
        let keyword: String = trimmed
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        Err(WktError::UnknownKeyword { keyword })
    }
}

fn write_coords(coords: &[Coord<f64>], out: &mut String) {
    for (i, coord) in coords.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("{} {}", coord.x, coord.y));
    }
}

fn write_polygon_body(polygon: &Polygon<f64>, out: &mut String) {
    out.push('(');
    write_coords(&polygon.exterior().0, out);
    out.push(')');
    for interior in polygon.interiors() {
        out.push_str(", (");
        write_coords(&interior.0, out);
        out.push(')');
    }
}

/// Render a geometry as WKT.
pub fn write(geometry: &Geometry<f64>) -> String {
    let mut out = String::new();
    match geometry {
        Geometry::Point(p) => {
            out.push_str(&format!("POINT ({} {})", p.x(), p.y()));
        }
        Geometry::LineString(ls) => {
            out.push_str("LINESTRING (");
            write_coords(&ls.0, &mut out);
            out.push(')');
        }
        Geometry::Polygon(p) => {
            out.push_str("POLYGON (");
            write_polygon_body(p, &mut out);
            out.push(')');
        }
        Geometry::MultiLineString(mls) => {
            out.push_str("MULTILINESTRING (");
            for (i, ls) in mls.0.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('(');
                write_coords(&ls.0, &mut out);
                out.push(')');
            }
            out.push(')');
        }
        Geometry::MultiPolygon(mp) => {
            out.push_str("MULTIPOLYGON (");
            for (i, p) in mp.0.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('(');
                write_polygon_body(p, &mut out);
                out.push(')');
            }
            out.push(')');
        }
        other => {
            out.push_str(&format!("{:?}", other));
        }
    }
    out
}
