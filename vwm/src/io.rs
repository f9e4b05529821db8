//! Dataset reading and writing.
//!
//! Delimited text is the working format: comma by default, tab for `.tsv`,
//! any one- or two-character delimiter on request. Geometry arrives either
//! as a WKT column or as a latitude/longitude pair; a WKT column is
//! consumed into the geometry and written back out under the same name.

use geo_types::{Geometry, Point};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;

use crate::{wkt, Value, VectorDataset, VwmError};

/// Options controlling how a delimited file becomes a dataset.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Field delimiter, one or two characters; `None` picks by extension.
    pub delimiter: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub geom: Option<String>,
    pub crs: Option<String>,
    pub encoding: Option<String>,
}

/// The delimiter a path/options pair resolves to: the explicit option, a
/// tab for `.tsv`, a comma otherwise.
pub fn effective_delimiter(path: &Path, options: &ReadOptions) -> Result<String, VwmError> {
    let delimiter = match &options.delimiter {
        Some(d) => d.clone(),
        None => {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            if ext.as_deref() == Some("tsv") {
                "\t".to_string()
            } else {
                ",".to_string()
            }
        }
    };
    if delimiter.is_empty() || delimiter.len() > 2 {
        return Err(VwmError::InvalidOption {
            message: format!("delimiter {:?} must be one or two characters", delimiter),
        });
    }
    Ok(delimiter)
}

fn decode_text(bytes: &[u8], encoding: &Option<String>) -> Result<String, VwmError> {
    match encoding {
        Some(label) => {
            let encoding = encoding_rs::Encoding::for_label(label.as_bytes()).ok_or_else(|| {
                VwmError::InvalidOption {
                    message: format!("unknown encoding {:?}", label),
                }
            })?;
            let (text, _, had_errors) = encoding.decode(bytes);
            if had_errors {
                warn!("characters replaced while decoding [encoding={:?}]", label);
            }
            Ok(text.into_owned())
        }
        None => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn parse_cell(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Value::Float(v);
    }
    Value::Str(text.to_string())
}

// Columns come back from `parse_cell` mixed (an integer-looking cell in an
// otherwise float column); settle each column on one type.
fn harmonize_columns(cells: &mut Vec<Vec<Value>>) {
    for column in cells.iter_mut() {
        let has_float = column.iter().any(|v| matches!(v, Value::Float(_)));
        let has_str = column.iter().any(|v| matches!(v, Value::Str(_)));
        if has_str {
            for value in column.iter_mut() {
                if !matches!(value, Value::Null | Value::Str(_)) {
                    *value = Value::Str(value.render());
                }
            }
        } else if has_float {
            for value in column.iter_mut() {
                if let Value::Int(v) = value {
                    *value = Value::Float(*v as f64);
                }
            }
        }
    }
}

fn records_from_text(text: &str, delimiter: &str) -> Result<(Vec<String>, Vec<Vec<String>>), VwmError> {
    if delimiter.len() == 1 && delimiter.is_ascii() {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter.as_bytes()[0])
            .has_headers(true)
            .flexible(false)
            .from_reader(text.as_bytes());
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| VwmError::Internal {
                message: e.to_string(),
            })?
            .iter()
            .map(|h| h.to_string())
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| VwmError::Internal {
                message: e.to_string(),
            })?;
            rows.push(record.iter().map(|f| f.to_string()).collect());
        }
        Ok((headers, rows))
    } else {
        // multi-character delimiters get a plain line splitter, no quoting
        let mut lines = text.lines();
        let headers: Vec<String> = lines
            .next()
            .unwrap_or("")
            .split(delimiter)
            .map(|h| h.to_string())
            .collect();
        let rows = lines
            .filter(|line| !line.is_empty())
            .map(|line| line.split(delimiter).map(|f| f.to_string()).collect())
            .collect();
        Ok((headers, rows))
    }
}

/// Read a delimited file into a dataset.
pub fn read_dataset(path: &Path, options: &ReadOptions) -> Result<VectorDataset, VwmError> {
    let delimiter = effective_delimiter(path, options)?;
    let bytes = fs::read(path).map_err(|e| VwmError::DatasetMissing {
        message: format!("{:?}: {}", path, e),
    })?;
    let text = decode_text(&bytes, &options.encoding)?;
    let (headers, rows) = records_from_text(&text, &delimiter)?;
    if headers.is_empty() {
        return Err(VwmError::DatasetMissing {
            message: format!("{:?}: no columns", path),
        });
    }

    let geom_index = options
        .geom
        .as_ref()
        .and_then(|name| headers.iter().position(|h| h == name));
    if options.geom.is_some() && geom_index.is_none() {
        return Err(VwmError::InvalidOption {
            message: format!("geometry column {:?} not found", options.geom.as_ref().unwrap()),
        });
    }

    let kept: Vec<usize> = (0..headers.len()).filter(|i| Some(*i) != geom_index).collect();
    let columns: Vec<String> = kept.iter().map(|i| headers[*i].clone()).collect();
    let mut cells: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); kept.len()];
    let mut geometries: Vec<Geometry<f64>> = Vec::new();

    for row in &rows {
        for (slot, source) in kept.iter().enumerate() {
            let raw = row.get(*source).map(String::as_str).unwrap_or("");
            cells[slot].push(parse_cell(raw));
        }
        if let Some(g) = geom_index {
            let raw = row.get(g).map(String::as_str).unwrap_or("");
            let geometry = wkt::parse(raw).map_err(|e| VwmError::Internal {
                message: format!("row {}: {}", geometries.len() + 1, e),
            })?;
            geometries.push(geometry);
        }
    }
    harmonize_columns(&mut cells);

    let mut dataset = VectorDataset::new(columns, cells, None);

    if let Some(g) = geom_index {
        dataset = dataset.with_geometry(geometries);
        dataset.geometry_column = Some(headers[g].clone());
    } else if let (Some(lat), Some(lon)) = (&options.lat, &options.lon) {
        let lat_index = dataset
            .column_index(lat)
            .ok_or_else(|| VwmError::InvalidOption {
                message: format!("latitude column {:?} not found", lat),
            })?;
        let lon_index = dataset
            .column_index(lon)
            .ok_or_else(|| VwmError::InvalidOption {
                message: format!("longitude column {:?} not found", lon),
            })?;
        let points: Vec<Geometry<f64>> = (0..dataset.len())
            .map(|r| {
                let y = match dataset.value(lat_index, r) {
                    Value::Int(v) => *v as f64,
                    Value::Float(v) => *v,
                    _ => f64::NAN,
                };
                let x = match dataset.value(lon_index, r) {
                    Value::Int(v) => *v as f64,
                    Value::Float(v) => *v,
                    _ => f64::NAN,
                };
                Geometry::Point(Point::new(x, y))
            })
            .collect();
        dataset = dataset.with_geometry(points);
    }

    dataset.crs = options.crs.clone();
    info!(
        "opened vector dataset [path={:?} rows={} columns={} geometry={}]",
        path,
        dataset.len(),
        dataset.column_names().len(),
        dataset.has_geometry()
    );
    Ok(dataset)
}

/// Write a dataset back to delimited text with the given delimiter.
///
/// A geometry that was read from a WKT column is written back under that
/// column's name; point geometry derived from latitude/longitude columns
/// is already present in the table and is not duplicated.
pub fn write_dataset(df: &VectorDataset, path: &Path, delimiter: &str) -> Result<(), VwmError> {
    if delimiter.is_empty() || delimiter.len() > 2 {
        return Err(VwmError::InvalidOption {
            message: format!("delimiter {:?} must be one or two characters", delimiter),
        });
    }
    let geometry_column = df.geometry_column.clone();

    if delimiter.len() == 1 && delimiter.is_ascii() {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter.as_bytes()[0])
            .from_path(path)
            .map_err(|e| VwmError::Internal {
                message: e.to_string(),
            })?;
        let mut headers: Vec<String> = df.column_names().to_vec();
        if let Some(name) = &geometry_column {
            headers.push(name.clone());
        }
        writer.write_record(&headers).map_err(|e| VwmError::Internal {
            message: e.to_string(),
        })?;
        for r in 0..df.len() {
            let mut record: Vec<String> = df.row_at(r).iter().map(Value::render).collect();
            if geometry_column.is_some() {
                let geometry = &df.geometry_opt().expect("geometry column implies geometry")[r];
                record.push(wkt::write(geometry));
            }
            writer.write_record(&record).map_err(|e| VwmError::Internal {
                message: e.to_string(),
            })?;
        }
        writer.flush().map_err(|e| VwmError::Internal {
            message: e.to_string(),
        })?;
    } else {
        let mut out = String::new();
        let mut headers: Vec<String> = df.column_names().to_vec();
        if let Some(name) = &geometry_column {
            headers.push(name.clone());
        }
        out.push_str(&headers.join(delimiter));
        out.push('\n');
        for r in 0..df.len() {
            let mut record: Vec<String> = df.row_at(r).iter().map(Value::render).collect();
            if geometry_column.is_some() {
                let geometry = &df.geometry_opt().expect("geometry column implies geometry")[r];
                record.push(wkt::write(geometry));
            }
            out.push_str(&record.join(delimiter));
            out.push('\n');
        }
        fs::write(path, out).map_err(|e| VwmError::Internal {
            message: e.to_string(),
        })?;
    }
    debug!("wrote vector dataset [path={:?} rows={}]", path, df.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cell_types() {
        assert_eq!(Value::Int(42), parse_cell("42"));
        assert_eq!(Value::Float(3.5), parse_cell("3.5"));
        assert_eq!(Value::Str("plot 7a".to_string()), parse_cell("plot 7a"));
        assert_eq!(Value::Null, parse_cell(""));
    }

    #[test]
    fn test_harmonize_promotes_ints_to_float() {
        let mut cells = vec![vec![Value::Int(1), Value::Float(2.5), Value::Null]];
        harmonize_columns(&mut cells);
        assert_eq!(
            vec![Value::Float(1.0), Value::Float(2.5), Value::Null],
            cells[0]
        );
    }

    #[test]
    fn test_effective_delimiter_tsv_default() {
        let options = ReadOptions::default();
        assert_eq!(
            "\t",
            effective_delimiter(Path::new("suspect.tsv"), &options).unwrap()
        );
        assert_eq!(
            ",",
            effective_delimiter(Path::new("suspect.csv"), &options).unwrap()
        );
    }

    #[test]
    fn test_effective_delimiter_rejects_long() {
        let options = ReadOptions {
            delimiter: Some(";;;".to_string()),
            ..ReadOptions::default()
        };
        assert!(matches!(
            effective_delimiter(Path::new("a.csv"), &options),
            Err(VwmError::InvalidOption { .. })
        ));
    }
}
