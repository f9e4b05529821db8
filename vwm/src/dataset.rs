//! Columnar vector dataset.
//!
//! A table of named, typed columns with an optional geometry column. The
//! embedders and detectors only need a small capability set — row access,
//! slicing, concatenation, sampling, and the column-sparsity ranking used
//! by the row-existence check.

use geo_types::Geometry;
use log::debug;
use std::cell::RefCell;
use std::collections::HashSet;

/// One cell of the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl Value {
    /// Cell equality as used when filtering for a row: nulls never match
    /// anything, not even each other.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (a, b) => a == b,
        }
    }

    /// Canonical text form, used for distinct counting and CSV output.
    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{}", v),
            Value::Str(v) => v.clone(),
            Value::Null => String::new(),
        }
    }
}

// Rows sampled when scoring column sparsity.
const SPARSITY_SAMPLE: usize = 10_000;

pub struct VectorDataset {
    columns: Vec<String>,
    /// Column-major cells; `cells[c][r]` is row `r` of column `c`.
    cells: Vec<Vec<Value>>,
    geometry: Option<Vec<Geometry<f64>>>,
    /// Column name the geometry was read from, when it came from a WKT
    /// column; drives whether the writer emits one.
    pub geometry_column: Option<String>,
    pub crs: Option<String>,
    sparsity_order: RefCell<Option<Vec<String>>>,
}

impl VectorDataset {
    pub fn new(
        columns: Vec<String>,
        cells: Vec<Vec<Value>>,
        geometry: Option<Vec<Geometry<f64>>>,
    ) -> VectorDataset {
        debug_assert_eq!(columns.len(), cells.len());
        VectorDataset {
            columns,
            cells,
            geometry,
            geometry_column: None,
            crs: None,
            sparsity_order: RefCell::new(None),
        }
    }

    /// A dataset holding a single row.
    pub fn single_row(
        columns: Vec<String>,
        row: Vec<Value>,
        geometry: Option<Geometry<f64>>,
    ) -> VectorDataset {
        let cells = row.into_iter().map(|v| vec![v]).collect();
        VectorDataset::new(columns, cells, geometry.map(|g| vec![g]))
    }

    pub fn len(&self) -> usize {
        self.cells.first().map(|c| c.len()).unwrap_or_else(|| {
            self.geometry.as_ref().map(|g| g.len()).unwrap_or(0)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, column: usize, row: usize) -> &Value {
        &self.cells[column][row]
    }

    pub fn row_at(&self, row: usize) -> Vec<Value> {
        self.cells.iter().map(|c| c[row].clone()).collect()
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn geometry_opt(&self) -> Option<&[Geometry<f64>]> {
        self.geometry.as_deref()
    }

    /// Rows `[from, to)` as a new dataset; the sparsity cache is not
    /// inherited.
    pub fn slice(&self, from: usize, to: usize) -> VectorDataset {
        let to = to.min(self.len());
        let from = from.min(to);
        let cells = self
            .cells
            .iter()
            .map(|c| c[from..to].to_vec())
            .collect();
        let geometry = self.geometry.as_ref().map(|g| g[from..to].to_vec());
        let mut out = VectorDataset::new(self.columns.clone(), cells, geometry);
        out.geometry_column = self.geometry_column.clone();
        out.crs = self.crs.clone();
        out
    }

    /// First `n` rows, used as the sparsity sample.
    pub fn sample(&self, n: usize) -> VectorDataset {
        self.slice(0, n.min(self.len()))
    }

    /// Concatenate datasets with identical columns, in order.
    pub fn concat(parts: &[VectorDataset]) -> VectorDataset {
        let first = parts.first().expect("concat of at least one part");
        let mut cells: Vec<Vec<Value>> = vec![Vec::new(); first.columns.len()];
        let mut geometry: Option<Vec<Geometry<f64>>> =
            if first.geometry.is_some() { Some(Vec::new()) } else { None };
        for part in parts {
            debug_assert_eq!(first.columns, part.columns);
            for (c, column) in part.cells.iter().enumerate() {
                cells[c].extend(column.iter().cloned());
            }
            if let (Some(all), Some(g)) = (geometry.as_mut(), part.geometry.as_ref()) {
                all.extend(g.iter().cloned());
            }
        }
        let mut out = VectorDataset::new(first.columns.clone(), cells, geometry);
        out.geometry_column = first.geometry_column.clone();
        out.crs = first.crs.clone();
        out
    }

    /// Replace the geometry of every row; lengths must agree.
    pub fn with_geometry(mut self, geometry: Vec<Geometry<f64>>) -> VectorDataset {
        debug_assert_eq!(self.len(), geometry.len());
        self.geometry = Some(geometry);
        self
    }

    /// Column names ordered by sparsity (distinct count over non-null
    /// count) descending, computed over a bounded sample and cached.
    pub fn columns_by_sparsity(&self) -> Vec<String> {
        if let Some(cached) = self.sparsity_order.borrow().as_ref() {
            return cached.clone();
        }
        let sample = self.sample(SPARSITY_SAMPLE);
        let mut scored: Vec<(String, f64)> = Vec::with_capacity(self.columns.len());
        for (c, name) in self.columns.iter().enumerate() {
            let mut distinct: HashSet<String> = HashSet::new();
            let mut non_null = 0usize;
            for r in 0..sample.len() {
                match sample.value(c, r) {
                    Value::Null => {}
                    value => {
                        non_null += 1;
                        distinct.insert(value.render());
                    }
                }
            }
            let score = if non_null == 0 {
                0.0
            } else {
                distinct.len() as f64 / non_null as f64
            };
            scored.push((name.clone(), score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let order: Vec<String> = scored.into_iter().map(|(name, _)| name).collect();
        debug!("ranked columns by sparsity [order={:?}]", order);
        *self.sparsity_order.borrow_mut() = Some(order.clone());
        order
    }
}

/// Whether a one-row dataset occurs exactly once in `df`.
///
/// Columns are visited most-discriminating first so the candidate set
/// collapses quickly; an empty intermediate short-circuits to `false`.
pub fn row_exists(df: &VectorDataset, row: &VectorDataset) -> bool {
    debug_assert_eq!(1, row.len());
    let ordered = df.columns_by_sparsity();
    let mut candidates: Vec<usize> = (0..df.len()).collect();
    for name in ordered {
        let row_column = match row.column_index(&name) {
            Some(c) => c,
            None => continue,
        };
        let df_column = match df.column_index(&name) {
            Some(c) => c,
            None => continue,
        };
        let wanted = row.value(row_column, 0);
        candidates.retain(|r| df.value(df_column, *r).matches(wanted));
        if candidates.is_empty() {
            return false;
        }
    }
    candidates.len() == 1
}
