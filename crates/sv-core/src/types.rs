use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row of the source table, cells kept as raw strings.
///
/// A cell is `None` when the column is absent for this row or the source
/// marked it as missing. Identity is the 0-based data row index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub index: usize,
    pub cells: BTreeMap<String, Option<String>>,
}

impl RawRecord {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            cells: BTreeMap::new(),
        }
    }

    pub fn with_cell(mut self, column: &str, value: Option<&str>) -> Self {
        self.cells
            .insert(column.to_string(), value.map(|v| v.to_string()));
        self
    }

    /// Present, non-missing cell value.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).and_then(|v| v.as_deref())
    }
}

/// Headed table as read from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// A retained row with every required field complete and finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRow {
    /// Index of the originating `RawRecord`.
    pub source_index: usize,
    /// Predictor values in `schema::predictor_columns()` order.
    pub predictors: Vec<f64>,
    pub target: f64,
    /// Non-required columns (sample names, raw labels).
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanedDataset {
    pub rows: Vec<CleanRow>,
}

impl CleanedDataset {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.target).collect()
    }

    /// Values of predictor column `j` across all rows.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r.predictors[j]).collect()
    }
}
