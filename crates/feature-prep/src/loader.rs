use std::io::Read;
use std::path::Path;

use sv_core::{RawRecord, RawTable, SvError, SvResult};

/// Cell spellings treated as missing values.
const MISSING_TOKENS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

pub fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell)
}

/// Load a headed CSV file, keeping every cell as a raw string.
pub fn load_table(path: impl AsRef<Path>) -> SvResult<RawTable> {
    let path = path.as_ref();
    tracing::info!("Loading data from {}", path.display());
    let file = std::fs::File::open(path)
        .map_err(|e| SvError::Source(format!("{}: {e}", path.display())))?;
    let table = read_table(file)?;
    tracing::info!(
        "Data loaded: {} rows, {} columns",
        table.len(),
        table.columns.len()
    );
    Ok(table)
}

/// Parse CSV from any reader. Short rows leave trailing cells missing.
pub fn read_table<R: Read>(reader: R) -> SvResult<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| SvError::Source(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut records = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let row = result.map_err(|e| SvError::Source(format!("row {index}: {e}")))?;
        let mut record = RawRecord::new(index);
        for (j, column) in columns.iter().enumerate() {
            let cell = row.get(j).filter(|c| !is_missing(c));
            record = record.with_cell(column, cell);
        }
        records.push(record);
    }

    Ok(RawTable { columns, records })
}
