//! Tabular input loading (CSV or JSON array of objects)

use crate::error::InputFormatError;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// An input table with raw headers and string cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Position of `rows[0]` in the source file
    pub first_row: usize,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers,
            rows,
            first_row: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Split into tables of at most `size` rows sharing the same headers.
    /// Each chunk keeps the source position of its first row.
    pub fn chunks(&self, size: usize) -> Vec<RawTable> {
        let size = size.max(1);
        self.rows
            .chunks(size)
            .enumerate()
            .map(|(i, rows)| RawTable {
                headers: self.headers.clone(),
                rows: rows.to_vec(),
                first_row: self.first_row + i * size,
            })
            .collect()
    }
}

/// Read an input table; `.json` files are parsed as a JSON array of objects,
/// anything else as CSV.
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<RawTable, InputFormatError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| InputFormatError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let text = decode(bytes);

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let table = if is_json {
        parse_json(&text, path)?
    } else {
        parse_csv(&text, path)?
    };

    info!(
        path = %path.display(),
        rows = table.len(),
        columns = table.headers.len(),
        "Input table loaded"
    );
    Ok(table)
}

/// UTF-8 when valid, Latin-1 otherwise.
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            debug!("Input is not valid UTF-8, decoding as Latin-1");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    }
}

/// Parse CSV text; malformed lines are skipped.
pub fn parse_csv(text: &str, path: &Path) -> Result<RawTable, InputFormatError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(InputFormatError::NoColumns {
            path: path.to_path_buf(),
        });
    }

    let mut rows = Vec::new();
    for (line, result) in reader.records().enumerate() {
        match result {
            Ok(record) => {
                let mut row: Vec<String> = record.iter().map(str::to_string).collect();
                if row.len() > headers.len() {
                    warn!(line = line + 2, fields = row.len(), "Skipping malformed line");
                    continue;
                }
                row.resize(headers.len(), String::new());
                rows.push(row);
            }
            Err(e) => {
                warn!(line = line + 2, error = %e, "Skipping unreadable line");
            }
        }
    }

    Ok(RawTable::new(headers, rows))
}

/// Parse a JSON array of flat objects; keys become headers in first-seen order.
pub fn parse_json(text: &str, path: &Path) -> Result<RawTable, InputFormatError> {
    let value: Value = serde_json::from_str(text)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        _ => {
            return Err(InputFormatError::NotATable {
                path: path.to_path_buf(),
            })
        }
    };

    let mut headers: Vec<String> = Vec::new();
    for item in &items {
        let Value::Object(map) = item else {
            return Err(InputFormatError::NotATable {
                path: path.to_path_buf(),
            });
        };
        for key in map.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }
    if headers.is_empty() {
        return Err(InputFormatError::NoColumns {
            path: path.to_path_buf(),
        });
    }

    let rows = items
        .iter()
        .map(|item| {
            headers
                .iter()
                .map(|h| item.get(h).map(cell_to_string).unwrap_or_default())
                .collect()
        })
        .collect();

    Ok(RawTable::new(headers, rows))
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
