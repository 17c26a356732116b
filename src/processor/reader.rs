use std::fs::File;
use std::path::Path;

use csv::{ErrorKind, ReaderBuilder};

use crate::error::{Error, Result, SchemaError};
use crate::types::{Cell, FlowBatch};

/// Reads one capture file: first record is the header, every later record
/// one flow. An empty file yields an empty batch.
pub fn read_flow_file(path: &Path) -> Result<FlowBatch> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(path, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error(path, e))?;
        // A whitespace-only line is not a flow, whatever the header width.
        if record.len() == 1 && record[0].trim().is_empty() {
            continue;
        }
        if record.len() != columns.len() {
            return Err(SchemaError::RaggedRow {
                row,
                expected: columns.len(),
                found: record.len(),
            }
            .into());
        }
        rows.push(record.iter().map(Cell::from_raw).collect());
    }

    Ok(FlowBatch::new(columns, rows))
}

fn csv_error(path: &Path, e: csv::Error) -> Error {
    let message = e.to_string();
    match e.into_kind() {
        ErrorKind::Io(io) => Error::io(path, io),
        _ => SchemaError::Unreadable(message).into(),
    }
}
