//! Workbook reading and sheet normalization.
//!
//! Source workbooks follow a fixed layout: row 1 is a human-facing title,
//! row 2 is the header row, data starts at row 3. Normalization trims the
//! sheet down to the insert column set (sequence columns removed), applies
//! null sentinels and per-column defaults, and validates that every column
//! the configuration relies on is present in the header.

use crate::config::SheetMapping;
use crate::models::{RowRecord, SheetUnit, Value};
use calamine::{Data, Reader, open_workbook_auto};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Raw grid of one sheet, cells already converted to [`Value`]s but with no
/// header interpretation applied yet.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("sheet '{sheet}' lacks a second-row header")]
    MissingHeader { sheet: String },
    #[error("sheet '{sheet}' missing columns: {columns:?}")]
    MissingColumns { sheet: String, columns: Vec<String> },
}

/// Read every sheet of a workbook in workbook order.
pub fn read_workbook(path: &Path) -> Result<Vec<RawSheet>, calamine::Error> {
    let mut workbook = open_workbook_auto(path)?;
    let names = workbook.sheet_names().to_vec();

    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook.worksheet_range(&name)?;
        // Ranges are anchored at the first used cell; pad back to absolute
        // A1 coordinates so the fixed header-row convention holds.
        let (start_row, start_col) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut rows: Vec<Vec<Value>> = vec![Vec::new(); start_row];
        for row in range.rows() {
            let mut cells = vec![Value::Null; start_col];
            cells.extend(row.iter().map(convert_cell));
            rows.push(cells);
        }
        sheets.push(RawSheet { name, rows });
    }
    Ok(sheets)
}

/// Header cells from the fixed second row, trimmed, with trailing empties
/// dropped. `None` when the sheet has fewer than two rows.
pub fn header_row(raw: &RawSheet) -> Option<Vec<String>> {
    let header = raw.rows.get(1)?;
    let mut cells: Vec<String> = header
        .iter()
        .map(|v| v.correlation_key().trim().to_string())
        .collect();
    while cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    Some(cells)
}

/// Normalize one raw sheet against its mapping.
///
/// `required_columns` is the configuration-derived set of columns that must
/// exist in the header (foreign-key slots and correlation columns); a miss
/// is file-fatal at the caller.
pub fn normalize_sheet(
    raw: &RawSheet,
    mapping: &SheetMapping,
    required_columns: &HashSet<String>,
) -> Result<SheetUnit, NormalizeError> {
    let header = header_row(raw).ok_or_else(|| NormalizeError::MissingHeader {
        sheet: raw.name.clone(),
    })?;
    if header.is_empty() {
        return Err(NormalizeError::MissingHeader {
            sheet: raw.name.clone(),
        });
    }

    let present: HashSet<&str> = header.iter().map(String::as_str).collect();
    let mut missing: Vec<String> = required_columns
        .iter()
        .filter(|c| !present.contains(c.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(NormalizeError::MissingColumns {
            sheet: raw.name.clone(),
            columns: missing,
        });
    }

    // Insert columns keep header order; sequence columns and unnamed
    // header cells are dropped.
    let insert_indices: Vec<(usize, &String)> = header
        .iter()
        .enumerate()
        .filter(|(_, name)| !name.is_empty() && !mapping.sequence_columns.contains(*name))
        .map(|(idx, name)| (idx, name))
        .collect();
    let insert_columns: Vec<String> = insert_indices
        .iter()
        .map(|(_, name)| (*name).clone())
        .collect();

    let mut rows = Vec::new();
    for (idx0, raw_row) in raw.rows.iter().enumerate().skip(2) {
        if raw_row.iter().all(Value::is_null) {
            continue;
        }
        let position = (idx0 + 1) as i64;
        let columns = insert_indices
            .iter()
            .map(|(col_idx, name)| {
                let cell = raw_row.get(*col_idx).unwrap_or(&Value::Null);
                ((*name).clone(), normalize_cell(cell, name, mapping))
            })
            .collect();
        rows.push(RowRecord::new(position, columns));
    }

    Ok(SheetUnit {
        sheet_name: raw.name.clone(),
        table_name: mapping.table.clone(),
        insert_columns,
        rows,
        inserted_rows: 0,
    })
}

fn normalize_cell(cell: &Value, column: &str, mapping: &SheetMapping) -> Value {
    match cell {
        Value::Null => mapping
            .defaults
            .get(column)
            .cloned()
            .unwrap_or(Value::Null),
        Value::Text(s) => {
            let trimmed = s.trim();
            if mapping.null_sentinels.contains(trimmed) {
                return Value::Null;
            }
            if trimmed.is_empty() {
                if let Some(default) = mapping.defaults.get(column) {
                    return default.clone();
                }
            }
            cell.clone()
        }
        other => other.clone(),
    }
}

fn convert_cell(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::Int(i) => Value::Integer(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) => Value::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(
                naive,
                Utc,
            )),
            None => Value::Null,
        },
        Data::DateTimeIso(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => Value::Timestamp(ts.with_timezone(&Utc)),
            Err(_) => Value::Text(s.clone()),
        },
        Data::DurationIso(s) => Value::Text(s.clone()),
        // Formula error cells import as NULL, matching how empty cells load.
        Data::Error(_) => Value::Null,
    }
}
