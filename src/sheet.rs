// src/sheet.rs

use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::normalize::{temporal::serial_to_datetime, RawCell};

pub const EMPTY_HEADER: &str = "__EMPTY";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("unsupported file type {0:?}, expected .xls or .xlsx")]
    UnsupportedExtension(String),
    #[error("cannot read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("worksheet {0:?} has no header row")]
    NoHeaderRow(String),
}

/// First worksheet of a workbook: the header row and the non-empty rows below it.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<RawCell>>,
}

/// True for `.xls`/`.xlsx` in any letter case.
pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("xls") || e.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false)
}

#[instrument(level = "debug", skip(path), fields(path = %path.display()))]
pub fn read_first_sheet(path: &Path) -> Result<Sheet, SheetError> {
    if !is_workbook(path) {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(SheetError::UnsupportedExtension(ext));
    }

    let mut workbook = open_workbook_auto(path)?;
    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(SheetError::NoWorksheet)?;
    let range = workbook.worksheet_range(&name)?;

    let mut rows = range.rows();
    let header_row = rows
        .next()
        .ok_or_else(|| SheetError::NoHeaderRow(name.clone()))?;
    let headers = label_headers(header_row);

    let rows: Vec<Vec<RawCell>> = rows
        .map(|row| row.iter().map(to_raw_cell).collect::<Vec<_>>())
        .filter(|cells| !cells.iter().all(is_blank))
        .collect();

    debug!(sheet = %name, columns = headers.len(), rows = rows.len(), "sheet read");
    Ok(Sheet {
        name,
        headers,
        rows,
    })
}

/// Header labels as text. Blank labels become `__EMPTY`; repeats get `_1`,
/// `_2`, ... in order of appearance.
pub fn label_headers(row: &[Data]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    row.iter()
        .map(|cell| {
            let text = match cell {
                Data::Empty => String::new(),
                other => other.to_string().trim().to_string(),
            };
            let base = if text.is_empty() {
                EMPTY_HEADER.to_string()
            } else {
                text
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let label = if *count == 0 {
                base
            } else {
                format!("{}_{}", base, count)
            };
            *count += 1;
            label
        })
        .collect()
}

pub fn to_raw_cell(cell: &Data) -> RawCell {
    match cell {
        Data::Empty => RawCell::Empty,
        Data::String(s) => RawCell::String(s.clone()),
        Data::Float(f) => RawCell::Number(*f),
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Bool(b) => RawCell::Bool(*b),
        Data::DateTime(dt) => match serial_to_datetime(dt.as_f64()) {
            Some(instant) => RawCell::Instant(instant),
            None => RawCell::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => RawCell::String(s.clone()),
        Data::Error(e) => RawCell::String(e.to_string()),
    }
}

fn is_blank(cell: &RawCell) -> bool {
    match cell {
        RawCell::Empty => true,
        RawCell::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
