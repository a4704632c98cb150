// src/normalize/mod.rs

pub mod currency;
pub mod header;
pub mod temporal;

use std::fmt;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub use currency::CurrencyParser;
pub use header::sanitize_header;
pub use temporal::{DayMonthOrder, Granularity, TemporalOptions, TemporalParser};

/// Whole floats below this are written without a fraction.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// One cell as delivered by the sheet reader.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    String(String),
    Number(f64),
    Bool(bool),
    Instant(NaiveDateTime),
}

impl fmt::Display for RawCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawCell::Empty => Ok(()),
            RawCell::String(s) => f.write_str(s),
            RawCell::Number(n) => write!(f, "{}", n),
            RawCell::Bool(b) => write!(f, "{}", b),
            RawCell::Instant(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
        }
    }
}

impl Serialize for RawCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RawCell::Empty => serializer.serialize_none(),
            RawCell::String(s) => serializer.serialize_str(s),
            // NaN and infinities have no JSON form
            RawCell::Number(n) if !n.is_finite() => serializer.serialize_none(),
            RawCell::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => {
                serializer.serialize_i64(*n as i64)
            }
            RawCell::Number(n) => serializer.serialize_f64(*n),
            RawCell::Bool(b) => serializer.serialize_bool(*b),
            RawCell::Instant(_) => serializer.collect_str(self),
        }
    }
}

/// A cell after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedValue {
    Null,
    Currency(f64),
    Temporal(String),
    Original(RawCell),
}

impl Serialize for NormalizedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NormalizedValue::Null => serializer.serialize_none(),
            NormalizedValue::Currency(v) => serializer.serialize_f64(*v),
            NormalizedValue::Temporal(s) => serializer.serialize_str(s),
            NormalizedValue::Original(cell) => cell.serialize(serializer),
        }
    }
}

/// Result of running one parser against one value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    /// The value is not of this parser's kind.
    NotApplicable,
    /// The value looked like this parser's kind but could not be read.
    Malformed(String),
}

impl<T> ParseOutcome<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ParseOutcome<U> {
        match self {
            ParseOutcome::Parsed(v) => ParseOutcome::Parsed(f(v)),
            ParseOutcome::NotApplicable => ParseOutcome::NotApplicable,
            ParseOutcome::Malformed(reason) => ParseOutcome::Malformed(reason),
        }
    }
}

/// A stage of the per-field pipeline.
pub trait FieldParser {
    fn kind(&self) -> WarningKind;
    fn parse(&self, cell: &RawCell) -> ParseOutcome<NormalizedValue>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningKind {
    Currency,
    Temporal,
    Row,
}

/// A field or row that was kept in its original form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldWarning {
    /// 1-based data row, not counting the header row.
    pub row: usize,
    pub column: Option<String>,
    pub value: Option<String>,
    pub kind: WarningKind,
    pub reason: String,
}

/// Ordered column → value mapping.
///
/// Inserting an existing key overwrites the value and keeps the key where it
/// was first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, NormalizedValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(columns: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity(columns),
        }
    }

    pub fn insert(&mut self, key: String, value: NormalizedValue) {
        self.fields.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&NormalizedValue> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NormalizedValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<Record>,
    pub warnings: Vec<FieldWarning>,
}

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("row {row} has {cells} cells but only {headers} headers")]
    RaggedRow {
        row: usize,
        cells: usize,
        headers: usize,
    },
}

const NULL_MARKERS: &[&str] = &["--", "—", "−"];

fn is_null(cell: &RawCell) -> bool {
    match cell {
        RawCell::Empty => true,
        RawCell::String(s) => {
            let t = s.trim();
            t.is_empty() || NULL_MARKERS.contains(&t)
        }
        _ => false,
    }
}

/// Runs every cell through null coercion, then the parser pipeline, and keeps
/// the original value when no parser claims it.
pub struct RecordNormalizer {
    parsers: Vec<Box<dyn FieldParser>>,
}

impl RecordNormalizer {
    pub fn new(temporal: TemporalOptions) -> Self {
        Self {
            parsers: vec![
                Box::new(CurrencyParser::new()),
                Box::new(TemporalParser::new(temporal)),
            ],
        }
    }

    /// Build with a custom pipeline; parsers run in the given order.
    pub fn with_parsers(parsers: Vec<Box<dyn FieldParser>>) -> Self {
        Self { parsers }
    }

    pub fn normalize_value(
        &self,
        cell: &RawCell,
        row: usize,
        column: &str,
        warnings: &mut Vec<FieldWarning>,
    ) -> NormalizedValue {
        if is_null(cell) {
            return NormalizedValue::Null;
        }
        for parser in &self.parsers {
            match parser.parse(cell) {
                ParseOutcome::Parsed(v) => return v,
                ParseOutcome::NotApplicable => {}
                ParseOutcome::Malformed(reason) => {
                    debug!(row, column, %reason, "field kept as original");
                    warnings.push(FieldWarning {
                        row,
                        column: Some(column.to_string()),
                        value: Some(cell.to_string()),
                        kind: parser.kind(),
                        reason,
                    });
                    // a temporal value that fails is final
                    if parser.kind() == WarningKind::Temporal {
                        return NormalizedValue::Original(cell.clone());
                    }
                }
            }
        }
        NormalizedValue::Original(cell.clone())
    }

    /// Normalize one row. `headers` are already sanitized; short rows are
    /// padded with empty cells.
    pub fn normalize_row(
        &self,
        headers: &[String],
        cells: &[RawCell],
        row: usize,
    ) -> Result<(Record, Vec<FieldWarning>), NormalizeError> {
        if cells.len() > headers.len() {
            return Err(NormalizeError::RaggedRow {
                row,
                cells: cells.len(),
                headers: headers.len(),
            });
        }
        let mut record = Record::with_capacity(headers.len());
        let mut warnings = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            let cell = cells.get(i).unwrap_or(&RawCell::Empty);
            let value = self.normalize_value(cell, row, header, &mut warnings);
            record.insert(header.clone(), value);
        }
        Ok((record, warnings))
    }

    /// Row fallback: sanitized headers with the original values, extra
    /// cells dropped.
    pub fn degrade_row(&self, headers: &[String], cells: &[RawCell]) -> Record {
        let mut record = Record::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            let value = match cells.get(i) {
                Some(cell) => NormalizedValue::Original(cell.clone()),
                None => NormalizedValue::Null,
            };
            record.insert(header.clone(), value);
        }
        record
    }

    /// Normalize a full sheet. Headers are sanitized here.
    pub fn normalize_sheet(&self, headers: &[String], rows: &[Vec<RawCell>]) -> NormalizedBatch {
        let keys: Vec<String> = headers.iter().map(|h| sanitize_header(h)).collect();
        let mut batch = NormalizedBatch {
            records: Vec::with_capacity(rows.len()),
            warnings: Vec::new(),
        };
        for (i, cells) in rows.iter().enumerate() {
            let (record, warnings) = self.normalize_record(&keys, cells, i + 1);
            batch.records.push(record);
            batch.warnings.extend(warnings);
        }
        batch
    }

    /// One row with the row-level fallback applied. Used by both the batch and
    /// the streaming paths.
    pub fn normalize_record(
        &self,
        keys: &[String],
        cells: &[RawCell],
        row: usize,
    ) -> (Record, Vec<FieldWarning>) {
        match self.normalize_row(keys, cells, row) {
            Ok(done) => done,
            Err(e) => {
                warn!(row, error = %e, "row kept with original values");
                let warning = FieldWarning {
                    row,
                    column: None,
                    value: None,
                    kind: WarningKind::Row,
                    reason: e.to_string(),
                };
                (self.degrade_row(keys, cells), vec![warning])
            }
        }
    }
}
