// src/config.rs

use chrono::Datelike;
use std::path::{Path, PathBuf};

use crate::chunk::DEFAULT_MAX_BYTES;
use crate::normalize::TemporalOptions;

pub const DEFAULT_PROCESSED_DIR: &str = "Done - Input";

/// Settings shared by file and folder conversion.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Byte budget per output file.
    pub max_bytes: u64,
    /// Where converted workbooks are moved. A relative path is taken from the
    /// workbook's own directory.
    pub processed_dir: PathBuf,
    pub move_after_convert: bool,
    /// Folder mode only: merge per-workbook output into `<folder>_NNN.jsonl`.
    pub merge: bool,
    pub temporal: TemporalOptions,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            processed_dir: PathBuf::from(DEFAULT_PROCESSED_DIR),
            move_after_convert: true,
            merge: true,
            temporal: TemporalOptions::new(current_year()),
        }
    }
}

impl ConvertConfig {
    pub fn processed_dir_for(&self, source: &Path) -> PathBuf {
        if self.processed_dir.is_absolute() {
            return self.processed_dir.clone();
        }
        source
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.processed_dir)
    }
}

/// Local calendar year; only read when no reference year is given.
pub fn current_year() -> i32 {
    chrono::Local::now().year()
}
