// src/chunk/merge.rs

use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

use super::{batch_name, split_jsonl_file, write_lines_atomic};
use crate::utils::format_file_size;

#[derive(Debug, Default, Clone, Serialize)]
pub struct MergeOutcome {
    /// Final files in output order.
    pub chunks: Vec<PathBuf>,
    pub total_records: usize,
    pub deleted: usize,
    pub delete_failures: usize,
}

/// Files collected for the next `<base>_NNN.jsonl`.
struct Batch {
    files: Vec<PathBuf>,
    bytes: u64,
}

impl Batch {
    fn new() -> Self {
        Self {
            files: Vec::new(),
            bytes: 0,
        }
    }
}

/// Concatenate whole source files into `<base>_NNN.jsonl` batches of at most
/// `max_bytes` (content plus one separator per file), split any batch that is
/// still too large, then delete the sources.
#[instrument(level = "info", skip(files, out_dir), fields(files = files.len(), out = %out_dir.display()))]
pub fn merge_jsonl_files(
    files: &[PathBuf],
    out_dir: &Path,
    base: &str,
    max_bytes: u64,
) -> Result<MergeOutcome> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating output dir {}", out_dir.display()))?;

    let mut outcome = MergeOutcome::default();
    let mut batch = Batch::new();
    let mut batch_index = 0usize;

    for file in files {
        let size = fs::metadata(file)
            .with_context(|| format!("reading metadata of {}", file.display()))?
            .len();
        let cost = size + 1;
        if !batch.files.is_empty() && batch.bytes + cost > max_bytes {
            batch_index += 1;
            flush_batch(&batch, out_dir, base, batch_index, max_bytes, &mut outcome)?;
            batch = Batch::new();
        }
        batch.files.push(file.clone());
        batch.bytes += cost;
    }
    if !batch.files.is_empty() {
        batch_index += 1;
        flush_batch(&batch, out_dir, base, batch_index, max_bytes, &mut outcome)?;
    }

    for file in files {
        match fs::remove_file(file) {
            Ok(()) => outcome.deleted += 1,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "could not delete merged source");
                outcome.delete_failures += 1;
            }
        }
    }

    info!(
        batches = batch_index,
        chunks = outcome.chunks.len(),
        records = outcome.total_records,
        deleted = outcome.deleted,
        "merge complete"
    );
    Ok(outcome)
}

fn flush_batch(
    batch: &Batch,
    out_dir: &Path,
    base: &str,
    index: usize,
    max_bytes: u64,
    outcome: &mut MergeOutcome,
) -> Result<()> {
    let path = out_dir.join(batch_name(base, index));
    let lines = read_nonblank_lines(&batch.files)?;
    let records = write_lines_atomic(&path, lines.iter().map(String::as_str))?;
    info!(
        batch = index,
        files = batch.files.len(),
        records,
        size = %format_file_size(batch.bytes),
        "batch written"
    );
    outcome.total_records += records;
    outcome.chunks.extend(split_jsonl_file(&path, max_bytes)?);
    Ok(())
}

fn read_nonblank_lines(files: &[PathBuf]) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for file in files {
        let reader = BufReader::new(
            File::open(file).with_context(|| format!("opening {}", file.display()))?,
        );
        for line in reader.lines() {
            let line = line.with_context(|| format!("reading {}", file.display()))?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
    }
    Ok(lines)
}
