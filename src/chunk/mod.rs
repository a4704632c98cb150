// src/chunk/mod.rs

pub mod merge;
pub mod split;

use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

pub use merge::{merge_jsonl_files, MergeOutcome};
pub use split::{split_jsonl_file, split_lines, ChunkWriter};

/// Default per-file budget: 99 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 99 * 1024 * 1024;

/// One finished output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub part: usize,
    pub path: PathBuf,
    pub records: usize,
    /// Accounted size: every line plus one separator.
    pub bytes: u64,
}

/// `<base>_part_NNN.jsonl`
pub fn part_name(base: &str, part: usize) -> String {
    format!("{}_part_{:03}.jsonl", base, part)
}

/// `<base>_NNN.jsonl`
pub fn batch_name(base: &str, batch: usize) -> String {
    format!("{}_{:03}.jsonl", base, batch)
}

/// Receives the lines of one part at a time.
pub trait ChunkSink {
    fn begin(&mut self, part: usize) -> Result<()>;
    fn write_line(&mut self, line: &str) -> Result<()>;
    fn finish(&mut self, part: usize) -> Result<PathBuf>;
}

struct OpenPart {
    tmp_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    empty: bool,
}

/// Writes `<base>_part_NNN.jsonl` files into a directory. Each part goes to a
/// `.tmp` file first and is renamed once complete.
pub struct DirSink {
    dir: PathBuf,
    base: String,
    open: Option<OpenPart>,
}

impl DirSink {
    pub fn new(dir: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base: base.into(),
            open: None,
        }
    }
}

impl ChunkSink for DirSink {
    fn begin(&mut self, part: usize) -> Result<()> {
        let final_path = self.dir.join(part_name(&self.base, part));
        let tmp_path = final_path.with_extension("jsonl.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        self.open = Some(OpenPart {
            tmp_path,
            final_path,
            writer: BufWriter::new(file),
            empty: true,
        });
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let open = self
            .open
            .as_mut()
            .context("write_line called without an open part")?;
        if !open.empty {
            open.writer.write_all(b"\n")?;
        }
        open.writer
            .write_all(line.as_bytes())
            .with_context(|| format!("writing {}", open.tmp_path.display()))?;
        open.empty = false;
        Ok(())
    }

    fn finish(&mut self, part: usize) -> Result<PathBuf> {
        let OpenPart {
            tmp_path,
            final_path,
            mut writer,
            ..
        } = self
            .open
            .take()
            .with_context(|| format!("finish called for part {} without an open part", part))?;
        writer
            .flush()
            .with_context(|| format!("flushing {}", tmp_path.display()))?;
        drop(writer);
        fs::rename(&tmp_path, &final_path).with_context(|| {
            format!("renaming {} → {}", tmp_path.display(), final_path.display())
        })?;
        debug!(part, path = %final_path.display(), "part written");
        Ok(final_path)
    }
}

/// Keeps parts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub parts: Vec<Vec<String>>,
}

impl ChunkSink for MemorySink {
    fn begin(&mut self, _part: usize) -> Result<()> {
        self.parts.push(Vec::new());
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.parts
            .last_mut()
            .context("write_line called without an open part")?
            .push(line.to_string());
        Ok(())
    }

    fn finish(&mut self, part: usize) -> Result<PathBuf> {
        Ok(PathBuf::from(part_name("memory", part)))
    }
}

/// Write `lines` joined by `\n` (no trailing newline) through a `.tmp` file.
pub(crate) fn write_lines_atomic<'a, I>(path: &Path, lines: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let tmp_path = path.with_extension("jsonl.tmp");
    let file =
        File::create(&tmp_path).with_context(|| format!("creating {}", tmp_path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0usize;
    for line in lines {
        if count > 0 {
            writer.write_all(b"\n")?;
        }
        writer.write_all(line.as_bytes())?;
        count += 1;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", tmp_path.display()))?;
    drop(writer);
    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} → {}", tmp_path.display(), path.display()))?;
    Ok(count)
}
