// src/chunk/split.rs

use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

use super::{Chunk, ChunkSink, DirSink, MemorySink};
use crate::utils::format_file_size;

/// Streams lines into budgeted parts.
///
/// Each line costs its length plus one separator. A line that would push the
/// open part past the budget closes it first, unless the part is still empty;
/// so a line larger than the budget ends up alone in its own part.
pub struct ChunkWriter<S: ChunkSink> {
    sink: S,
    max_bytes: u64,
    part: usize,
    open_records: usize,
    open_bytes: u64,
    chunks: Vec<Chunk>,
}

impl<S: ChunkSink> ChunkWriter<S> {
    pub fn new(sink: S, max_bytes: u64) -> Self {
        Self {
            sink,
            max_bytes,
            part: 0,
            open_records: 0,
            open_bytes: 0,
            chunks: Vec::new(),
        }
    }

    pub fn push_line(&mut self, line: &str) -> Result<()> {
        let cost = line.len() as u64 + 1;
        if self.open_records > 0 && self.open_bytes + cost > self.max_bytes {
            self.flush()?;
        }
        if self.open_records == 0 {
            self.part += 1;
            self.sink.begin(self.part)?;
        }
        self.sink.write_line(line)?;
        self.open_records += 1;
        self.open_bytes += cost;
        Ok(())
    }

    /// Records pushed so far, across all parts.
    pub fn records(&self) -> usize {
        self.chunks.iter().map(|c| c.records).sum::<usize>() + self.open_records
    }

    fn flush(&mut self) -> Result<()> {
        if self.open_records == 0 {
            return Ok(());
        }
        let path = self.sink.finish(self.part)?;
        info!(
            part = self.part,
            records = self.open_records,
            size = %format_file_size(self.open_bytes),
            "chunk complete"
        );
        self.chunks.push(Chunk {
            part: self.part,
            path,
            records: self.open_records,
            bytes: self.open_bytes,
        });
        self.open_records = 0;
        self.open_bytes = 0;
        Ok(())
    }

    /// Close the last part and hand back the chunks and the sink.
    pub fn finish(mut self) -> Result<(Vec<Chunk>, S)> {
        self.flush()?;
        Ok((self.chunks, self.sink))
    }
}

/// In-memory split of a line sequence.
pub fn split_lines<I, L>(lines: I, max_bytes: u64) -> Result<Vec<Vec<String>>>
where
    I: IntoIterator<Item = L>,
    L: AsRef<str>,
{
    let mut writer = ChunkWriter::new(MemorySink::default(), max_bytes);
    for line in lines {
        writer.push_line(line.as_ref())?;
    }
    let (_, sink) = writer.finish()?;
    Ok(sink.parts)
}

/// Split a JSONL file into `<stem>_part_NNN.jsonl` siblings when it is larger
/// than `max_bytes`. Blank lines are dropped. The original is removed once the
/// parts are written; a file within budget is returned as is.
#[instrument(level = "info", skip(path), fields(path = %path.display()))]
pub fn split_jsonl_file(path: &Path, max_bytes: u64) -> Result<Vec<PathBuf>> {
    let size = fs::metadata(path)
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len();
    // the last line is charged a separator like every other line
    if size < max_bytes {
        return Ok(vec![path.to_path_buf()]);
    }

    info!(
        size = %format_file_size(size),
        budget = %format_file_size(max_bytes),
        "splitting"
    );
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let base = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("no usable file stem in {}", path.display()))?;

    let reader = BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );
    let mut writer = ChunkWriter::new(DirSink::new(dir, base), max_bytes);
    for line in reader.lines() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        writer.push_line(&line)?;
    }
    let (chunks, _) = writer.finish()?;

    if let Err(e) = fs::remove_file(path) {
        warn!(error = %e, "could not remove original after split");
    }
    info!(parts = chunks.len(), "split complete");
    Ok(chunks.into_iter().map(|c| c.path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::DEFAULT_MAX_BYTES;
    use tempfile::tempdir;
    use tracing_subscriber::{fmt, EnvFilter};

    fn init_logging() {
        let _ = fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    }

    /// Counts lines per part without keeping them.
    #[derive(Default)]
    struct CountingSink {
        parts: Vec<(usize, u64)>,
    }

    impl ChunkSink for CountingSink {
        fn begin(&mut self, _part: usize) -> Result<()> {
            self.parts.push((0, 0));
            Ok(())
        }

        fn write_line(&mut self, line: &str) -> Result<()> {
            let last = self.parts.last_mut().context("no open part")?;
            last.0 += 1;
            last.1 += line.len() as u64 + 1;
            Ok(())
        }

        fn finish(&mut self, part: usize) -> Result<PathBuf> {
            Ok(PathBuf::from(format!("count_{}", part)))
        }
    }

    #[test]
    fn test_split_preserves_order_and_budget() -> Result<()> {
        let lines: Vec<String> = (0..100).map(|i| format!("{{\"n\":{}}}", i)).collect();
        let parts = split_lines(&lines, 64)?;

        let flat: Vec<String> = parts.iter().flatten().cloned().collect();
        assert_eq!(flat, lines);
        for part in &parts {
            let bytes: usize = part.iter().map(|l| l.len() + 1).sum();
            assert!(bytes <= 64, "part of {} bytes", bytes);
            assert!(!part.is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_exact_fit_stays_in_one_part() -> Result<()> {
        // 3 lines of 9 bytes + separators = 30
        let parts = split_lines(["aaaaaaaaa", "bbbbbbbbb", "ccccccccc"], 30)?;
        assert_eq!(parts.len(), 1);
        let parts = split_lines(["aaaaaaaaa", "bbbbbbbbb", "ccccccccc"], 29)?;
        assert_eq!(parts.len(), 2);
        Ok(())
    }

    #[test]
    fn test_oversized_line_is_its_own_part() -> Result<()> {
        let big = "x".repeat(50);
        let parts = split_lines(["a", big.as_str(), "b"], 10)?;
        assert_eq!(
            parts,
            vec![vec!["a".to_string()], vec![big.clone()], vec!["b".to_string()]]
        );
        Ok(())
    }

    #[test]
    fn test_empty_input_has_no_parts() -> Result<()> {
        let parts = split_lines(Vec::<String>::new(), 10)?;
        assert!(parts.is_empty());
        Ok(())
    }

    #[test]
    fn test_large_stream_needs_exactly_two_parts() -> Result<()> {
        // 250 000 × 628 bytes ≈ 150 MiB against 99 MiB
        let line = format!("{{\"payload\":\"{}\"}}", "p".repeat(614));
        assert_eq!(line.len(), 628);

        let mut writer = ChunkWriter::new(CountingSink::default(), DEFAULT_MAX_BYTES);
        for _ in 0..250_000 {
            writer.push_line(&line)?;
        }
        assert_eq!(writer.records(), 250_000);
        let (chunks, sink) = writer.finish()?;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.iter().map(|c| c.records).sum::<usize>(), 250_000);
        assert_eq!(chunks[0].part, 1);
        assert_eq!(chunks[1].part, 2);
        for (records, bytes) in &sink.parts {
            assert!(*bytes <= DEFAULT_MAX_BYTES);
            assert!(*records > 0);
        }
        Ok(())
    }

    #[test]
    fn test_split_file_within_budget_is_untouched() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("small.jsonl");
        fs::write(&path, "{\"a\":1}\n{\"a\":2}")?;
        let out = split_jsonl_file(&path, 1024)?;
        assert_eq!(out, vec![path.clone()]);
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_split_file_counts_like_the_writer() -> Result<()> {
        let dir = tempdir()?;
        // 9 bytes on disk, 10 by line cost
        let path = dir.path().join("edge.jsonl");
        fs::write(&path, "aaaa\nbbbb")?;
        assert_eq!(split_jsonl_file(&path, 10)?, vec![path.clone()]);

        let out = split_jsonl_file(&path, 9)?;
        assert_eq!(out.len(), 2);
        assert!(!path.exists());
        assert_eq!(fs::read_to_string(&out[0])?, "aaaa");
        assert_eq!(fs::read_to_string(&out[1])?, "bbbb");
        Ok(())
    }

    #[test]
    fn test_split_file_over_budget() -> Result<()> {
        init_logging();
        let dir = tempdir()?;
        let path = dir.path().join("big_001.jsonl");
        let lines: Vec<String> = (0..10).map(|i| format!("{{\"row\":{:04}}}", i)).collect();
        // blank lines are dropped
        fs::write(&path, format!("{}\n\n", lines.join("\n")))?;

        // each line is 12 bytes + 1
        let out = split_jsonl_file(&path, 40)?;
        assert!(!path.exists());
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], dir.path().join("big_001_part_001.jsonl"));
        assert_eq!(out[3], dir.path().join("big_001_part_004.jsonl"));

        let mut rebuilt = Vec::new();
        for p in &out {
            let text = fs::read_to_string(p)?;
            assert!(!text.ends_with('\n'));
            rebuilt.extend(text.lines().map(str::to_string));
        }
        assert_eq!(rebuilt, lines);
        Ok(())
    }
}
