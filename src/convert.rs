// src/convert.rs

use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{info, instrument, warn};

use crate::chunk::{write_lines_atomic, ChunkWriter, DirSink};
use crate::config::ConvertConfig;
use crate::normalize::{sanitize_header, FieldWarning, RecordNormalizer};
use crate::relocate::{relocate, Relocation};
use crate::sheet::read_first_sheet;

/// Result of converting one workbook.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub source: PathBuf,
    /// Written files in part order.
    pub outputs: Vec<PathBuf>,
    pub records: usize,
    pub warnings: Vec<FieldWarning>,
    pub relocation: Relocation,
}

fn input_stem(input: &Path) -> Result<String> {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", input.display()))
}

/// Where a single workbook's records go.
///
/// - no output: `./output/<stem>.jsonl` when `./output` is a directory,
///   otherwise next to the input
/// - an existing directory: `<dir>/<stem>.jsonl`
/// - a path without a `.jsonl`/`.json` extension: created as a directory
/// - anything else is the file path itself
pub fn resolve_output_path(input: &Path, output: Option<&Path>) -> Result<PathBuf> {
    let file_name = format!("{}.jsonl", input_stem(input)?);
    let Some(output) = output else {
        let cwd_output = std::env::current_dir()
            .context("reading current directory")?
            .join("output");
        if cwd_output.is_dir() {
            return Ok(cwd_output.join(file_name));
        }
        let dir = input.parent().unwrap_or_else(|| Path::new("."));
        return Ok(dir.join(file_name));
    };

    if output.is_dir() {
        return Ok(output.join(file_name));
    }
    let has_jsonl_ext = output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "jsonl" || e == "json")
        .unwrap_or(false);
    if !has_jsonl_ext {
        fs::create_dir_all(output)
            .with_context(|| format!("creating output dir {}", output.display()))?;
        return Ok(output.join(file_name));
    }
    Ok(output.to_path_buf())
}

/// Move a converted workbook out of the way when enabled. Failure is reported,
/// not raised.
pub fn relocate_source(input: &Path, config: &ConvertConfig) -> Relocation {
    if !config.move_after_convert {
        return Relocation::Skipped;
    }
    match relocate(input, &config.processed_dir_for(input)) {
        Ok(path) => Relocation::Moved(path),
        Err(e) => {
            let reason = format!("{:#}", e);
            warn!(error = %reason, "source not moved");
            Relocation::Failed(reason)
        }
    }
}

/// Read, normalize and chunk one workbook, then move it to the processed
/// directory when enabled.
#[instrument(level = "info", skip(input, output, config), fields(input = %input.display()))]
pub fn convert_file(
    input: &Path,
    output: Option<&Path>,
    config: &ConvertConfig,
) -> Result<FileOutcome> {
    let start = Instant::now();
    let output_path = resolve_output_path(input, output)?;
    let out_dir = output_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output dir {}", out_dir.display()))?;
    let base = input_stem(&output_path)?;

    let sheet = read_first_sheet(input)
        .with_context(|| format!("reading workbook {}", input.display()))?;
    info!(sheet = %sheet.name, rows = sheet.rows.len(), "processing rows");

    let normalizer = RecordNormalizer::new(config.temporal);
    let keys: Vec<String> = sheet.headers.iter().map(|h| sanitize_header(h)).collect();
    let mut writer = ChunkWriter::new(DirSink::new(&out_dir, base.as_str()), config.max_bytes);
    let mut warnings = Vec::new();

    for (i, cells) in sheet.rows.iter().enumerate() {
        let (record, row_warnings) = normalizer.normalize_record(&keys, cells, i + 1);
        let line = record
            .to_json_line()
            .with_context(|| format!("serializing row {}", i + 1))?;
        writer.push_line(&line)?;
        warnings.extend(row_warnings);
    }
    let records = writer.records();
    let (chunks, _) = writer.finish()?;

    let outputs = match chunks.len() {
        0 => {
            write_lines_atomic(&output_path, std::iter::empty())?;
            vec![output_path]
        }
        1 => {
            fs::rename(&chunks[0].path, &output_path).with_context(|| {
                format!(
                    "renaming {} → {}",
                    chunks[0].path.display(),
                    output_path.display()
                )
            })?;
            vec![output_path]
        }
        n => {
            info!(parts = n, "output split");
            chunks.into_iter().map(|c| c.path).collect()
        }
    };

    if !warnings.is_empty() {
        warn!(count = warnings.len(), "some values were kept as original");
    }
    info!(
        records,
        files = outputs.len(),
        "converted in {:?}",
        start.elapsed()
    );

    let relocation = relocate_source(input, config);

    Ok(FileOutcome {
        source: input.to_path_buf(),
        outputs,
        records,
        warnings,
        relocation,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::normalize::{TemporalOptions, WarningKind};
    use rust_xlsxwriter::Workbook;
    use tempfile::tempdir;

    /// Write a one-sheet workbook of text cells; the first row is the header.
    pub(crate) fn write_fixture(path: &Path, rows: &[&[&str]]) -> Result<()> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                sheet.write_string(r as u32, c as u16, *value)?;
            }
        }
        workbook.save(path)?;
        Ok(())
    }

    pub(crate) fn test_config(processed: &Path) -> ConvertConfig {
        ConvertConfig {
            processed_dir: processed.to_path_buf(),
            temporal: TemporalOptions::new(2025),
            ..ConvertConfig::default()
        }
    }

    #[test]
    fn test_resolve_output_path() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("in").join("sales.xlsx");

        let existing = dir.path().join("existing");
        fs::create_dir_all(&existing)?;
        assert_eq!(
            resolve_output_path(&input, Some(&existing))?,
            existing.join("sales.jsonl")
        );

        let fresh = dir.path().join("fresh");
        assert_eq!(
            resolve_output_path(&input, Some(&fresh))?,
            fresh.join("sales.jsonl")
        );
        assert!(fresh.is_dir());

        let explicit = dir.path().join("custom.json");
        assert_eq!(resolve_output_path(&input, Some(&explicit))?, explicit);
        assert!(!explicit.exists());
        Ok(())
    }

    #[test]
    fn test_convert_file_end_to_end() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("Laporan.xlsx");
        write_fixture(
            &input,
            &[
                &["Tanggal Transaksi", "Amount (Rp)", "Keterangan"],
                &["01/15/25", "(Rp1,234.00)", "Invoice 7"],
                &["01 Agu 2025 23:51", "--", "13/14/2025"],
            ],
        )?;
        let out = dir.path().join("out");
        let done = dir.path().join("done");

        let outcome = convert_file(&input, Some(&out), &test_config(&done))?;
        assert_eq!(outcome.records, 2);
        assert_eq!(outcome.outputs, vec![out.join("Laporan.jsonl")]);
        assert_eq!(
            fs::read_to_string(&outcome.outputs[0])?,
            concat!(
                r#"{"tanggal_transaksi":"2025-01-15","amount_rp":-1234.0,"keterangan":"Invoice 7"}"#,
                "\n",
                r#"{"tanggal_transaksi":"2025-08-01 23:51:00","amount_rp":null,"keterangan":"13/14/2025"}"#
            )
        );
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, WarningKind::Temporal);
        assert_eq!(outcome.relocation, Relocation::Moved(done.join("Laporan.xlsx")));
        assert!(!input.exists());
        Ok(())
    }

    #[test]
    fn test_convert_file_splits_over_budget() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("big.xlsx");
        let mut rows: Vec<Vec<String>> = vec![vec!["Name".into()]];
        rows.extend((0..20).map(|i| vec![format!("row-{:02}", i)]));
        let row_refs: Vec<Vec<&str>> = rows
            .iter()
            .map(|r| r.iter().map(String::as_str).collect())
            .collect();
        let slices: Vec<&[&str]> = row_refs.iter().map(Vec::as_slice).collect();
        write_fixture(&input, &slices)?;

        let out = dir.path().join("out");
        let config = ConvertConfig {
            // {"name":"row-00"} is 17 bytes; 4 lines per part
            max_bytes: 72,
            move_after_convert: false,
            ..test_config(dir.path())
        };
        let outcome = convert_file(&input, Some(&out), &config)?;
        assert_eq!(outcome.records, 20);
        assert_eq!(outcome.outputs.len(), 5);
        assert_eq!(outcome.outputs[0], out.join("big_part_001.jsonl"));
        assert_eq!(outcome.relocation, Relocation::Skipped);
        assert!(input.exists());

        let mut total = 0;
        for path in &outcome.outputs {
            total += fs::read_to_string(path)?.lines().count();
        }
        assert_eq!(total, 20);
        Ok(())
    }

    #[test]
    fn test_header_only_sheet_writes_empty_file() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("empty.xlsx");
        write_fixture(&input, &[&["A", "B"]])?;
        let config = ConvertConfig {
            move_after_convert: false,
            ..test_config(dir.path())
        };
        let outcome = convert_file(&input, Some(&dir.path().join("out")), &config)?;
        assert_eq!(outcome.records, 0);
        assert_eq!(fs::read_to_string(&outcome.outputs[0])?, "");
        Ok(())
    }

    #[test]
    fn test_relocation_failure_keeps_outputs() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("kept.xlsx");
        write_fixture(&input, &[&["A"], &["x"]])?;
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory")?;

        let out = dir.path().join("out");
        let outcome = convert_file(&input, Some(&out), &test_config(&blocker.join("done")))?;
        assert!(matches!(outcome.relocation, Relocation::Failed(_)));
        assert_eq!(outcome.outputs, vec![out.join("kept.jsonl")]);
        assert_eq!(fs::read_to_string(&outcome.outputs[0])?, "{\"a\":\"x\"}");
        assert!(input.exists());
        Ok(())
    }

    #[test]
    fn test_missing_workbook_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        assert!(convert_file(&dir.path().join("nope.xlsx"), Some(dir.path()), &config).is_err());
    }
}
