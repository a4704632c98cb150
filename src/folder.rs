// src/folder.rs

use anyhow::{bail, Context, Result};
use glob::{glob_with, MatchOptions};
use serde::Serialize;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{error, info, instrument, warn};

use crate::chunk::{merge_jsonl_files, MergeOutcome};
use crate::config::ConvertConfig;
use crate::convert::{convert_file, relocate_source, FileOutcome};
use crate::sheet::is_workbook;
use crate::utils::compare_numbered_files;

pub const DEFAULT_OUTPUT_DIR: &str = "Output";
const TEMP_DIR: &str = ".temp";

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub source: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FolderReport {
    pub output_dir: PathBuf,
    pub converted: Vec<FileOutcome>,
    pub failed: Vec<FileFailure>,
    /// Present in merge mode once at least one workbook converted.
    pub merge: Option<MergeOutcome>,
    /// Set when the merge stage itself failed.
    pub merge_error: Option<String>,
}

impl FolderReport {
    pub fn relocation_failures(&self) -> usize {
        self.converted
            .iter()
            .filter(|o| o.relocation.is_failed())
            .count()
    }

    /// Final output files of the run. Empty when the merge failed.
    pub fn outputs(&self) -> Vec<PathBuf> {
        if self.merge_error.is_some() {
            return Vec::new();
        }
        match &self.merge {
            Some(merge) => merge.chunks.clone(),
            None => self
                .converted
                .iter()
                .flat_map(|o| o.outputs.iter().cloned())
                .collect(),
        }
    }
}

/// `.xls`/`.xlsx` files directly inside `folder`, numbered files in numeric order.
pub fn list_workbooks(folder: &Path) -> Result<Vec<PathBuf>> {
    let pattern = folder.join("*.xls*");
    let pattern = pattern
        .to_str()
        .with_context(|| format!("non UTF-8 folder path {}", folder.display()))?;
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let mut files: Vec<PathBuf> = glob_with(pattern, options)
        .with_context(|| format!("bad glob pattern {}", pattern))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file() && is_workbook(p))
        .collect();
    files.sort_by(|a, b| compare_numbered_files(a, b));
    Ok(files)
}

/// Move staged outputs into `output_dir`. Fails without moving anything when a
/// name was already produced earlier in the run.
fn publish_outputs(
    staged: &[PathBuf],
    output_dir: &Path,
    claimed: &mut HashSet<PathBuf>,
) -> Result<Vec<PathBuf>> {
    let mut targets = Vec::with_capacity(staged.len());
    for path in staged {
        let name = path
            .file_name()
            .with_context(|| format!("{} has no file name", path.display()))?;
        let target = output_dir.join(name);
        if claimed.contains(&target) {
            bail!(
                "output {} was already written by an earlier workbook",
                target.display()
            );
        }
        targets.push(target);
    }
    for (from, to) in staged.iter().zip(&targets) {
        fs::rename(from, to)
            .with_context(|| format!("moving {} → {}", from.display(), to.display()))?;
        claimed.insert(to.clone());
    }
    Ok(targets)
}

/// Convert every workbook in `folder`. A failing workbook is recorded and the
/// rest continue.
///
/// Each workbook is staged in its own directory under `<output>/.temp`, so two
/// workbooks never write the same file. Sources are moved only after their
/// output is in place.
#[instrument(level = "info", skip(folder, output, config), fields(folder = %folder.display(), merge = config.merge))]
pub fn convert_folder(
    folder: &Path,
    output: Option<&Path>,
    config: &ConvertConfig,
) -> Result<FolderReport> {
    let output_dir = match output {
        Some(dir) => dir.to_path_buf(),
        None => folder.join(DEFAULT_OUTPUT_DIR),
    };
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output dir {}", output_dir.display()))?;

    let files = list_workbooks(folder)?;
    info!(count = files.len(), out = %output_dir.display(), "workbooks found");

    let mut report = FolderReport {
        output_dir: output_dir.clone(),
        ..FolderReport::default()
    };
    if files.is_empty() {
        warn!("no .xls/.xlsx files found");
        return Ok(report);
    }

    let stage_root = output_dir.join(TEMP_DIR);
    let staging = ConvertConfig {
        move_after_convert: false,
        ..config.clone()
    };
    let mut claimed: HashSet<PathBuf> = HashSet::new();

    for (i, file) in files.iter().enumerate() {
        info!("processing {}/{}: {}", i + 1, files.len(), file.display());
        let stage_dir = stage_root.join(format!("{:03}", i + 1));
        let staged = fs::create_dir_all(&stage_dir)
            .with_context(|| format!("creating {}", stage_dir.display()))
            .and_then(|_| convert_file(file, Some(&stage_dir), &staging));

        let published = staged.and_then(|mut outcome| {
            if !config.merge {
                outcome.outputs = publish_outputs(&outcome.outputs, &output_dir, &mut claimed)?;
            }
            Ok(outcome)
        });

        match published {
            Ok(mut outcome) => {
                if !config.merge {
                    outcome.relocation = relocate_source(file, config);
                }
                report.converted.push(outcome);
            }
            Err(e) => {
                error!(file = %file.display(), "conversion failed: {:#}", e);
                report.failed.push(FileFailure {
                    source: file.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    info!(
        converted = report.converted.len(),
        failed = report.failed.len(),
        "conversion stage complete"
    );

    if config.merge {
        let produced: Vec<PathBuf> = report
            .converted
            .iter()
            .flat_map(|o| o.outputs.iter().cloned())
            .collect();
        if !produced.is_empty() {
            let merged = folder_base_name(folder).and_then(|base| {
                merge_jsonl_files(&produced, &output_dir, &base, config.max_bytes)
            });
            match merged {
                Ok(outcome) => {
                    for converted in &mut report.converted {
                        converted.relocation = relocate_source(&converted.source, config);
                    }
                    report.merge = Some(outcome);
                }
                Err(e) => {
                    error!("merge failed: {:#}", e);
                    report.merge_error = Some(format!("{:#}", e));
                }
            }
        }
    }
    if let Err(e) = fs::remove_dir_all(&stage_root) {
        warn!(dir = %stage_root.display(), error = %e, "could not remove temp dir");
    }

    let moved_failures = report.relocation_failures();
    if moved_failures > 0 {
        warn!(count = moved_failures, "some sources were not moved");
    }
    Ok(report)
}

fn folder_base_name(folder: &Path) -> Result<String> {
    let resolved = fs::canonicalize(folder)
        .with_context(|| format!("resolving {}", folder.display()))?;
    Ok(resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "merged".to_string()))
}
