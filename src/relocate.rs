// src/relocate.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// What happened to a source workbook after conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum Relocation {
    Moved(PathBuf),
    Skipped,
    Failed(String),
}

impl Relocation {
    pub fn is_failed(&self) -> bool {
        matches!(self, Relocation::Failed(_))
    }
}

/// `<stem>_<YYYY-MM-DDTHH-MM-SS-mmmZ><.ext>`
fn timestamped_name(file_name: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = now.format("%Y-%m-%dT%H-%M-%S-%3fZ");
    match file_name.extension() {
        Some(ext) => PathBuf::from(format!("{}_{}.{}", stem, stamp, ext.to_string_lossy())),
        None => PathBuf::from(format!("{}_{}", stem, stamp)),
    }
}

/// Move `source` into `processed_dir`, creating the directory when needed.
/// An existing file of the same name is kept; the moved file gets a UTC
/// timestamp suffix instead.
#[instrument(level = "debug", skip(source, processed_dir), fields(source = %source.display()))]
pub fn relocate(source: &Path, processed_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(processed_dir)
        .with_context(|| format!("creating {}", processed_dir.display()))?;
    let file_name = source
        .file_name()
        .with_context(|| format!("{} has no file name", source.display()))?;

    let mut destination = processed_dir.join(file_name);
    if destination.exists() {
        destination = processed_dir.join(timestamped_name(Path::new(file_name), Utc::now()));
    }
    fs::rename(source, &destination).with_context(|| {
        format!("moving {} → {}", source.display(), destination.display())
    })?;
    info!(to = %destination.display(), "source moved");
    Ok(destination)
}
