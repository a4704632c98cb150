use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use xls2jsonl::{
    chunk::DEFAULT_MAX_BYTES,
    config::{current_year, DEFAULT_PROCESSED_DIR},
    convert_file, convert_folder,
    normalize::{DayMonthOrder, TemporalOptions},
    relocate::Relocation,
    sheet::is_workbook,
    utils::format_file_size,
    ConvertConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "xls2jsonl",
    version,
    about = "Convert .xls/.xlsx workbooks to size-bounded JSON Lines files"
)]
struct Args {
    /// Workbook or folder of workbooks
    input: PathBuf,

    /// Output file or directory (folder default: <INPUT>/Output)
    output: Option<PathBuf>,

    /// Folder mode: keep one output per workbook instead of merging
    #[arg(long)]
    no_merge: bool,

    /// Leave converted workbooks where they are
    #[arg(long)]
    no_move: bool,

    /// Byte budget per output file
    #[arg(long, env = "XLS2JSONL_MAX_BYTES", default_value_t = DEFAULT_MAX_BYTES)]
    max_bytes: u64,

    /// Where converted workbooks are moved; relative to each workbook's folder
    #[arg(long, env = "XLS2JSONL_PROCESSED_DIR", default_value = DEFAULT_PROCESSED_DIR)]
    processed_dir: PathBuf,

    /// Year used to expand two-digit years (default: current year)
    #[arg(long, env = "XLS2JSONL_REFERENCE_YEAR")]
    reference_year: Option<i32>,

    /// Read ambiguous a/b/yyyy dates as day/month
    #[arg(long)]
    day_first: bool,

    /// Keep plain numbers instead of reading them as spreadsheet dates
    #[arg(long)]
    keep_numbers: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json_summary: bool,
}

impl Args {
    fn config(&self) -> ConvertConfig {
        let order = if self.day_first {
            DayMonthOrder::DayFirst
        } else {
            DayMonthOrder::MonthFirst
        };
        ConvertConfig {
            max_bytes: self.max_bytes,
            processed_dir: self.processed_dir.clone(),
            move_after_convert: !self.no_move,
            merge: !self.no_merge,
            temporal: TemporalOptions::new(self.reference_year.unwrap_or_else(current_year))
                .with_order(order)
                .with_numeric_serials(!self.keep_numbers),
        }
    }
}

fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config();

    if !args.input.exists() {
        bail!("input path does not exist: {}", args.input.display());
    }
    info!(
        input = %args.input.display(),
        budget = %format_file_size(config.max_bytes),
        reference_year = config.temporal.reference_year,
        "startup"
    );

    if args.input.is_dir() {
        let report = convert_folder(&args.input, args.output.as_deref(), &config)
            .with_context(|| format!("converting folder {}", args.input.display()))?;
        info!(
            converted = report.converted.len(),
            failed = report.failed.len(),
            outputs = report.outputs().len(),
            "folder done"
        );
        if let Some(merge) = &report.merge {
            info!(
                records = merge.total_records,
                chunks = merge.chunks.len(),
                delete_failures = merge.delete_failures,
                "merged"
            );
        }
        for failure in &report.failed {
            warn!(source = %failure.source.display(), "failed: {}", failure.error);
        }
        if args.json_summary {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        if let Some(reason) = &report.merge_error {
            bail!("merge failed: {}", reason);
        }
        return Ok(());
    }

    if !is_workbook(&args.input) {
        bail!(
            "unsupported input {}: expected an .xls or .xlsx file",
            args.input.display()
        );
    }
    let outcome = convert_file(&args.input, args.output.as_deref(), &config)?;
    for path in &outcome.outputs {
        info!("wrote {}", path.display());
    }
    match &outcome.relocation {
        Relocation::Moved(to) => info!("moved source to {}", to.display()),
        Relocation::Skipped => {}
        Relocation::Failed(reason) => warn!("source not moved: {}", reason),
    }
    if args.json_summary {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Ok(())
}
