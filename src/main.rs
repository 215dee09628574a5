use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use splitmask::annotate::RepeatMaskerInvoker;
use splitmask::chunker::ChunkParams;
use splitmask::mask::MaskPolicy;
use splitmask::{Pipeline, PipelineError, RunConfig, SchedulerOptions};

/// Parse a number that may have metric suffix (k/K=1000, m/M=1e6, g/G=1e9)
fn parse_metric_number(s: &str) -> Result<u64, String> {
    if s.is_empty() {
        return Err("Empty string".to_string());
    }

    let (num_part, suffix) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - c.len_utf8()], Some(c)),
        _ => (s, None),
    };

    let base: f64 = num_part
        .parse()
        .map_err(|e| format!("Invalid number: {e}"))?;

    let multiplier = match suffix {
        Some('k') | Some('K') => 1000.0,
        Some('m') | Some('M') => 1_000_000.0,
        Some('g') | Some('G') => 1_000_000_000.0,
        Some(c) => {
            return Err(format!(
                "Unknown suffix '{c}'. Use k/K (1000), m/M (1e6), or g/G (1e9)"
            ))
        }
        None => 1.0,
    };

    let result = base * multiplier;
    if result < 0.0 || result > u64::MAX as f64 {
        return Err(format!("Value {result} out of range"));
    }

    Ok(result as u64)
}

/// splitmask - RepeatMasker over arbitrarily large genomes
///
/// Splits the input into overlapping chunks, annotates each chunk
/// independently, and lifts the results back into one coordinate-correct
/// report. Interrupted runs can be resumed with --restart.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// FASTA or gzipped FASTA input
    #[clap(value_name = "INPUT", required_unless_present = "restart")]
    input: Option<PathBuf>,

    /// Species passed to RepeatMasker
    #[clap(long = "species", default_value = "human")]
    species: String,

    /// Maximum bases per chunk and per chunk file
    #[clap(short = 's', long = "split-size", default_value = "200k", value_parser = parse_metric_number)]
    split_size: u64,

    /// Bases shared by neighbouring chunks of one sequence
    #[clap(long = "overlap", default_value = "1000", value_parser = parse_metric_number)]
    overlap: u64,

    /// Merged RepeatMasker .out report
    #[clap(short = 'o', long = "output")]
    output: PathBuf,

    /// Also reconstruct masked sequences: "soft" (lower-case) or "hard" (N)
    #[clap(long = "mask")]
    mask: Option<MaskPolicy>,

    /// Where to write the masked FASTA (requires --mask)
    #[clap(long = "masked-output", requires = "mask")]
    masked_output: Option<PathBuf>,

    /// Write the chunk lift file (UCSC lift format)
    #[clap(long = "lift-output")]
    lift_output: Option<PathBuf>,

    /// Resume the run with this id instead of starting a new one
    #[clap(long = "restart", value_name = "RUN_ID", conflicts_with = "input")]
    restart: Option<String>,

    /// Directory for run state and blobs [$TMPDIR/splitmask]
    #[clap(long = "work-dir")]
    work_dir: Option<PathBuf>,

    /// Number of chunks annotated concurrently
    #[clap(short = 't', long = "threads", default_value = "8")]
    threads: usize,

    /// Attempts per task on infrastructure failures
    #[clap(long = "max-attempts", default_value = "3")]
    max_attempts: u32,

    /// Kill an annotation run after this many seconds
    #[clap(long = "timeout")]
    timeout: Option<u64>,

    /// RepeatMasker executable
    #[clap(long = "repeatmasker", default_value = "RepeatMasker")]
    repeatmasker: PathBuf,

    /// Quiet mode (warnings and errors only)
    #[clap(long = "quiet")]
    quiet: bool,
}

fn default_work_dir() -> PathBuf {
    let base = std::env::var("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    base.join("splitmask")
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let work_dir = args.work_dir.clone().unwrap_or_else(default_work_dir);
    let annotator = RepeatMaskerInvoker::new(args.species.clone())
        .with_program(args.repeatmasker.clone())
        .with_timeout(args.timeout.map(Duration::from_secs));
    let options = SchedulerOptions {
        threads: args.threads,
        max_attempts: args.max_attempts.max(1),
        ..SchedulerOptions::default()
    };
    let pipeline = Pipeline::new(&work_dir, Arc::new(annotator))
        .with_context(|| format!("Failed to open work directory {}", work_dir.display()))?
        .with_options(options);

    let result = match (&args.restart, &args.input) {
        (Some(run_id), _) => pipeline.resume(run_id),
        (None, Some(input)) => {
            let config = RunConfig {
                chunk: ChunkParams::new(args.split_size, args.overlap)?,
                mask: args.mask,
            };
            pipeline.start(input, config)
        }
        (None, None) => anyhow::bail!("Either INPUT or --restart is required"),
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(PipelineError::RunFailed { failures }) => {
            for failure in &failures {
                error!("failed task {}", failure);
            }
            anyhow::bail!(
                "{} task(s) failed; fix the cause and rerun with --restart",
                failures.len()
            );
        }
        Err(e) => return Err(e.into()),
    };

    pipeline
        .export(&outcome.report, &args.output)
        .with_context(|| format!("Failed to write report to {}", args.output.display()))?;
    info!("Report written to {}", args.output.display());

    if let (Some(masked), Some(path)) = (&outcome.masked, &args.masked_output) {
        pipeline
            .export(masked, path)
            .with_context(|| format!("Failed to write masked FASTA to {}", path.display()))?;
        info!("Masked sequences written to {}", path.display());
    }

    if let Some(path) = &args.lift_output {
        let mut writer = BufWriter::new(File::create(path)?);
        outcome.lift_map.write_lift(&mut writer)?;
        info!("Lift file written to {}", path.display());
    }

    info!("Run id: {}", outcome.run_id);
    Ok(())
}
