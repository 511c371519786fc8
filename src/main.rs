// src/main.rs
// Command-line application for DRS Reader

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drs_reader::{csv_file_name, DrsFile, ParserConfig, ResamplePolicy};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "drs_reader", version, about = "DRS4 binary file parser/reader")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Display DRS4 file information
    Info {
        /// DRS4 binary file
        file: PathBuf,
    },
    /// Convert DRS4 files to per-event CSV tables
    Convert {
        /// DRS4 binary files; each is processed independently
        files: Vec<PathBuf>,
        /// Output directory (default: <input>_data next to each input)
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Skip start-edge trimming
        #[arg(long)]
        no_trim: bool,
        /// Also trim the end edge of each channel
        #[arg(long)]
        trim_end: bool,
        /// Keep events with saturated samples
        #[arg(long)]
        no_exclude: bool,
        /// Trimmer voltage threshold in mV
        #[arg(long, default_value_t = 50.0)]
        threshold: f64,
        /// Fixed resampling step in ns
        #[arg(long, default_value_t = 0.1)]
        reg_time_interval: f64,
        /// Emit rows at the raw sample times instead of a fixed grid
        #[arg(long)]
        native_grid: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let exit = match cli.command {
        Command::Info { file } => run_info(&file),
        Command::Convert {
            files,
            out_dir,
            no_trim,
            trim_end,
            no_exclude,
            threshold,
            reg_time_interval,
            native_grid,
        } => {
            let config = ParserConfig {
                trim: !no_trim,
                trim_end,
                exclude_saturated: !no_exclude,
                trim_threshold: threshold,
                resample: if native_grid {
                    ResamplePolicy::NativeGrid
                } else {
                    ResamplePolicy::FixedStep { step: reg_time_interval }
                },
                ..ParserConfig::default()
            };
            run_convert(&files, out_dir.as_deref(), &config)
        }
    };
    std::process::exit(exit);
}

fn run_info(path: &Path) -> i32 {
    match DrsFile::load_file(path) {
        Ok(file) => {
            println!("DRS4 File Information");
            println!("=====================");
            println!();
            println!("File: {}", file.file_path);
            println!("Format version: {}", file.version);
            println!("Board number: {}", file.time.board);
            println!("Calibrated channels: {}", file.time.channels.len());
            println!("Number of events: {}", file.events.len());
            if let (Some(first), Some(last)) = (file.events.first(), file.events.last()) {
                println!("First event: serial {} at {}", first.serial, first.timestamp);
                println!("Last event:  serial {} at {}", last.serial, last.timestamp);
            }
            0
        }
        Err(e) => {
            error!("Error loading DRS4 file '{}': {}", path.display(), e);
            1
        }
    }
}

fn run_convert(files: &[PathBuf], out_dir: Option<&Path>, config: &ParserConfig) -> i32 {
    if files.is_empty() {
        error!("No input files given");
        return 1;
    }

    // One file's failure never affects its siblings.
    let mut failures = 0;
    for path in files {
        if let Err(e) = convert_file(path, out_dir, config) {
            error!("{}: {:#}", path.display(), e);
            failures += 1;
        }
    }
    if failures > 0 {
        1
    } else {
        0
    }
}

fn convert_file(path: &Path, out_dir: Option<&Path>, config: &ParserConfig) -> Result<()> {
    let file = DrsFile::load_file(path)
        .with_context(|| format!("failed to decode '{}'", path.display()))?;
    let (waves, stats) = file
        .to_waveforms(config)
        .with_context(|| format!("failed to calibrate '{}'", path.display()))?;

    let target = match out_dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            let stem = path.file_stem().unwrap_or_default().to_string_lossy();
            path.with_file_name(format!("{}_data", stem))
        }
    };
    fs::create_dir_all(&target)
        .with_context(|| format!("failed to create output directory '{}'", target.display()))?;

    for wave in &waves {
        let out_path = target.join(csv_file_name(wave));
        let out = fs::File::create(&out_path)
            .with_context(|| format!("failed to create '{}'", out_path.display()))?;
        drs_reader::write_csv(wave, out, config)
            .with_context(|| format!("failed to write '{}'", out_path.display()))?;
    }

    info!(
        "{}: wrote {} events to {} ({} board mismatches, {} saturated)",
        path.display(),
        waves.len(),
        target.display(),
        stats.board_mismatches,
        stats.saturated
    );
    Ok(())
}
