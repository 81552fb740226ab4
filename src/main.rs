use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use plage::crosscorr::CcfParams;
use plage::masks::{MaskKind, MaskStore};
use plage::processor::{
    ActivityResult, ProcessorConfig, SpectrumProcessor, activities_table_name, batch_target,
    write_activities_table, write_results_json,
};
use plage::stack::stack_files;
use plage::steplog::{StepLog, StepSink};

#[derive(Parser)]
#[command(
    name = "plage",
    about = "Chromospheric activity indices from reduced echelle spectra"
)]
struct Cli {
    /// Log debug detail from every pipeline stage.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a single reduced echelle spectrum.
    Process {
        /// Path to the reduced FITS file.
        file: PathBuf,

        /// Directory holding the G2/K0/K5/M2 line mask files.
        #[arg(short, long, default_value = "masks")]
        masks: PathBuf,

        /// Mask to cross-correlate against (G2, K0, K5 or M2).
        #[arg(long, default_value = "G2")]
        mask: MaskKind,

        /// Output directory for results.
        #[arg(short, long, default_value = "activities")]
        output: PathBuf,

        /// Save the merged 1-D rest-frame spectrum.
        #[arg(long)]
        save_1d: bool,

        /// Velocity scan half-range in km/s.
        #[arg(long, default_value = "300.0")]
        rv_range: f64,

        /// Velocity scan step in km/s.
        #[arg(long, default_value = "0.05")]
        rv_step: f64,

        /// Append JSON-lines step events to this file.
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Also write the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Process every spectrum matching a pattern in a directory.
    Batch {
        /// Directory containing reduced FITS files.
        dir: PathBuf,

        /// Glob pattern for files within the directory.
        #[arg(long, default_value = "*.fits")]
        pattern: String,

        /// Directory holding the G2/K0/K5/M2 line mask files.
        #[arg(short, long, default_value = "masks")]
        masks: PathBuf,

        /// Mask to cross-correlate against (G2, K0, K5 or M2).
        #[arg(long, default_value = "G2")]
        mask: MaskKind,

        /// Output directory for results.
        #[arg(short, long, default_value = "activities")]
        output: PathBuf,

        /// Save each merged 1-D rest-frame spectrum.
        #[arg(long)]
        save_1d: bool,

        /// Velocity scan half-range in km/s.
        #[arg(long, default_value = "300.0")]
        rv_range: f64,

        /// Velocity scan step in km/s.
        #[arg(long, default_value = "0.05")]
        rv_step: f64,

        /// Append JSON-lines step events to this file.
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Also write the batch results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Median-combine stored 1-D spectra into one stacked spectrum.
    Stack {
        /// Stored .spc spectra to combine; the first defines the grid.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output directory for the stacked spectrum.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

fn build_processor(
    masks_dir: &Path,
    mask: MaskKind,
    output: &Path,
    save_1d: bool,
    rv_range: f64,
    rv_step: f64,
    log_file: Option<&Path>,
) -> SpectrumProcessor {
    let sink: Box<dyn StepSink> = match log_file {
        Some(path) => Box::new(StepLog::with_file(path).unwrap_or_else(|e| {
            eprintln!("Failed to open step log {}: {e}", path.display());
            process::exit(1);
        })),
        None => Box::new(StepLog::new()),
    };

    std::fs::create_dir_all(output).unwrap_or_else(|e| {
        eprintln!("Cannot create output directory {}: {e}", output.display());
        process::exit(1);
    });

    let mut masks = MaskStore::new(masks_dir);
    masks.get(mask).unwrap_or_else(|e| {
        eprintln!("Cannot load mask {mask}: {e}");
        process::exit(1);
    });

    let config = ProcessorConfig {
        mask,
        ccf: CcfParams {
            rv_min: -rv_range,
            rv_max: rv_range,
            rv_step,
        },
        save_1d,
        output_dir: output.to_path_buf(),
        ..ProcessorConfig::default()
    };
    SpectrumProcessor::new(config, masks, sink)
}

fn write_outputs(results: &[ActivityResult], out_dir: &Path, json: bool) {
    let target = batch_target(results);
    let table = out_dir.join(activities_table_name(target));
    write_activities_table(results, &table).unwrap_or_else(|e| {
        eprintln!("Failed to write {}: {e}", table.display());
        process::exit(1);
    });
    eprintln!("Wrote {}", table.display());

    if json {
        let path = out_dir.join(format!("{target}_activities.json"));
        write_results_json(results, &path).unwrap_or_else(|e| {
            eprintln!("Failed to write {}: {e}", path.display());
            process::exit(1);
        });
        eprintln!("Wrote {}", path.display());
    }
}

fn cmd_process(file: &Path, mut processor: SpectrumProcessor, json: bool) {
    let result = processor.process_file(file);
    if let Some(e) = &result.error {
        eprintln!("{}: {e}", result.filename);
        process::exit(1);
    }

    println!("target      {}", result.target);
    println!("instrument  {}", result.instrument);
    println!("bjd         {:.6}", result.bjd);
    println!("rv          {:+.3} km/s", result.rv);
    println!(
        "S           {:.4} +- {:.4}",
        result.s_index, result.s_index_error
    );
    println!(
        "Halpha      {:.4} +- {:.4}",
        result.halpha, result.halpha_error
    );
    println!("HeI         {:.4} +- {:.4}", result.hei, result.hei_error);
    println!(
        "NaI D1D2    {:.4} +- {:.4}",
        result.nai_d1d2, result.nai_d1d2_error
    );
    if let Some(path) = &result.spectrum_1d_path {
        println!("spectrum    {path}");
    }

    let out_dir = processor.config().output_dir.clone();
    write_outputs(std::slice::from_ref(&result), &out_dir, json);
}

fn cmd_batch(dir: &Path, pattern: &str, mut processor: SpectrumProcessor, json: bool) {
    let glob_pattern = dir.join(pattern);
    let mut files: Vec<PathBuf> = glob::glob(glob_pattern.to_str().unwrap())
        .unwrap_or_else(|e| {
            eprintln!("Invalid glob pattern: {e}");
            process::exit(1);
        })
        .filter_map(|r| r.ok())
        .collect();
    files.sort();

    if files.is_empty() {
        eprintln!("No files matched pattern '{}'", glob_pattern.display());
        process::exit(1);
    }
    eprintln!("Found {} spectra to process\n", files.len());

    let mut results = Vec::with_capacity(files.len());
    let mut n_ok = 0;
    let mut n_failed = 0;
    for (i, file) in files.iter().enumerate() {
        let name = file.file_name().unwrap().to_string_lossy();
        eprint!("[{:3}/{}] {}: ", i + 1, files.len(), name);

        let result = processor.process_file(file);
        match &result.error {
            None => {
                let total: f64 = result.processing_time.values().sum();
                eprintln!(
                    "OK in {:.1}s  rv={:+.3}  S={:.4}  Ha={:.4}  HeI={:.4}  NaI={:.4}",
                    total, result.rv, result.s_index, result.halpha, result.hei, result.nai_d1d2
                );
                n_ok += 1;
            }
            Some(e) => {
                eprintln!("FAILED  {e}");
                n_failed += 1;
            }
        }
        results.push(result);
    }

    let total = n_ok + n_failed;
    eprintln!("\n========== RESULTS ==========");
    eprintln!(
        "Processed: {}/{} ({:.0}%)",
        n_ok,
        total,
        100.0 * n_ok as f64 / total as f64
    );
    eprintln!("Failed:    {}/{}", n_failed, total);

    let out_dir = processor.config().output_dir.clone();
    write_outputs(&results, &out_dir, json);
}

fn cmd_stack(files: &[PathBuf], output: &Path) {
    std::fs::create_dir_all(output).unwrap_or_else(|e| {
        eprintln!("Cannot create output directory {}: {e}", output.display());
        process::exit(1);
    });
    let out = stack_files(files, output).unwrap_or_else(|e| {
        eprintln!("Stacking failed: {e}");
        process::exit(1);
    });
    eprintln!("Wrote {}", out.display());
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match &cli.command {
        Commands::Process {
            file,
            masks,
            mask,
            output,
            save_1d,
            rv_range,
            rv_step,
            log_file,
            json,
        } => {
            let processor = build_processor(
                masks,
                *mask,
                output,
                *save_1d,
                *rv_range,
                *rv_step,
                log_file.as_deref(),
            );
            cmd_process(file, processor, *json);
        }
        Commands::Batch {
            dir,
            pattern,
            masks,
            mask,
            output,
            save_1d,
            rv_range,
            rv_step,
            log_file,
            json,
        } => {
            let processor = build_processor(
                masks,
                *mask,
                output,
                *save_1d,
                *rv_range,
                *rv_step,
                log_file.as_deref(),
            );
            cmd_batch(dir, pattern, processor, *json);
        }
        Commands::Stack { files, output } => cmd_stack(files, output),
    }
}
