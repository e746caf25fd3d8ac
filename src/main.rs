use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use findpics::{batch, config, reference, scan, sink::Action, Pipeline};
use log::info;

#[derive(Parser)]
#[command(name = "findpics")]
#[command(
    version,
    about = "Find pictures of a person of interest within a folder of pictures"
)]
struct Cli {
    /// Log a status line for every analyzed image
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the stack folder for the person shown in the sample photos
    Find {
        /// Folder of sample photos, each showing only the person of interest
        #[arg(long, default_value = "input_sample")]
        sample: PathBuf,
        /// Folder of unsorted pictures to search
        #[arg(long, default_value = "input_stack")]
        stack: PathBuf,
        /// Folder that receives the timestamped match folder
        #[arg(long, default_value = "output")]
        output: PathBuf,
        /// Move matched files instead of copying them
        #[arg(long = "move")]
        move_files: bool,
        /// Report matches without copying or moving anything
        #[arg(long, conflicts_with = "move_files")]
        dry_run: bool,
        /// Similarity threshold override
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Worker threads (defaults to one per core)
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Directory holding the ONNX model files
        #[arg(long)]
        models: Option<PathBuf>,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::builder()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Find {
            sample,
            stack,
            output,
            move_files,
            dry_run,
            threshold,
            jobs,
            models,
        } => {
            let mut cfg = config::load_config(None)?;
            if let Some(threshold) = threshold {
                cfg.threshold = threshold;
            }
            if let Some(jobs) = jobs {
                cfg.jobs = jobs;
            }
            if let Some(models) = models {
                cfg.models_dir = models;
            }

            let action = if dry_run {
                Action::DryRun
            } else if move_files {
                Action::Move
            } else {
                Action::Copy
            };

            find(&cfg, &sample, &stack, &output, action)
        }
        Commands::Config => open_config(),
    }
}

fn find(
    cfg: &config::Config,
    sample: &Path,
    stack: &Path,
    output: &Path,
    action: Action,
) -> Result<()> {
    let samples = scan::scan_image_folder(sample).context("validating sample folder")?;
    let candidates = scan::scan_image_folder(stack).context("validating stack folder")?;

    let mut pipeline = Pipeline::load(&cfg.models_dir, cfg.score_threshold, cfg.nms_threshold)
        .context("initializing face recognition pipeline")?;
    let references = reference::encode_references(&mut pipeline, &samples)?;
    // Workers build their own pipelines; this one is done.
    drop(pipeline);

    let summary = batch::run_batch(cfg, &references, &candidates, output, action)?;

    info!(
        "Analyzed {} image(s); {} contained no face.",
        summary.analyzed, summary.no_face
    );
    if let Some(dir) = &summary.dest_dir {
        info!("Matched files placed in {}", dir.display());
    } else if action == Action::DryRun {
        info!("Dry run: no files were copied or moved.");
    }
    if summary.failed > 0 {
        info!("{} image(s) could not be analyzed.", summary.failed);
    }
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_path();
    if !config_path.exists() {
        config::save_config(&config::Config::default(), None)
            .context("writing default config")?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
