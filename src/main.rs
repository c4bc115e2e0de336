use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use platecascade::batch::{self, BatchOptions};
use platecascade::{
    Cancellation, Cascade, CascadeStage, ConfigOverrides, DetectorModel, ImageReport, RawConfig,
};

#[derive(Parser)]
#[command(name = "platecascade")]
#[command(about = "Detect vehicles, license plates and plate contents in a directory of images")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path root joined before the input and model directories
    #[arg(long, value_name = "DIR")]
    prefix: Option<PathBuf>,

    /// Directory containing the input JPEG images
    #[arg(long, value_name = "DIR")]
    input_dir: Option<PathBuf>,

    /// Directory containing <stage>.names, <stage>.rten and <stage>.cfg
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Minimum detection confidence, in [0, 1]
    #[arg(long)]
    confidence: Option<f32>,

    /// Overlap threshold for non-maximum suppression, in [0, 1]
    #[arg(long)]
    threshold: Option<f32>,

    /// Only suppress overlapping boxes of the same class
    #[arg(long)]
    class_aware_nms: bool,

    /// Directory for plate crops (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Number of images processed in parallel
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Per-image time limit in seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,

    /// Write the full result tree as JSON
    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn print_report(report: &ImageReport) {
    for (_, tokens) in report.recognized() {
        for token in tokens {
            println!("{}", token.display_line());
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    let raw = match &args.config {
        Some(path) => RawConfig::from_file(path)?,
        None => RawConfig::default(),
    };
    let config = raw
        .apply(&ConfigOverrides {
            prefix: args.prefix.clone(),
            input_image_dir: args.input_dir.clone(),
            darknet_model_dir: args.model_dir.clone(),
            confidence: args.confidence,
            threshold: args.threshold,
            class_aware_nms: args.class_aware_nms,
            output_dir: args.output_dir.clone(),
        })
        .resolve()?;

    info!("Input images: {}", config.input_image_dir.display());

    // All models load before the first image; any failure ends the run here
    let mut cascade = Cascade::new().with_suppression(config.suppression);
    for stage in &config.stages {
        let model = DetectorModel::load(&config.model_dir, &stage.name)?
            .with_channel_order(stage.channel_order);
        let input = model.input_size();
        info!(
            "Stage {}: input {}x{}, {:?}",
            model.name(),
            input.width,
            input.height,
            stage.channel_order
        );
        cascade = cascade.add_stage(CascadeStage::new(
            stage.name.clone(),
            Arc::new(model),
            stage.confidence,
            stage.threshold,
        ));
    }

    let output_dir = config.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    cascade = cascade.with_leaf_output(output_dir, config.leaf_prefix.clone())?;

    if let Some(debug_dir) = args.debug_out {
        cascade = cascade.with_debug(debug_dir)?;
    }

    let paths = batch::collect_images(&config.input_image_dir)?;
    info!("Found {} images", paths.len());

    let options = BatchOptions {
        jobs: args.jobs.max(1),
        timeout: args.timeout_secs.map(Duration::from_secs),
    };
    let reports = batch::run_batch(&cascade, &paths, &options, &Cancellation::new())?;

    for report in &reports {
        println!("{}", report.name);
        print_report(report);
    }

    let failed = reports.iter().filter(|r| r.outcome.is_failed()).count();
    info!("Processed {} images, {} failed", reports.len(), failed);

    if let Some(json_path) = args.json {
        let file = std::fs::File::create(&json_path)
            .with_context(|| format!("Failed to create {}", json_path.display()))?;
        serde_json::to_writer_pretty(file, &reports)?;
        info!("Wrote report to {}", json_path.display());
    }

    Ok(())
}
