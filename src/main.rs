use clap::Parser;
use std::path::PathBuf;

use voc::batch;
use voc::config::PipelineConfig;
use voc::{DetectorCache, Pipeline};

#[derive(Parser)]
#[command(name = "voc")]
#[command(about = "Extract crops of detected objects through a cascade of detectors")]
struct Cli {
    /// YAML config file describing the pipeline
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Path to image file or image directory
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,

    /// Outputs directory
    #[arg(short, long, value_name = "DIR", default_value = "outputs")]
    output: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Save every stage's boxes and crops to directory, one subdirectory per input (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if !args.input.exists() {
        log::error!("No such file or directory at {}", args.input.display());
        std::process::exit(2);
    }

    let config = PipelineConfig::load(&args.config)?;
    log::info!("device selected: {}", config.device);

    let cache = DetectorCache::new();
    let mut pipeline = Pipeline::from_config(&config, &cache)?;
    if let Some(debug_dir) = args.debug_out {
        pipeline = pipeline.with_debug(debug_dir)?;
    }
    log::info!("pipeline: {} stages, {} distinct models", pipeline.len(), cache.len());

    let cancel = pipeline.cancel_token();
    ctrlc::set_handler(move || {
        log::warn!("interrupted, finishing current image");
        cancel.cancel();
    })?;

    let inputs = batch::list_inputs(&args.input)?;
    let report = batch::process_batch(&pipeline, &inputs, &args.output)?;

    if report.cancelled {
        log::warn!("run cancelled before all inputs were processed");
    }
    println!(
        "processed {}/{} images, {} crops written to {}",
        report.processed,
        report.total,
        report.crops_written,
        args.output.display()
    );

    Ok(())
}
