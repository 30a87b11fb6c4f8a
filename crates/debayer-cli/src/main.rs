//! debayer - batch raw to scene-linear deliverables
//!
//! Recursively finds raw frame sequences under the input paths, recreates
//! their directory structure under the output directory, and converts every
//! frame through the external demosaic engine and image converter.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use debayer_core::{CommandRunner, Orchestrator, SequenceDiscovery};

mod settings;

#[derive(Parser)]
#[command(name = "debayer")]
#[command(author, version, about = "Debayer raw files to scene-linear output images")]
#[command(long_about = "
For each input directory, recursively find raw frame sequences, recreate the
directory structure under the output directory, and convert every frame to
the requested output image format(s).

Examples:
  debayer /shoots/day1 -o /out                # defaults from debayer.yaml
  debayer /shoots/day1 -o /out -f exr,jpg     # two deliverable formats
  debayer img.cr2 -o /out -a                  # static autoexposure
  debayer /shoots -o /out --autoexpose-each -r 1920x0
  debayer /shoots -o /out -c exr:lin_ap1,jpg:out_rec709
")]
pub struct Cli {
    /// Source(s) to process: one or more directories or raw images
    #[arg(required = true)]
    pub input_paths: Vec<PathBuf>,

    /// Output directory; the current directory if not specified
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite existing output files
    #[arg(short = 'w', long)]
    pub overwrite: bool,

    /// Output format(s): exr, tif, jpg, or a comma-separated list like "exr,jpg"
    #[arg(short = 'f', long = "output-formats")]
    pub output_formats: Option<String>,

    /// Custom rawtherapee pp3 profile instead of the config default
    #[arg(short, long)]
    pub profile: Option<PathBuf>,

    /// Remove chromatic aberration (rawtherapee engine only)
    #[arg(long, alias = "ca")]
    pub aberration: bool,

    /// OCIO config to use; falls back to $OCIO, then the config default
    #[arg(long)]
    pub ocioconfig: Option<PathBuf>,

    /// Output colorspace per format: "exr:lin_ap1,jpg:out_rec709", or a bare
    /// colorspace which applies to exr
    #[arg(short = 'c', long = "colorspaces-out")]
    pub colorspaces_out: Option<String>,

    /// Resize the output: "1920x1080", "1920x0" (preserve aspect), or "50%"
    #[arg(short, long)]
    pub resize: Option<String>,

    /// Manual exposure gain, e.g. 1.5; disables autoexposure
    #[arg(short, long)]
    pub exposure: Option<f32>,

    /// Autoexpose: one static gain per sequence, sampled from the middle frame
    #[arg(short, long)]
    pub autoexpose: bool,

    /// Autoexpose every frame individually
    #[arg(long, alias = "ae")]
    pub autoexpose_each: bool,

    /// Skip source paths containing any of these comma-separated strings
    #[arg(long = "search-exclude", alias = "se")]
    pub search_exclude: Option<String>,

    /// Only process source paths containing one of these strings
    #[arg(long = "search-include", alias = "si")]
    pub search_include: Option<String>,

    /// Config file to use instead of ./debayer.yaml
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads per sequence (1 = sequential, 0 = all cores)
    #[arg(short = 'j', long, default_value = "1")]
    pub threads: usize,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = fmt::layer().with_target(false).without_time();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.threads > 1 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("failed to configure thread pool")?;
    }

    let file_config = settings::FileConfig::load(cli.config.as_deref())?;
    let resolved = settings::resolve(file_config, &cli)?;

    let discovery = SequenceDiscovery::new(&resolved.config.raw_extensions);
    let mut sequences = Vec::new();
    for input in &resolved.inputs {
        let found = discovery
            .scan(input)
            .with_context(|| format!("failed to scan {}", input.display()))?;
        sequences.extend(found);
    }

    let runner = CommandRunner;
    let orchestrator = Orchestrator::new(&resolved.config, &runner)?;
    let summary = orchestrator.run(&sequences)?;

    println!(
        "Processed {} sequence(s): {} converted, {} partial, {} skipped, {} failed",
        summary.sequences, summary.converted, summary.partial, summary.skipped, summary.failed
    );
    if summary.failed > 0 {
        bail!("{} frame(s) failed", summary.failed);
    }
    Ok(())
}
