//! Command-line interface implementation
//!
//! `assetflow [TASK]` runs one registered task (the `default` task when
//! omitted). Tasks with a watch binding keep running after the first pass
//! and rebuild on change until the process is terminated.

mod task;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// Assetflow - declarative front-end asset pipelines
#[derive(Parser, Debug)]
#[command(name = "assetflow")]
#[command(about = "Assetflow - build stylesheets, images and scripts with source maps, and rebuild on change")]
#[command(version)]
pub struct Cli {
    /// Task to run
    #[arg(default_value = "default")]
    pub task: String,

    /// Path to assetflow.toml (default: search upward from the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Destination root, overriding [project].dest
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Parallel workers per pipeline (0 = available parallelism)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// List registered tasks and exit
    #[arg(long)]
    pub list: bool,
}

/// Install the log subscriber. `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_target(false)
        .try_init();
}

/// Parse arguments and run.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    task::run_task(&cli)
}
