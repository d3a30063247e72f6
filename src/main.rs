//! Assetflow - command-line asset pipeline runner

use std::process::ExitCode;

use assetflow::cli;

fn main() -> ExitCode {
    cli::run()
}
