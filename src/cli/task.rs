//! Task execution: one-shot runs and watch mode

use std::process::ExitCode;
use std::sync::Arc;

use super::{Cli, EXIT_ERROR, EXIT_INVALID_ARGS, EXIT_SUCCESS};
use crate::build::BuildContext;
use crate::config::loader::{load_config, merge_cli_overrides, CliOverrides};
use crate::config::WatchConfig;
use crate::registry::{TaskRegistry, TaskReport, WatchBinding};
use crate::tasks::standard_registry;
use crate::watch::{print_report, timestamp, ErrorTracker, WatchSession};

/// Run the task named on the command line
pub fn run_task(cli: &Cli) -> ExitCode {
    let loaded = match load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    match &loaded.path {
        Some(path) => tracing::info!(path = %path.display(), "using config"),
        None => tracing::info!("no assetflow.toml found, using defaults"),
    }

    let mut config = loaded.config;
    merge_cli_overrides(&mut config, &CliOverrides { dest: cli.dest.clone(), jobs: cli.jobs });

    // Watch events carry absolute paths.
    let project_root = std::fs::canonicalize(&loaded.project_root).unwrap_or(loaded.project_root);
    let context = BuildContext::new(config, project_root).with_verbose(cli.verbose);

    let registry = match standard_registry(&context) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    if cli.list {
        list_tasks(&registry);
        return ExitCode::from(EXIT_SUCCESS);
    }

    let Some(task) = registry.get(&cli.task) else {
        eprintln!("Error: unknown task '{}'", cli.task);
        eprintln!("Available tasks: {}", registry.names().collect::<Vec<_>>().join(", "));
        return ExitCode::from(EXIT_INVALID_ARGS);
    };
    let binding = task.watch_binding().cloned();
    let has_units = !task.units().is_empty();

    let registry = Arc::new(registry);
    let mut tracker = ErrorTracker::new();
    let mut success = true;

    if has_units {
        match registry.run(&cli.task) {
            Ok(report) => {
                if context.is_verbose() {
                    for result in report.all_results() {
                        println!("{}", result.summary());
                        for path in result.written_paths() {
                            println!("  {}", path.display());
                        }
                    }
                }
                print_summary(&report);
                tracker.update(&report);
                success = report.is_success();
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::from(EXIT_ERROR);
            }
        }
    }

    match binding {
        Some(binding) => watch(registry, binding, &context.config().watch, tracker),
        None if success => ExitCode::from(EXIT_SUCCESS),
        None => ExitCode::from(EXIT_ERROR),
    }
}

fn list_tasks(registry: &TaskRegistry) {
    for name in registry.names() {
        let description = registry.get(name).and_then(|t| t.description()).unwrap_or("");
        println!("{:<14} {}", name, description);
    }
}

fn print_summary(report: &TaskReport) {
    if report.is_success() {
        println!("{}", report.summary());
    } else {
        eprintln!("{}", report.summary());
    }
}

/// Block in watch mode until the process is terminated.
fn watch(
    registry: Arc<TaskRegistry>,
    binding: WatchBinding,
    config: &WatchConfig,
    mut tracker: ErrorTracker,
) -> ExitCode {
    println!("[{}] Watching {} -> task '{}'", timestamp(), binding.pattern, binding.task);
    println!("Press Ctrl+C to stop");

    let task = binding.task.clone();
    let session = WatchSession::start(&binding, config, move || match registry.run(&task) {
        Ok(report) => {
            let fixed = tracker.update(&report);
            print_report(&report, &fixed);
            if tracker.has_errors() {
                tracing::info!(failing = tracker.error_count(), "waiting for changes");
            }
        }
        Err(e) => eprintln!("[{}] Error: {}", timestamp(), e),
    });

    match session {
        Ok(session) => {
            session.wait();
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Watch error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
