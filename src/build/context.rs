//! Build context containing configuration and paths for a run.

use crate::config::AssetConfig;
use std::path::{Path, PathBuf};

/// Worker count used when `jobs` is 0.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Explicit configuration handed to registry construction.
///
/// Relative paths in the configuration resolve against `project_root`.
#[derive(Debug, Clone)]
pub struct BuildContext {
    config: AssetConfig,
    /// Directory holding assetflow.toml, or the working directory
    project_root: PathBuf,
    verbose: bool,
}

impl BuildContext {
    pub fn new(config: AssetConfig, project_root: PathBuf) -> Self {
        Self { config, project_root, verbose: false }
    }

    pub fn config(&self) -> &AssetConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Destination root (resolved).
    pub fn dest_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.dest)
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Effective per-pipeline worker count.
    pub fn jobs(&self) -> usize {
        match self.config.build.jobs {
            0 => default_jobs(),
            n => n,
        }
    }

    /// Absolute paths pass through; relative ones join the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    /// Resolve a destination subdirectory (relative to the destination root).
    pub fn dest_path(&self, sub: &Path) -> PathBuf {
        self.dest_dir().join(sub)
    }
}
