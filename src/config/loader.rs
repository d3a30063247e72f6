//! Configuration loading and discovery for `assetflow.toml`
//!
//! Provides functions to find, load, and merge configuration.

use super::schema::{AssetConfig, CONFIG_FILE};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML parsing error
    #[error("Failed to parse assetflow.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override destination root
    pub dest: Option<PathBuf>,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
}

/// A loaded configuration and the directory its relative paths resolve against.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AssetConfig,
    /// Directory containing the config file, or the working directory when
    /// running on defaults
    pub project_root: PathBuf,
    /// The file the configuration came from, if any
    pub path: Option<PathBuf>,
}

/// Find assetflow.toml by walking up from the current working directory.
pub fn find_config() -> Option<PathBuf> {
    env::current_dir().ok().and_then(find_config_from)
}

/// Find assetflow.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.is_file() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration.
///
/// With an explicit path the file must exist. Otherwise the nearest
/// assetflow.toml above the working directory is used, falling back to
/// defaults rooted at the working directory.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => {
            let config = load_config_file(&p)?;
            let project_root = project_root(&p)
                .filter(|root| !root.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok(LoadedConfig { config, project_root, path: Some(p) })
        }
        None => {
            let project_root = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            tracing::debug!("no {} found, using defaults", CONFIG_FILE);
            Ok(LoadedConfig { config: AssetConfig::default(), project_root, path: None })
        }
    }
}

/// Load and validate configuration from a specific file path.
pub fn load_config_file(path: &Path) -> Result<AssetConfig, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let config: AssetConfig = toml::from_str(&contents)?;

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
    }

    tracing::debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut AssetConfig, overrides: &CliOverrides) {
    if let Some(ref dest) = overrides.dest {
        config.project.dest = dest.clone();
    }

    if let Some(jobs) = overrides.jobs {
        config.build.jobs = jobs;
    }
}

/// Get the project root directory from a config file path.
pub fn project_root(config_path: &Path) -> Option<&Path> {
    config_path.parent()
}
