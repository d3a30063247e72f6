//! Error taxonomy for pipeline construction and invocation.
//!
//! - [`ConfigurationError`] is fatal and raised while definitions are built
//!   or tasks are registered.
//! - [`SelectionError`] and [`PersistenceError`] abort one pipeline invocation
//!   (wrapped in [`PipelineError`]).
//! - [`TransformError`](crate::build::TransformError) is artifact-scoped and
//!   never escapes a run; it is collected into the result instead.

use crate::build::ArtifactKind;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid static configuration detected at construction or registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error(
        "pipeline '{pipeline}': stage '{stage}' expects {expected} input but receives {found}"
    )]
    IncompatibleStages { pipeline: String, stage: String, expected: ArtifactKind, found: ArtifactKind },

    #[error("pipeline '{pipeline}': stage '{stage}' must run after '{after}'")]
    StageOrder { pipeline: String, stage: String, after: String },

    #[error("pipeline '{pipeline}': duplicate stage name '{stage}'")]
    DuplicateStage { pipeline: String, stage: String },

    #[error("pipeline '{pipeline}': invalid output name '{name}'")]
    OutputName { pipeline: String, name: String },

    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("cyclic task reference: {}", .0.join(" -> "))]
    CyclicTask(Vec<String>),

    #[error("task '{task}' references unknown task '{reference}'")]
    UnknownTask { task: String, reference: String },

    #[error("invalid browser targets {queries:?}: {message}")]
    Browsers { queries: Vec<String>, message: String },
}

/// Failure resolving a pattern against the filesystem.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("pattern root does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure writing pipeline output under its destination root.
#[derive(Debug, Error)]
#[error("failed to write {}: {source}", path.display())]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Invocation-level failure. Aborts the invocation, never a watch loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline '{pipeline}': {source}")]
    Selection {
        pipeline: String,
        #[source]
        source: SelectionError,
    },

    #[error("pipeline '{pipeline}': {source}")]
    Persistence {
        pipeline: String,
        #[source]
        source: PersistenceError,
    },

    #[error("pipeline '{pipeline}': failed to start worker pool: {message}")]
    Workers { pipeline: String, message: String },
}
