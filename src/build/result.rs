//! Pipeline result types.
//!
//! Contains the outcome of one pipeline invocation.

use crate::build::TransformError;
use std::path::PathBuf;
use std::time::Duration;

/// Result of one pipeline invocation.
///
/// An invocation that reaches persistence always yields a result, even when
/// some artifacts failed; check [`PipelineResult::is_success`].
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Pipeline name
    pub pipeline: String,
    /// Destination root the outputs were written under
    pub dest: PathBuf,
    /// Identifiers of written outputs, relative to `dest`
    pub written: Vec<String>,
    /// Identifiers of written source maps, relative to `dest`
    pub provenance_maps: Vec<String>,
    /// Artifact-level failures, in the order they were observed
    pub failures: Vec<TransformError>,
    /// Wall-clock duration of the invocation
    pub duration: Duration,
}

impl PipelineResult {
    /// Create an empty result for a pipeline.
    pub fn new(pipeline: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self { pipeline: pipeline.into(), dest: dest.into(), ..Default::default() }
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Check if every artifact made it through.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// The source map, when the pipeline produced exactly one.
    pub fn provenance_map(&self) -> Option<&str> {
        match self.provenance_maps.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Absolute paths of written outputs (source maps excluded).
    pub fn written_paths(&self) -> Vec<PathBuf> {
        self.written.iter().map(|id| self.dest.join(id)).collect()
    }

    /// Format a summary of the result.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        if self.failures.is_empty() {
            lines.push(format!(
                "{}: wrote {} file(s), {} source map(s) in {:?}",
                self.pipeline,
                self.written.len(),
                self.provenance_maps.len(),
                self.duration
            ));
        } else {
            lines.push(format!(
                "{} failed: {} artifact failure(s), {} file(s) written",
                self.pipeline,
                self.failures.len(),
                self.written.len()
            ));
            for failure in &self.failures {
                lines.push(format!("  - {}", failure));
            }
        }

        lines.join("\n")
    }
}
