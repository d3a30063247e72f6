//! Transform stages.
//!
//! A stage is a named, pure function from input artifacts to output
//! artifacts, optionally paired with a provenance fragment describing how
//! output positions map back to input positions. Stages never touch the
//! filesystem; persistence is the pipeline's job.

use crate::build::{Artifact, ArtifactKind};
use crate::sourcemap::SourceMap;
use std::sync::Arc;
use thiserror::Error;

/// What a stage consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputConstraint {
    /// One artifact at a time (1:1 or 1:N).
    Each(ArtifactKind),
    /// The whole ordered sequence at once (N:1 fold, e.g. concatenation).
    Sequence(ArtifactKind),
}

impl InputConstraint {
    pub fn kind(self) -> ArtifactKind {
        match self {
            InputConstraint::Each(kind) | InputConstraint::Sequence(kind) => kind,
        }
    }

    pub fn is_fold(self) -> bool {
        matches!(self, InputConstraint::Sequence(_))
    }
}

impl std::fmt::Display for InputConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputConstraint::Each(kind) => write!(f, "{}", kind),
            InputConstraint::Sequence(kind) => write!(f, "sequence of {}", kind),
        }
    }
}

/// Information handed to a transform on each call.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub pipeline: &'a str,
    pub stage: &'a str,
}

impl StageContext<'_> {
    /// Build an error for `artifact` attributed to this stage.
    pub fn error(&self, artifact: &str, message: impl Into<String>) -> TransformError {
        TransformError {
            stage: self.stage.to_string(),
            artifact: artifact.to_string(),
            message: message.into(),
            line: None,
        }
    }
}

/// A stage failed on one artifact. Never aborts sibling artifacts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[{stage}] {artifact}{}: {message}", .line.map(|l| format!(":{}", l)).unwrap_or_default())]
pub struct TransformError {
    pub stage: String,
    pub artifact: String,
    pub message: String,
    /// 1-based source line, when the transform can tell
    pub line: Option<u32>,
}

impl TransformError {
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// One output of a transform call.
#[derive(Debug, Clone)]
pub struct Produced {
    pub artifact: Artifact,
    /// Maps `artifact` back to the stage's inputs, identified by input id.
    /// `None` means byte offsets were not shifted (or no mapping is known).
    pub fragment: Option<SourceMap>,
}

impl Produced {
    pub fn new(artifact: Artifact) -> Self {
        Self { artifact, fragment: None }
    }

    pub fn with_fragment(artifact: Artifact, fragment: SourceMap) -> Self {
        Self { artifact, fragment: Some(fragment) }
    }
}

/// Uniform contract for stage implementations.
///
/// For [`InputConstraint::Each`] stages `inputs` always has length one.
/// Implementations must be deterministic: same input content and
/// configuration, byte-identical output.
pub trait Transform: Send + Sync {
    fn apply(&self, inputs: &[Artifact], ctx: &StageContext<'_>)
        -> Result<Vec<Produced>, TransformError>;
}

struct FnTransform<F>(F);

impl<F> Transform for FnTransform<F>
where
    F: Fn(&[Artifact], &StageContext<'_>) -> Result<Vec<Produced>, TransformError> + Send + Sync,
{
    fn apply(
        &self,
        inputs: &[Artifact],
        ctx: &StageContext<'_>,
    ) -> Result<Vec<Produced>, TransformError> {
        (self.0)(inputs, ctx)
    }
}

/// A named stage in a pipeline definition.
#[derive(Clone)]
pub struct StageDescriptor {
    name: String,
    input: InputConstraint,
    output: ArtifactKind,
    after: Option<String>,
    transform: Arc<dyn Transform>,
}

impl StageDescriptor {
    /// Stage applied to each artifact independently.
    pub fn each(
        name: impl Into<String>,
        input: ArtifactKind,
        output: ArtifactKind,
        transform: impl Transform + 'static,
    ) -> Self {
        Self::new(name, InputConstraint::Each(input), output, Arc::new(transform))
    }

    /// Stage folding the whole sequence into its outputs.
    pub fn fold(
        name: impl Into<String>,
        input: ArtifactKind,
        output: ArtifactKind,
        transform: impl Transform + 'static,
    ) -> Self {
        Self::new(name, InputConstraint::Sequence(input), output, Arc::new(transform))
    }

    /// Stage backed by a closure.
    pub fn from_fn<F>(name: impl Into<String>, input: InputConstraint, output: ArtifactKind, f: F) -> Self
    where
        F: Fn(&[Artifact], &StageContext<'_>) -> Result<Vec<Produced>, TransformError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, input, output, Arc::new(FnTransform(f)))
    }

    fn new(
        name: impl Into<String>,
        input: InputConstraint,
        output: ArtifactKind,
        transform: Arc<dyn Transform>,
    ) -> Self {
        Self { name: name.into(), input, output, after: None, transform }
    }

    /// Require this stage to run after the named predecessor.
    pub fn after(mut self, predecessor: impl Into<String>) -> Self {
        self.after = Some(predecessor.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> InputConstraint {
        self.input
    }

    pub fn output(&self) -> ArtifactKind {
        self.output
    }

    pub fn predecessor(&self) -> Option<&str> {
        self.after.as_deref()
    }

    pub fn transform(&self) -> &dyn Transform {
        self.transform.as_ref()
    }
}

impl std::fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}
