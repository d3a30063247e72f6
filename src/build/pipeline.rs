//! Pipeline definitions and execution.
//!
//! A [`PipelineDefinition`] is static configuration: a source [`Pattern`],
//! an ordered list of [`StageDescriptor`]s and a destination root. It is
//! validated once when built. [`Pipeline::run`] executes one invocation:
//!
//! 1. Resolve the pattern (fresh every run).
//! 2. Apply stages in declared order. Runs of consecutive per-artifact stages
//!    are applied to each artifact independently, in parallel up to the job
//!    limit; fold stages see the whole ordered sequence.
//! 3. Compose each stage's provenance fragment with the artifact's
//!    accumulated provenance.
//! 4. Persist outputs (and sibling source maps) under the destination root.
//!
//! A transform failure removes only the affected artifact. Selection and
//! persistence failures abort the invocation.

use crate::build::{
    default_jobs, resolve, Artifact, ArtifactKind, ConfigurationError, Pattern, PersistenceError,
    PipelineError, PipelineResult, ProvenanceWriter, StageContext, StageDescriptor,
    TransformError,
};
use crate::sourcemap::SourceMap;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Validated, immutable description of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    source: Pattern,
    source_kind: ArtifactKind,
    stages: Vec<StageDescriptor>,
    dest: PathBuf,
    source_maps: bool,
    source_root: Option<String>,
}

impl PipelineDefinition {
    /// Start building a definition.
    ///
    /// # Arguments
    /// - `name` - Pipeline name, used in logs and errors
    /// - `source` - Pattern selecting input files
    /// - `source_kind` - Kind assigned to selected files
    /// - `dest` - Destination root for outputs
    pub fn builder(
        name: impl Into<String>,
        source: Pattern,
        source_kind: ArtifactKind,
        dest: impl Into<PathBuf>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            source,
            source_kind,
            stages: Vec::new(),
            dest: dest.into(),
            source_maps: true,
            source_root: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Pattern {
        &self.source
    }

    pub fn source_kind(&self) -> ArtifactKind {
        self.source_kind
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn source_maps(&self) -> bool {
        self.source_maps
    }

    pub fn source_root(&self) -> Option<&str> {
        self.source_root.as_deref()
    }
}

/// Builder for [`PipelineDefinition`].
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    source: Pattern,
    source_kind: ArtifactKind,
    stages: Vec<StageDescriptor>,
    dest: PathBuf,
    source_maps: bool,
    source_root: Option<String>,
}

impl PipelineBuilder {
    /// Append a stage.
    pub fn stage(mut self, stage: StageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    /// Whether to emit `.map` files for outputs carrying provenance.
    pub fn source_maps(mut self, enabled: bool) -> Self {
        self.source_maps = enabled;
        self
    }

    /// `sourceRoot` written into emitted maps.
    pub fn source_root(mut self, root: impl Into<String>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    /// Validate the composition and produce the definition.
    pub fn build(self) -> Result<PipelineDefinition, ConfigurationError> {
        validate_stages(&self.name, self.source_kind, &self.stages)?;
        Ok(PipelineDefinition {
            name: self.name,
            source: self.source,
            source_kind: self.source_kind,
            stages: self.stages,
            dest: self.dest,
            source_maps: self.source_maps,
            source_root: self.source_root,
        })
    }
}

fn validate_stages(
    pipeline: &str,
    source_kind: ArtifactKind,
    stages: &[StageDescriptor],
) -> Result<(), ConfigurationError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut produced = source_kind;

    for stage in stages {
        if let Some(after) = stage.predecessor() {
            if !seen.contains(after) {
                return Err(ConfigurationError::StageOrder {
                    pipeline: pipeline.to_string(),
                    stage: stage.name().to_string(),
                    after: after.to_string(),
                });
            }
        }
        if !seen.insert(stage.name()) {
            return Err(ConfigurationError::DuplicateStage {
                pipeline: pipeline.to_string(),
                stage: stage.name().to_string(),
            });
        }

        let expected = stage.input().kind();
        if !expected.accepts(produced) {
            return Err(ConfigurationError::IncompatibleStages {
                pipeline: pipeline.to_string(),
                stage: stage.name().to_string(),
                expected,
                found: produced,
            });
        }
        produced = stage.output();
    }

    Ok(())
}

/// In-flight state of one invocation. Dropped when the invocation ends.
struct RunRecord<'a> {
    pipeline: &'a str,
    artifacts: Vec<Artifact>,
    failures: Vec<TransformError>,
}

impl RunRecord<'_> {
    fn fail(&mut self, error: TransformError) {
        tracing::warn!(
            pipeline = self.pipeline,
            stage = %error.stage,
            artifact = %error.artifact,
            line = ?error.line,
            "{}",
            error.message
        );
        self.failures.push(error);
    }
}

/// Executor for one pipeline definition.
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    definition: &'a PipelineDefinition,
    jobs: usize,
}

impl<'a> Pipeline<'a> {
    /// Create an executor using the available parallelism.
    pub fn new(definition: &'a PipelineDefinition) -> Self {
        Self { definition, jobs: default_jobs() }
    }

    /// Bound the number of artifacts processed concurrently (0 = available parallelism).
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = if jobs == 0 { default_jobs() } else { jobs };
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Run one invocation.
    pub fn run(&self) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        let def = self.definition;

        let selection = resolve(def.source(), def.source_kind()).map_err(|source| {
            PipelineError::Selection { pipeline: def.name.clone(), source }
        })?;
        let inputs = selection
            .iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PipelineError::Selection { pipeline: def.name.clone(), source })?;

        tracing::debug!(pipeline = %def.name, inputs = inputs.len(), jobs = self.jobs, "running pipeline");

        let mut record = RunRecord { pipeline: &def.name, artifacts: inputs, failures: Vec::new() };

        let stages = def.stages();
        let mut index = 0;
        while index < stages.len() {
            if stages[index].input().is_fold() {
                self.fold(&stages[index], &mut record);
                index += 1;
            } else {
                let end = stages[index..]
                    .iter()
                    .position(|s| s.input().is_fold())
                    .map_or(stages.len(), |offset| index + offset);
                self.run_each(&stages[index..end], &mut record)?;
                index = end;
            }
        }

        let mut result = PipelineResult::new(def.name(), def.dest());
        self.persist(&mut record, &mut result)?;
        result.failures = record.failures;
        let result = result.with_duration(start.elapsed());

        tracing::debug!(
            pipeline = %def.name,
            written = result.written.len(),
            failed = result.failures.len(),
            "pipeline finished in {:?}",
            result.duration
        );
        Ok(result)
    }

    /// Apply a run of per-artifact stages to every in-flight artifact.
    fn run_each(&self, stages: &[StageDescriptor], record: &mut RunRecord<'_>) -> Result<(), PipelineError> {
        let artifacts = std::mem::take(&mut record.artifacts);

        let outcomes: Vec<Result<Vec<Artifact>, TransformError>> =
            if self.jobs > 1 && artifacts.len() > 1 {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.jobs.min(artifacts.len()))
                    .build()
                    .map_err(|e| PipelineError::Workers {
                        pipeline: self.definition.name.clone(),
                        message: e.to_string(),
                    })?;
                // Indexed parallel collect keeps selector order.
                pool.install(|| {
                    artifacts.into_par_iter().map(|a| self.run_chain(stages, a)).collect()
                })
            } else {
                artifacts.into_iter().map(|a| self.run_chain(stages, a)).collect()
            };

        for outcome in outcomes {
            match outcome {
                Ok(outputs) => record.artifacts.extend(outputs),
                Err(error) => record.fail(error),
            }
        }
        Ok(())
    }

    /// Push one artifact through consecutive per-artifact stages.
    fn run_chain(&self, stages: &[StageDescriptor], artifact: Artifact) -> Result<Vec<Artifact>, TransformError> {
        let mut current = vec![artifact];
        for stage in stages {
            let mut next = Vec::with_capacity(current.len());
            for input in &current {
                next.extend(self.apply(stage, std::slice::from_ref(input))?);
            }
            current = next;
        }
        Ok(current)
    }

    /// Fold the whole in-flight sequence. Skipped when anything upstream failed.
    fn fold(&self, stage: &StageDescriptor, record: &mut RunRecord<'_>) {
        if record.artifacts.is_empty() {
            return;
        }

        let ctx = StageContext { pipeline: &self.definition.name, stage: stage.name() };
        if !record.failures.is_empty() {
            let error = ctx.error(
                self.definition.source().expr(),
                format!("skipped: {} upstream artifact(s) failed", record.failures.len()),
            );
            record.artifacts.clear();
            record.fail(error);
            return;
        }

        match self.apply(stage, &record.artifacts) {
            Ok(outputs) => record.artifacts = outputs,
            Err(error) => {
                record.artifacts.clear();
                record.fail(error);
            }
        }
    }

    /// Call a stage's transform and attach composed provenance to its outputs.
    fn apply(&self, stage: &StageDescriptor, inputs: &[Artifact]) -> Result<Vec<Artifact>, TransformError> {
        let ctx = StageContext { pipeline: &self.definition.name, stage: stage.name() };
        let produced = stage.transform().apply(inputs, &ctx)?;

        produced
            .into_iter()
            .map(|p| {
                let kind = p.artifact.kind();
                if !stage.output().accepts(kind) {
                    return Err(ctx.error(
                        p.artifact.id(),
                        format!("produced {} output but declares {}", kind, stage.output()),
                    ));
                }
                Ok(match p.fragment {
                    Some(fragment) => {
                        let upstream: Vec<Option<&SourceMap>> = fragment
                            .sources()
                            .iter()
                            .map(|s| inputs.iter().find(|a| a.id() == s).and_then(Artifact::provenance))
                            .collect();
                        let composed = fragment.compose(&upstream);
                        p.artifact.with_provenance(composed)
                    }
                    None => p.artifact,
                })
            })
            .collect()
    }

    fn persist(&self, record: &mut RunRecord<'_>, result: &mut PipelineResult) -> Result<(), PipelineError> {
        let def = self.definition;
        let writer = ProvenanceWriter::new(def.source_root.clone());

        for artifact in std::mem::take(&mut record.artifacts) {
            let (output, map) = if def.source_maps {
                match writer.finalize(&artifact) {
                    Ok(Some((output, map))) => (output, Some(map)),
                    Ok(None) => (artifact, None),
                    Err(e) => {
                        let ctx = StageContext { pipeline: &def.name, stage: "provenance" };
                        record.fail(ctx.error(artifact.id(), e.to_string()));
                        continue;
                    }
                }
            } else {
                (artifact, None)
            };

            self.write(&output)?;
            result.written.push(output.id().to_string());

            if let Some(map) = map {
                self.write(&map)?;
                result.provenance_maps.push(map.id().to_string());
            }
        }
        Ok(())
    }

    fn write(&self, artifact: &Artifact) -> Result<(), PipelineError> {
        let path = self.definition.dest.join(artifact.id());
        let fail = |source: std::io::Error| PipelineError::Persistence {
            pipeline: self.definition.name.clone(),
            source: PersistenceError { path: path.clone(), source },
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(fail)?;
        }
        fs::write(&path, artifact.content()).map_err(fail)?;
        tracing::trace!(path = %path.display(), bytes = artifact.content().len(), "wrote output");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{InputConstraint, Produced, SelectionError};
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn create_test_project(files: &[(&str, &str)]) -> (TempDir, Pattern) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        for (name, content) in files {
            create_test_file(&src, name, content);
        }
        let pattern = Pattern::new(&src, "**/*.js").unwrap();
        (temp, pattern)
    }

    fn suffix(name: &str, suffix: &'static str) -> StageDescriptor {
        StageDescriptor::from_fn(
            name,
            InputConstraint::Each(ArtifactKind::Script),
            ArtifactKind::Script,
            move |inputs, _ctx| {
                let a = &inputs[0];
                let text = format!("{}{}", a.text().unwrap_or_default(), suffix);
                Ok(vec![Produced::new(a.derive(a.id(), a.kind(), text))])
            },
        )
    }

    fn failing_on(name: &str, needle: &'static str) -> StageDescriptor {
        StageDescriptor::from_fn(
            name,
            InputConstraint::Each(ArtifactKind::Script),
            ArtifactKind::Script,
            move |inputs, ctx| {
                let a = &inputs[0];
                if a.text().unwrap_or_default().contains(needle) {
                    return Err(ctx.error(a.id(), "syntax error").at_line(1));
                }
                Ok(vec![Produced::new(a.clone())])
            },
        )
    }

    fn concat(name: &str) -> StageDescriptor {
        StageDescriptor::from_fn(
            name,
            InputConstraint::Sequence(ArtifactKind::Script),
            ArtifactKind::Script,
            |inputs, _ctx| {
                let joined: Vec<&str> = inputs.iter().map(|a| a.text().unwrap_or_default()).collect();
                Ok(vec![Produced::new(Artifact::new("bundle.js", ArtifactKind::Script, joined.join("\n")))])
            },
        )
    }

    /// Prepends a header line; every input line moves down by one.
    fn header(name: &str) -> StageDescriptor {
        StageDescriptor::from_fn(
            name,
            InputConstraint::Each(ArtifactKind::Script),
            ArtifactKind::Script,
            |inputs, _ctx| {
                let a = &inputs[0];
                let text = a.text().unwrap_or_default();
                let mut fragment = SourceMap::new();
                let source = fragment.add_source(a.id(), None);
                for (line, _) in text.lines().enumerate() {
                    fragment.add_mapping(crate::sourcemap::Mapping {
                        generated_line: line as u32 + 1,
                        generated_column: 0,
                        source,
                        original_line: line as u32,
                        original_column: 0,
                    });
                }
                let out = a.derive(a.id(), a.kind(), format!("// header\n{}", text));
                Ok(vec![Produced::with_fragment(out, fragment)])
            },
        )
    }

    #[test]
    fn test_build_rejects_incompatible_stages() {
        let (temp, pattern) = create_test_project(&[]);
        let css_only = StageDescriptor::from_fn(
            "minify",
            InputConstraint::Each(ArtifactKind::Css),
            ArtifactKind::Css,
            |inputs, _| Ok(inputs.iter().cloned().map(Produced::new).collect()),
        );
        let err = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, temp.path())
            .stage(css_only)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::IncompatibleStages { .. }));
    }

    #[test]
    fn test_build_rejects_bad_ordering() {
        let (temp, pattern) = create_test_project(&[]);
        let err = PipelineDefinition::builder("scripts", pattern.clone(), ArtifactKind::Script, temp.path())
            .stage(suffix("minify", "").after("concat"))
            .stage(concat("concat"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::StageOrder {
                pipeline: "scripts".into(),
                stage: "minify".into(),
                after: "concat".into()
            }
        );

        let ok = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, temp.path())
            .stage(concat("concat"))
            .stage(suffix("minify", "").after("concat"))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_build_rejects_duplicate_stage() {
        let (temp, pattern) = create_test_project(&[]);
        let err = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, temp.path())
            .stage(suffix("a", "1"))
            .stage(suffix("a", "2"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateStage { .. }));
    }

    #[test]
    fn test_zero_stage_pipeline_copies() {
        let (temp, pattern) = create_test_project(&[("a.js", "a"), ("lib/b.js", "b")]);
        let dest = temp.path().join("dist");
        let def = PipelineDefinition::builder("copy", pattern, ArtifactKind::Script, &dest)
            .build()
            .unwrap();

        let result = Pipeline::new(&def).run().unwrap();
        assert!(result.is_success());
        assert_eq!(result.written, vec!["a.js", "lib/b.js"]);
        assert!(result.provenance_maps.is_empty());
        assert_eq!(fs::read_to_string(dest.join("lib/b.js")).unwrap(), "b");
    }

    #[test]
    fn test_failure_is_isolated() {
        let (temp, pattern) =
            create_test_project(&[("a.js", "good"), ("b.js", "BAD"), ("c.js", "fine")]);
        let dest = temp.path().join("dist");
        let def = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, &dest)
            .stage(failing_on("check", "BAD"))
            .stage(suffix("mark", "!"))
            .source_maps(false)
            .build()
            .unwrap();

        let result = Pipeline::new(&def).with_jobs(3).run().unwrap();
        assert!(!result.is_success());
        assert_eq!(result.written, vec!["a.js", "c.js"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].artifact, "b.js");
        assert_eq!(result.failures[0].stage, "check");
        assert_eq!(fs::read_to_string(dest.join("c.js")).unwrap(), "fine!");
        assert!(!dest.join("b.js").exists());
    }

    #[test]
    fn test_fold_preserves_selector_order() {
        let (temp, pattern) = create_test_project(&[("y.js", "Y"), ("x.js", "X"), ("a/z.js", "Z")]);
        let dest = temp.path().join("dist");
        let def = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, &dest)
            .stage(suffix("transpile", ";"))
            .stage(concat("concat"))
            .stage(suffix("minify", "").after("concat"))
            .source_maps(false)
            .build()
            .unwrap();

        let result = Pipeline::new(&def).run().unwrap();
        assert_eq!(result.written, vec!["bundle.js"]);
        assert_eq!(fs::read_to_string(dest.join("bundle.js")).unwrap(), "Z;\nX;\nY;");
    }

    #[test]
    fn test_fold_skipped_after_upstream_failure() {
        let (temp, pattern) = create_test_project(&[("x.js", "X"), ("y.js", "BAD")]);
        let dest = temp.path().join("dist");
        let def = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, &dest)
            .stage(failing_on("transpile", "BAD"))
            .stage(concat("concat"))
            .build()
            .unwrap();

        let result = Pipeline::new(&def).run().unwrap();
        assert!(result.written.is_empty());
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[1].stage, "concat");
        assert!(result.failures[1].message.contains("skipped"));
        assert!(!dest.join("bundle.js").exists());
    }

    #[test]
    fn test_provenance_composes_across_stages() {
        let (temp, pattern) = create_test_project(&[("a.js", "one\ntwo")]);
        let dest = temp.path().join("dist");
        let def = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, &dest)
            .stage(header("first"))
            .stage(suffix("noop", ""))
            .stage(header("second"))
            .source_root("/source/")
            .build()
            .unwrap();

        let result = Pipeline::new(&def).run().unwrap();
        assert_eq!(result.provenance_map(), Some("a.js.map"));

        let output = fs::read_to_string(dest.join("a.js")).unwrap();
        assert!(output.starts_with("// header\n// header\none\ntwo\n"));
        assert!(output.ends_with("//# sourceMappingURL=a.js.map\n"));

        let map = SourceMap::from_json(&fs::read_to_string(dest.join("a.js.map")).unwrap()).unwrap();
        assert_eq!(map.sources(), &["a.js".to_string()]);
        assert_eq!(map.original_position(2, 0), Some(("a.js", 0, 0)));
        assert_eq!(map.original_position(3, 0), Some(("a.js", 1, 0)));
        assert_eq!(map.original_position(0, 0), None);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let files: Vec<(String, String)> =
            (0..12).map(|i| (format!("f{:02}.js", i), format!("body {}", i))).collect();
        let refs: Vec<(&str, &str)> = files.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
        let (temp, pattern) = create_test_project(&refs);

        let seq_dest = temp.path().join("seq");
        let par_dest = temp.path().join("par");
        let build = |dest: &Path| {
            PipelineDefinition::builder("scripts", pattern.clone(), ArtifactKind::Script, dest)
                .stage(header("h"))
                .stage(suffix("s", "\n"))
                .build()
                .unwrap()
        };
        let seq = build(&seq_dest);
        let par = build(&par_dest);

        let a = Pipeline::new(&seq).with_jobs(1).run().unwrap();
        let b = Pipeline::new(&par).with_jobs(4).run().unwrap();
        assert_eq!(a.written, b.written);
        for id in a.written.iter().chain(a.provenance_maps.iter()) {
            assert_eq!(fs::read(seq_dest.join(id)).unwrap(), fs::read(par_dest.join(id)).unwrap());
        }
    }

    #[test]
    fn test_missing_root_is_selection_error() {
        let temp = TempDir::new().unwrap();
        let pattern = Pattern::new(temp.path().join("missing"), "*.js").unwrap();
        let def = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, temp.path())
            .build()
            .unwrap();
        let err = Pipeline::new(&def).run().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Selection { source: SelectionError::RootNotFound(_), .. }
        ));
    }

    #[test]
    fn test_unwritable_dest_is_persistence_error() {
        let (temp, pattern) = create_test_project(&[("a.js", "a")]);
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let def = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, &blocker)
            .build()
            .unwrap();
        let err = Pipeline::new(&def).run().unwrap_err();
        assert!(matches!(err, PipelineError::Persistence { .. }));
    }

    #[test]
    fn test_wrong_output_kind_is_transform_error() {
        let (temp, pattern) = create_test_project(&[("a.js", "a")]);
        let liar = StageDescriptor::from_fn(
            "liar",
            InputConstraint::Each(ArtifactKind::Script),
            ArtifactKind::Script,
            |inputs, _| {
                let a = &inputs[0];
                Ok(vec![Produced::new(a.derive(a.id(), ArtifactKind::Css, "x"))])
            },
        );
        let def = PipelineDefinition::builder("scripts", pattern, ArtifactKind::Script, temp.path().join("d"))
            .stage(liar)
            .build()
            .unwrap();
        let result = Pipeline::new(&def).run().unwrap();
        assert_eq!(result.failures.len(), 1);
        assert!(result.written.is_empty());
    }
}
