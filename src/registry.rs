//! Task registry
//!
//! Maps task names to runnable units: pipeline invocations and references to
//! other tasks. Registration rejects duplicate names and cyclic references.
//! Running a composite task runs its children concurrently when their
//! destination roots are disjoint and in declaration order when they overlap.

use crate::build::{default_jobs, ConfigurationError, Pattern, Pipeline, PipelineDefinition, PipelineError, PipelineResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// One runnable element of a task.
#[derive(Debug, Clone)]
pub enum TaskUnit {
    /// Run a pipeline once
    Pipeline(Arc<PipelineDefinition>),
    /// Run another registered task
    Task(String),
}

/// Re-trigger `task` when a file selected by `pattern` changes.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub pattern: Pattern,
    pub task: String,
}

/// A named, user-invocable unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    description: Option<String>,
    units: Vec<TaskUnit>,
    watch: Option<WatchBinding>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, units: Vec::new(), watch: None }
    }

    /// Add a pipeline unit.
    pub fn pipeline(mut self, definition: PipelineDefinition) -> Self {
        self.units.push(TaskUnit::Pipeline(Arc::new(definition)));
        self
    }

    /// Add a reference to another task.
    pub fn subtask(mut self, name: impl Into<String>) -> Self {
        self.units.push(TaskUnit::Task(name.into()));
        self
    }

    /// Bind a watch trigger.
    pub fn watch(mut self, pattern: Pattern, task: impl Into<String>) -> Self {
        self.watch = Some(WatchBinding { pattern, task: task.into() });
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn units(&self) -> &[TaskUnit] {
        &self.units
    }

    pub fn watch_binding(&self) -> Option<&WatchBinding> {
        self.watch.as_ref()
    }

    fn subtasks(&self) -> impl Iterator<Item = &str> {
        self.units.iter().filter_map(|u| match u {
            TaskUnit::Task(name) => Some(name.as_str()),
            TaskUnit::Pipeline(_) => None,
        })
    }
}

/// Error running a task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("task '{task}': {source}")]
    Pipeline {
        task: String,
        #[source]
        source: PipelineError,
    },
}

/// Outcome of running a task and everything it contains.
#[derive(Debug, Default)]
pub struct TaskReport {
    pub task: String,
    /// Pipeline results, in declaration order
    pub pipelines: Vec<PipelineResult>,
    /// Reports of referenced tasks, in declaration order
    pub subtasks: Vec<TaskReport>,
    /// Invocation-level errors (a pipeline that could not run or persist)
    pub errors: Vec<TaskError>,
    pub duration: Duration,
}

impl TaskReport {
    fn new(task: &str) -> Self {
        Self { task: task.to_string(), ..Default::default() }
    }

    /// No invocation errors and no artifact failures, recursively.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
            && self.pipelines.iter().all(PipelineResult::is_success)
            && self.subtasks.iter().all(TaskReport::is_success)
    }

    /// Every pipeline result, depth first.
    pub fn all_results(&self) -> Vec<&PipelineResult> {
        let mut out: Vec<&PipelineResult> = self.pipelines.iter().collect();
        for sub in &self.subtasks {
            out.extend(sub.all_results());
        }
        out
    }

    /// Absolute paths of every written output.
    pub fn all_written(&self) -> Vec<PathBuf> {
        self.all_results().into_iter().flat_map(PipelineResult::written_paths).collect()
    }

    /// One line per artifact failure or invocation error, depth first.
    pub fn failures(&self) -> Vec<String> {
        let mut out: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        for result in &self.pipelines {
            out.extend(result.failures.iter().map(|f| format!("{}: {}", result.pipeline, f)));
        }
        for sub in &self.subtasks {
            out.extend(sub.failures());
        }
        out
    }

    /// Format a summary of the run.
    pub fn summary(&self) -> String {
        let results = self.all_results();
        let written: usize = results.iter().map(|r| r.written.len()).sum();
        let maps: usize = results.iter().map(|r| r.provenance_maps.len()).sum();
        let failures = self.failures();

        let mut lines = Vec::new();
        if failures.is_empty() {
            lines.push(format!(
                "Task '{}' succeeded: {} pipeline(s), {} file(s), {} source map(s) in {:?}",
                self.task,
                results.len(),
                written,
                maps,
                self.duration
            ));
        } else {
            lines.push(format!(
                "Task '{}' failed: {} error(s), {} file(s) written",
                self.task,
                failures.len(),
                written
            ));
            for failure in &failures {
                lines.push(format!("  - {}", failure));
            }
        }
        lines.join("\n")
    }
}

struct TaskEntry {
    task: Task,
    /// Held for the duration of a run: one invocation per task at a time.
    running: Mutex<()>,
}

enum UnitOutcome {
    Pipeline(Result<PipelineResult, PipelineError>),
    Task(Result<TaskReport, TaskError>),
}

/// Registry of tasks, constructed once at startup.
pub struct TaskRegistry {
    tasks: HashMap<String, TaskEntry>,
    order: Vec<String>,
    jobs: usize,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { tasks: HashMap::new(), order: Vec::new(), jobs: default_jobs() }
    }

    /// Bound per-pipeline artifact parallelism (0 = available parallelism).
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = if jobs == 0 { default_jobs() } else { jobs };
        self
    }

    /// Register a task.
    ///
    /// References to tasks not registered yet are allowed; [`validate`]
    /// reports any that are still missing.
    ///
    /// [`validate`]: TaskRegistry::validate
    pub fn register(&mut self, task: Task) -> Result<(), ConfigurationError> {
        if self.tasks.contains_key(&task.name) {
            return Err(ConfigurationError::DuplicateTask(task.name.clone()));
        }
        if let Some(path) = self.find_cycle(&task) {
            return Err(ConfigurationError::CyclicTask(path));
        }

        tracing::trace!(task = %task.name, units = task.units.len(), "registered task");
        self.order.push(task.name.clone());
        self.tasks.insert(task.name.clone(), TaskEntry { task, running: Mutex::new(()) });
        Ok(())
    }

    /// Path `task -> ... -> task` through unit references, if one exists.
    fn find_cycle(&self, task: &Task) -> Option<Vec<String>> {
        let mut path = vec![task.name.clone()];
        let mut visited = HashSet::new();
        if self.reaches(task, &task.name, &mut path, &mut visited) {
            Some(path)
        } else {
            None
        }
    }

    fn reaches(
        &self,
        from: &Task,
        target: &str,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> bool {
        for next in from.subtasks() {
            path.push(next.to_string());
            if next == target {
                return true;
            }
            if visited.insert(next.to_string()) {
                if let Some(entry) = self.tasks.get(next) {
                    if self.reaches(&entry.task, target, path, visited) {
                        return true;
                    }
                }
            }
            path.pop();
        }
        false
    }

    /// Check that every task and watch reference resolves.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for name in &self.order {
            let Some(entry) = self.tasks.get(name) else { continue };
            let task = &entry.task;
            let watch_target = task.watch.as_ref().map(|w| w.task.as_str());
            for reference in task.subtasks().chain(watch_target) {
                if !self.tasks.contains_key(reference) {
                    return Err(ConfigurationError::UnknownTask {
                        task: task.name.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name).map(|e| &e.task)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Task names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run a task's units once.
    ///
    /// Blocks while another invocation of the same task is in flight.
    /// Invocation errors of individual pipelines are collected in the report;
    /// only an unknown task name is returned as an error.
    pub fn run(&self, name: &str) -> Result<TaskReport, TaskError> {
        let entry = self.tasks.get(name).ok_or_else(|| TaskError::UnknownTask(name.to_string()))?;
        let _running = entry.running.lock().unwrap_or_else(PoisonError::into_inner);

        let start = Instant::now();
        let units = entry.task.units();
        tracing::info!(task = name, units = units.len(), "running task");

        let groups = self.write_groups(units);
        tracing::debug!(task = name, groups = groups.len(), "scheduled units");

        let mut outcomes: Vec<Option<UnitOutcome>> = (0..units.len()).map(|_| None).collect();
        if groups.len() <= 1 {
            for &index in groups.iter().flatten() {
                outcomes[index] = Some(self.run_unit(&units[index]));
            }
        } else {
            let finished: Vec<Vec<(usize, UnitOutcome)>> = std::thread::scope(|s| {
                let handles: Vec<_> = groups
                    .iter()
                    .map(|group| {
                        s.spawn(move || {
                            group.iter().map(|&i| (i, self.run_unit(&units[i]))).collect::<Vec<_>>()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            });
            for (index, outcome) in finished.into_iter().flatten() {
                outcomes[index] = Some(outcome);
            }
        }

        let mut report = TaskReport::new(name);
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                UnitOutcome::Pipeline(Ok(result)) => report.pipelines.push(result),
                UnitOutcome::Pipeline(Err(source)) => {
                    tracing::error!(task = name, "{}", source);
                    report.errors.push(TaskError::Pipeline { task: name.to_string(), source });
                }
                UnitOutcome::Task(Ok(sub)) => report.subtasks.push(sub),
                UnitOutcome::Task(Err(e)) => report.errors.push(e),
            }
        }
        report.duration = start.elapsed();
        Ok(report)
    }

    fn run_unit(&self, unit: &TaskUnit) -> UnitOutcome {
        match unit {
            TaskUnit::Pipeline(def) => UnitOutcome::Pipeline(Pipeline::new(def).with_jobs(self.jobs).run()),
            TaskUnit::Task(name) => UnitOutcome::Task(self.run(name)),
        }
    }

    /// Destination roots a unit writes under.
    fn dest_roots(&self, unit: &TaskUnit, seen: &mut HashSet<String>) -> Vec<PathBuf> {
        match unit {
            TaskUnit::Pipeline(def) => vec![def.dest().to_path_buf()],
            TaskUnit::Task(name) => {
                if !seen.insert(name.clone()) {
                    return Vec::new();
                }
                self.tasks
                    .get(name)
                    .map(|e| e.task.units.iter().flat_map(|u| self.dest_roots(u, seen)).collect())
                    .unwrap_or_default()
            }
        }
    }

    /// Partition unit indices into groups whose destination roots overlap.
    /// Groups keep declaration order, as do the units inside them.
    fn write_groups(&self, units: &[TaskUnit]) -> Vec<Vec<usize>> {
        let roots: Vec<Vec<PathBuf>> =
            units.iter().map(|u| self.dest_roots(u, &mut HashSet::new())).collect();

        let mut parent: Vec<usize> = (0..units.len()).collect();
        fn find(parent: &mut [usize], i: usize) -> usize {
            let mut root = i;
            while parent[root] != root {
                root = parent[root];
            }
            parent[i] = root;
            root
        }

        for a in 0..units.len() {
            for b in (a + 1)..units.len() {
                if roots_overlap(&roots[a], &roots[b]) {
                    let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
                    if ra != rb {
                        parent[ra.max(rb)] = ra.min(rb);
                    }
                }
            }
        }

        let mut groups: Vec<(usize, Vec<usize>)> = Vec::new();
        for i in 0..units.len() {
            let root = find(&mut parent, i);
            match groups.iter_mut().find(|(r, _)| *r == root) {
                Some((_, members)) => members.push(i),
                None => groups.push((root, vec![i])),
            }
        }
        groups.into_iter().map(|(_, members)| members).collect()
    }
}

fn roots_overlap(a: &[PathBuf], b: &[PathBuf]) -> bool {
    a.iter().any(|x| b.iter().any(|y| paths_overlap(x, y)))
}

/// One root contains the other (or they are equal).
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{ArtifactKind, InputConstraint, Produced, StageDescriptor};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn copy_pipeline(temp: &Path, name: &str, dest: &str) -> PipelineDefinition {
        let src = temp.join("src").join(name);
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join(format!("{}.txt", name)), name).unwrap();
        PipelineDefinition::builder(
            name,
            Pattern::new(src, "*.txt").unwrap(),
            ArtifactKind::Any,
            temp.join(dest),
        )
        .build()
        .unwrap()
    }

    fn empty(name: &str) -> Task {
        Task::new(name)
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = TaskRegistry::new();
        registry.register(empty("styles")).unwrap();
        assert_eq!(
            registry.register(empty("styles")).unwrap_err(),
            ConfigurationError::DuplicateTask("styles".to_string())
        );
    }

    #[test]
    fn test_register_direct_cycle() {
        let mut registry = TaskRegistry::new();
        let err = registry.register(Task::new("loop").subtask("loop")).unwrap_err();
        assert_eq!(err, ConfigurationError::CyclicTask(vec!["loop".into(), "loop".into()]));
        assert!(!registry.contains("loop"));
    }

    #[test]
    fn test_register_transitive_cycle() {
        let mut registry = TaskRegistry::new();
        registry.register(Task::new("a").subtask("b")).unwrap();
        registry.register(Task::new("b").subtask("c")).unwrap();
        let err = registry.register(Task::new("c").subtask("a")).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::CyclicTask(vec!["c".into(), "a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut registry = TaskRegistry::new();
        registry.register(empty("leaf")).unwrap();
        registry.register(Task::new("left").subtask("leaf")).unwrap();
        registry.register(Task::new("right").subtask("leaf")).unwrap();
        registry.register(Task::new("top").subtask("left").subtask("right")).unwrap();
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_reference() {
        let temp = TempDir::new().unwrap();
        let mut registry = TaskRegistry::new();
        registry.register(Task::new("default").subtask("styles")).unwrap();
        assert_eq!(
            registry.validate().unwrap_err(),
            ConfigurationError::UnknownTask { task: "default".into(), reference: "styles".into() }
        );

        registry
            .register(Task::new("watcher").watch(Pattern::new(temp.path(), "*").unwrap(), "nope"))
            .unwrap();
        registry.register(empty("styles")).unwrap();
        assert!(matches!(
            registry.validate().unwrap_err(),
            ConfigurationError::UnknownTask { reference, .. } if reference == "nope"
        ));
    }

    #[test]
    fn test_run_unknown_task() {
        let registry = TaskRegistry::new();
        assert!(matches!(registry.run("missing"), Err(TaskError::UnknownTask(_))));
    }

    #[test]
    fn test_run_composite() {
        let temp = TempDir::new().unwrap();
        let mut registry = TaskRegistry::new().with_jobs(2);
        registry.register(Task::new("css").pipeline(copy_pipeline(temp.path(), "css", "dist/css"))).unwrap();
        registry.register(Task::new("js").pipeline(copy_pipeline(temp.path(), "js", "dist/js"))).unwrap();
        registry
            .register(
                Task::new("all")
                    .subtask("css")
                    .subtask("js")
                    .pipeline(copy_pipeline(temp.path(), "html", "dist")),
            )
            .unwrap();
        registry.validate().unwrap();

        let report = registry.run("all").unwrap();
        assert!(report.is_success());
        assert_eq!(report.subtasks.len(), 2);
        assert_eq!(report.subtasks[0].task, "css");
        assert_eq!(report.pipelines.len(), 1);
        assert_eq!(report.all_written().len(), 3);
        assert!(temp.path().join("dist/css/css.txt").exists());
        assert!(temp.path().join("dist/js/js.txt").exists());
        assert!(temp.path().join("dist/html.txt").exists());
        assert!(report.summary().starts_with("Task 'all' succeeded: 3 pipeline(s), 3 file(s)"));
    }

    #[test]
    fn test_write_groups() {
        let temp = TempDir::new().unwrap();
        let mut registry = TaskRegistry::new();
        registry.register(Task::new("css").pipeline(copy_pipeline(temp.path(), "css", "dist/css"))).unwrap();
        registry.register(Task::new("js").pipeline(copy_pipeline(temp.path(), "js", "dist/js"))).unwrap();
        registry.register(empty("noop")).unwrap();

        let units = vec![
            TaskUnit::Task("css".into()),
            TaskUnit::Task("js".into()),
            TaskUnit::Task("noop".into()),
            TaskUnit::Pipeline(Arc::new(copy_pipeline(temp.path(), "other", "elsewhere"))),
        ];
        assert_eq!(registry.write_groups(&units), vec![vec![0], vec![1], vec![2], vec![3]]);

        let units = vec![
            TaskUnit::Task("css".into()),
            TaskUnit::Task("js".into()),
            TaskUnit::Pipeline(Arc::new(copy_pipeline(temp.path(), "html", "dist"))),
        ];
        assert_eq!(registry.write_groups(&units), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_overlapping_children_run_in_order() {
        let temp = TempDir::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let logging = |name: &'static str| {
            let log = Arc::clone(&log);
            StageDescriptor::from_fn(
                name,
                InputConstraint::Each(ArtifactKind::Any),
                ArtifactKind::Any,
                move |inputs, _| {
                    log.lock().unwrap().push(format!("start {}", name));
                    std::thread::sleep(Duration::from_millis(30));
                    log.lock().unwrap().push(format!("end {}", name));
                    Ok(inputs.iter().cloned().map(Produced::new).collect())
                },
            )
        };

        let build = |name: &'static str| {
            let src = temp.path().join("src").join(name);
            fs::create_dir_all(&src).unwrap();
            fs::write(src.join("f.txt"), name).unwrap();
            PipelineDefinition::builder(
                name,
                Pattern::new(src, "*.txt").unwrap(),
                ArtifactKind::Any,
                temp.path().join("dist").join(name),
            )
            .stage(logging(name))
            .build()
            .unwrap()
        };

        let mut registry = TaskRegistry::new();
        let shared_root = PipelineDefinition::builder(
            "root",
            Pattern::new(temp.path().join("src"), "*.none").unwrap(),
            ArtifactKind::Any,
            temp.path().join("dist"),
        )
        .build()
        .unwrap();
        registry
            .register(Task::new("both").pipeline(build("first")).pipeline(shared_root).pipeline(build("second")))
            .unwrap();

        let report = registry.run("both").unwrap();
        assert!(report.is_success());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start first", "end first", "start second", "end second"]
        );
    }

    #[test]
    fn test_single_flight_per_task() {
        let temp = TempDir::new().unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("one.txt"), "1").unwrap();

        let stage = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            StageDescriptor::from_fn(
                "slow",
                InputConstraint::Each(ArtifactKind::Any),
                ArtifactKind::Any,
                move |inputs, _| {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(40));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(inputs.iter().cloned().map(Produced::new).collect())
                },
            )
        };
        let def = PipelineDefinition::builder("slow", Pattern::new(&src, "*.txt").unwrap(), ArtifactKind::Any, temp.path().join("dist"))
            .stage(stage)
            .build()
            .unwrap();

        let mut registry = TaskRegistry::new();
        registry.register(Task::new("slow").pipeline(def)).unwrap();

        std::thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| registry.run("slow").unwrap());
            }
        });
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pipeline_error_collected() {
        let temp = TempDir::new().unwrap();
        let missing = PipelineDefinition::builder(
            "missing",
            Pattern::new(temp.path().join("nope"), "*").unwrap(),
            ArtifactKind::Any,
            temp.path().join("out/a"),
        )
        .build()
        .unwrap();

        let mut registry = TaskRegistry::new();
        registry
            .register(
                Task::new("mixed")
                    .pipeline(missing)
                    .pipeline(copy_pipeline(temp.path(), "ok", "out/b")),
            )
            .unwrap();

        let report = registry.run("mixed").unwrap();
        assert!(!report.is_success());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.pipelines.len(), 1);
        assert!(temp.path().join("out/b/ok.txt").exists());
        assert!(report.summary().contains("pattern root does not exist"));
    }

    #[test]
    fn test_paths_overlap() {
        assert!(paths_overlap(Path::new("/d"), Path::new("/d/css")));
        assert!(paths_overlap(Path::new("/d/css"), Path::new("/d/css")));
        assert!(!paths_overlap(Path::new("/d/css"), Path::new("/d/cssx")));
        assert!(!paths_overlap(Path::new("/d/css"), Path::new("/d/js")));
    }
}
