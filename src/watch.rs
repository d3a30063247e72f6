//! Watch mode: re-run a task when its bound files change
//!
//! [`WatchTrigger`] is the scheduling core, independent of the filesystem:
//!
//! ```text
//! Idle --arm--> Armed --fire--> Triggered --worker--> Running --done--> Armed
//!                 |                                      |   (pending fire: --> Triggered)
//!                 +--------------stop-------------------+--> Stopped
//! ```
//!
//! Fires arriving while a run is queued or in flight collapse into a single
//! pending follow-up run. Stopping drains the in-flight run and drops any
//! pending one. [`WatchSession`] connects a trigger to debounced filesystem
//! notifications for a [`WatchBinding`]'s pattern.

use crate::config::WatchConfig;
use crate::registry::{TaskReport, WatchBinding};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error during watch mode
#[derive(Debug, Error)]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(#[source] notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch path: {0}")]
    WatchPath(#[source] notify::Error),
    /// Watched root not found
    #[error("Watch root not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    /// Failed to start the worker thread
    #[error("Failed to start watch worker: {0}")]
    Worker(#[source] std::io::Error),
}

/// Trigger lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Armed,
    Triggered,
    Running,
    Stopped,
}

/// What a [`WatchTrigger::fire`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// A run was scheduled
    Triggered,
    /// Folded into an already queued or pending run
    Coalesced,
    /// Not armed (idle, stopping or stopped)
    Ignored,
}

#[derive(Debug)]
struct TriggerInner {
    state: TriggerState,
    pending: bool,
    stop_requested: bool,
    runs: u64,
}

/// Debounce-independent watch scheduling: at most one invocation in flight,
/// at most one follow-up queued.
#[derive(Debug)]
pub struct WatchTrigger {
    inner: Mutex<TriggerInner>,
    changed: Condvar,
}

impl Default for WatchTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchTrigger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TriggerInner {
                state: TriggerState::Idle,
                pending: false,
                stop_requested: false,
                runs: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TriggerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut TriggerInner, state: TriggerState) {
        tracing::debug!(from = ?inner.state, to = ?state, "watch trigger");
        inner.state = state;
        self.changed.notify_all();
    }

    pub fn state(&self) -> TriggerState {
        self.lock().state
    }

    /// Completed invocations so far.
    pub fn runs(&self) -> u64 {
        self.lock().runs
    }

    /// Whether a follow-up run is queued behind the current one.
    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    /// `Idle -> Armed`. Returns false in any other state.
    pub fn arm(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != TriggerState::Idle || inner.stop_requested {
            return false;
        }
        self.set_state(&mut inner, TriggerState::Armed);
        true
    }

    /// Report a matching change notification.
    pub fn fire(&self) -> FireOutcome {
        let mut inner = self.lock();
        if inner.stop_requested {
            return FireOutcome::Ignored;
        }
        match inner.state {
            TriggerState::Armed => {
                self.set_state(&mut inner, TriggerState::Triggered);
                FireOutcome::Triggered
            }
            TriggerState::Triggered => FireOutcome::Coalesced,
            TriggerState::Running => {
                inner.pending = true;
                FireOutcome::Coalesced
            }
            TriggerState::Idle | TriggerState::Stopped => FireOutcome::Ignored,
        }
    }

    /// Request shutdown. Does not wait; [`run`](Self::run) returns once the
    /// in-flight invocation (if any) completes.
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.stop_requested = true;
        inner.pending = false;
        match inner.state {
            TriggerState::Idle => self.set_state(&mut inner, TriggerState::Stopped),
            _ => self.changed.notify_all(),
        }
    }

    /// Worker loop: invoke once per trigger until stopped.
    ///
    /// Returns the number of completed invocations. Returns immediately when
    /// the trigger was never armed.
    pub fn run<F: FnMut()>(&self, mut invoke: F) -> u64 {
        let mut inner = self.lock();
        loop {
            while inner.state == TriggerState::Armed && !inner.stop_requested {
                inner = self.changed.wait(inner).unwrap_or_else(PoisonError::into_inner);
            }

            if inner.stop_requested {
                inner.pending = false;
                if inner.state != TriggerState::Stopped {
                    self.set_state(&mut inner, TriggerState::Stopped);
                }
                return inner.runs;
            }

            if inner.state != TriggerState::Triggered {
                return inner.runs;
            }

            self.set_state(&mut inner, TriggerState::Running);
            drop(inner);

            invoke();

            inner = self.lock();
            inner.runs += 1;
            if inner.pending && !inner.stop_requested {
                inner.pending = false;
                self.set_state(&mut inner, TriggerState::Triggered);
            } else {
                inner.pending = false;
                self.set_state(&mut inner, TriggerState::Armed);
            }
        }
    }

    /// Block until `pred(state, runs)` holds or `timeout` elapses.
    pub fn wait_until<P>(&self, pred: P, timeout: Duration) -> bool
    where
        P: Fn(TriggerState, u64) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if pred(inner.state, inner.runs) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = self
                .changed
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

/// A live filesystem subscription driving a [`WatchTrigger`].
pub struct WatchSession {
    trigger: Arc<WatchTrigger>,
    worker: Option<JoinHandle<u64>>,
    debouncer: Option<Debouncer<RecommendedWatcher>>,
}

impl WatchSession {
    /// Subscribe to the binding's pattern and start the worker.
    ///
    /// `invoke` runs on the worker thread once per (coalesced) trigger.
    pub fn start<F>(binding: &WatchBinding, config: &WatchConfig, invoke: F) -> Result<Self, WatchError>
    where
        F: FnMut() + Send + 'static,
    {
        let root = binding.pattern.root().to_path_buf();
        if !root.is_dir() {
            return Err(WatchError::SourceNotFound(root));
        }

        let trigger = Arc::new(WatchTrigger::new());
        trigger.arm();

        // Backends may report canonical paths (e.g. /private/var on macOS).
        let pattern = binding.pattern.clone();
        let canonical = std::fs::canonicalize(&root).ok().map(|c| pattern.with_root(c));

        let events_trigger = Arc::clone(&trigger);
        let handler = move |result: DebounceEventResult| match result {
            Ok(events) => {
                let changed: HashSet<String> = events
                    .iter()
                    .filter_map(|e| {
                        pattern
                            .relative_id(&e.path)
                            .or_else(|| canonical.as_ref().and_then(|p| p.relative_id(&e.path)))
                    })
                    .collect();
                if changed.is_empty() {
                    return;
                }

                let mut changed: Vec<String> = changed.into_iter().collect();
                changed.sort();
                for id in &changed {
                    println!("[{}] Changed: {}", timestamp(), id);
                }

                match events_trigger.fire() {
                    FireOutcome::Triggered => tracing::debug!(files = changed.len(), "run scheduled"),
                    FireOutcome::Coalesced => tracing::debug!(files = changed.len(), "coalesced into pending run"),
                    FireOutcome::Ignored => tracing::debug!("trigger not armed, change ignored"),
                }
            }
            Err(error) => tracing::warn!(%error, "watch error, continuing"),
        };

        let debounce = Duration::from_millis(u64::from(config.debounce_ms));
        let mut debouncer = new_debouncer(debounce, handler).map_err(WatchError::WatcherInit)?;
        debouncer.watcher().watch(&root, RecursiveMode::Recursive).map_err(WatchError::WatchPath)?;

        let worker_trigger = Arc::clone(&trigger);
        let worker = std::thread::Builder::new()
            .name("assetflow-watch".to_string())
            .spawn(move || worker_trigger.run(invoke))
            .map_err(WatchError::Worker)?;

        tracing::info!(pattern = %binding.pattern, task = %binding.task, "watching");
        Ok(Self { trigger, worker: Some(worker), debouncer: Some(debouncer) })
    }

    pub fn trigger(&self) -> &WatchTrigger {
        &self.trigger
    }

    /// Stop: drain the in-flight run, then release the subscription.
    /// Returns the number of completed runs.
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    /// Block until the trigger is stopped from elsewhere.
    pub fn wait(mut self) -> u64 {
        let runs = self.join_worker();
        self.debouncer.take();
        runs
    }

    fn shutdown(&mut self) -> u64 {
        self.trigger.stop();
        let runs = self.join_worker();
        self.debouncer.take();
        runs
    }

    fn join_worker(&mut self) -> u64 {
        match self.worker.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| self.trigger.runs()),
            None => self.trigger.runs(),
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

/// Tracks failing artifacts across runs for recovery detection
#[derive(Debug, Default)]
pub struct ErrorTracker {
    /// `pipeline/artifact` keys that failed in the previous run
    failing: HashSet<String>,
}

impl ErrorTracker {
    /// Create a new error tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Update tracker with a new report, returns the artifacts fixed since the last run
    pub fn update(&mut self, report: &TaskReport) -> Vec<String> {
        let current: HashSet<String> = report
            .all_results()
            .into_iter()
            .flat_map(|r| r.failures.iter().map(move |f| format!("{}/{}", r.pipeline, f.artifact)))
            .collect();

        let mut fixed: Vec<String> = self.failing.difference(&current).cloned().collect();
        fixed.sort();

        self.failing = current;
        fixed
    }

    /// Check if there are any tracked errors
    pub fn has_errors(&self) -> bool {
        !self.failing.is_empty()
    }

    /// Get the number of failing artifacts
    pub fn error_count(&self) -> usize {
        self.failing.len()
    }
}

/// Format duration for display
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Get current timestamp for logging
pub fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400;
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Print a watch-mode run report with fixed-artifact notifications
pub fn print_report(report: &TaskReport, fixed: &[String]) {
    for name in fixed {
        println!("[{}] Fixed: {}", timestamp(), name);
    }

    let written = report.all_written().len();
    if report.is_success() {
        println!(
            "[{}] Build complete ({}) - {} file(s) written",
            timestamp(),
            format_duration(report.duration),
            written
        );
    } else {
        let failures = report.failures();
        println!(
            "[{}] Build failed ({}) - {} error{}",
            timestamp(),
            format_duration(report.duration),
            failures.len(),
            if failures.len() == 1 { "" } else { "s" }
        );
        for failure in &failures {
            eprintln!("[{}] Error: {}", timestamp(), failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{PipelineResult, TransformError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_trigger_transitions() {
        let trigger = WatchTrigger::new();
        assert_eq!(trigger.state(), TriggerState::Idle);
        assert_eq!(trigger.fire(), FireOutcome::Ignored);

        assert!(trigger.arm());
        assert!(!trigger.arm());
        assert_eq!(trigger.state(), TriggerState::Armed);

        assert_eq!(trigger.fire(), FireOutcome::Triggered);
        assert_eq!(trigger.state(), TriggerState::Triggered);
        assert_eq!(trigger.fire(), FireOutcome::Coalesced);
    }

    #[test]
    fn test_run_once_per_trigger() {
        let trigger = Arc::new(WatchTrigger::new());
        trigger.arm();
        let count = Arc::new(AtomicU64::new(0));

        let worker = {
            let trigger = Arc::clone(&trigger);
            let count = Arc::clone(&count);
            std::thread::spawn(move || trigger.run(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }))
        };

        assert_eq!(trigger.fire(), FireOutcome::Triggered);
        assert!(trigger.wait_until(|s, runs| runs == 1 && s == TriggerState::Armed, WAIT));
        assert_eq!(trigger.fire(), FireOutcome::Triggered);
        assert!(trigger.wait_until(|s, runs| runs == 2 && s == TriggerState::Armed, WAIT));

        trigger.stop();
        assert_eq!(worker.join().unwrap(), 2);
        assert_eq!(trigger.state(), TriggerState::Stopped);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(trigger.fire(), FireOutcome::Ignored);
    }

    #[test]
    fn test_fires_during_run_coalesce() {
        let trigger = Arc::new(WatchTrigger::new());
        trigger.arm();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let count = Arc::new(AtomicU64::new(0));

        let worker = {
            let trigger = Arc::clone(&trigger);
            let count = Arc::clone(&count);
            std::thread::spawn(move || {
                trigger.run(move || {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        release_rx.recv().unwrap();
                    }
                })
            })
        };

        assert_eq!(trigger.fire(), FireOutcome::Triggered);
        assert!(trigger.wait_until(|s, _| s == TriggerState::Running, WAIT));

        assert_eq!(trigger.fire(), FireOutcome::Coalesced);
        assert_eq!(trigger.fire(), FireOutcome::Coalesced);
        assert!(trigger.is_pending());

        release_tx.send(()).unwrap();
        assert!(trigger.wait_until(|s, runs| runs == 2 && s == TriggerState::Armed, WAIT));

        trigger.stop();
        assert_eq!(worker.join().unwrap(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_drains_running_and_drops_pending() {
        let trigger = Arc::new(WatchTrigger::new());
        trigger.arm();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = {
            let trigger = Arc::clone(&trigger);
            std::thread::spawn(move || trigger.run(move || release_rx.recv().unwrap()))
        };

        trigger.fire();
        assert!(trigger.wait_until(|s, _| s == TriggerState::Running, WAIT));
        trigger.fire();
        trigger.stop();

        // Still running until the invocation finishes.
        assert_eq!(trigger.state(), TriggerState::Running);
        release_tx.send(()).unwrap();

        assert_eq!(worker.join().unwrap(), 1);
        assert_eq!(trigger.state(), TriggerState::Stopped);
    }

    #[test]
    fn test_run_without_arm_returns() {
        let trigger = WatchTrigger::new();
        assert_eq!(trigger.run(|| panic!("must not run")), 0);

        let stopped = WatchTrigger::new();
        stopped.stop();
        assert_eq!(stopped.state(), TriggerState::Stopped);
        assert!(!stopped.arm());
    }

    fn report_with_failures(artifacts: &[&str]) -> TaskReport {
        let mut result = PipelineResult::new("styles", "/dist/css");
        for artifact in artifacts {
            result.failures.push(TransformError {
                stage: "compile".into(),
                artifact: artifact.to_string(),
                message: "bad".into(),
                line: None,
            });
        }
        TaskReport { task: "styles".into(), pipelines: vec![result], ..Default::default() }
    }

    #[test]
    fn test_error_tracker_detects_fixed() {
        let mut tracker = ErrorTracker::new();
        assert!(tracker.update(&report_with_failures(&["a.scss", "b.scss"])).is_empty());
        assert_eq!(tracker.error_count(), 2);

        let fixed = tracker.update(&report_with_failures(&["b.scss"]));
        assert_eq!(fixed, vec!["styles/a.scss"]);
        assert!(tracker.has_errors());

        let fixed = tracker.update(&report_with_failures(&[]));
        assert_eq!(fixed, vec!["styles/b.scss"]);
        assert!(!tracker.has_errors());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn test_session_missing_root() {
        let temp = tempfile::TempDir::new().unwrap();
        let binding = WatchBinding {
            pattern: crate::build::Pattern::new(temp.path().join("missing"), "*.scss").unwrap(),
            task: "styles".into(),
        };
        let result = WatchSession::start(&binding, &WatchConfig::default(), || {});
        assert!(matches!(result, Err(WatchError::SourceNotFound(_))));
    }
}
