//! Executes a [`Registry`] once and produces a [`SuiteReport`].
//!
//! For every selected leaf the runner:
//! 1. runs not-yet-run `before_all` hooks of each ancestor, root first;
//! 2. runs every ancestor's `before_each` hooks, root first;
//! 3. runs the leaf inside a recovery boundary;
//! 4. runs every ancestor's `after_each` hooks, leaf first, whatever
//!    happened in 3;
//! 5. drains the spec context's cleanup stack.
//!
//! A leaf that returns normally after its deadline has passed is failed.
//!
//! A group's `after_all` hooks run once its last selected leaf is done.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::cleanup::CleanupStack;
use crate::deadline::{self, Deadline};
use crate::failure::{self, Interruption};
use crate::filter::{self, Filter};
use crate::registry::{Group, Node, Registry, Spec, Thunk};
use crate::report::{Outcome, SpecReport, SuiteReport};
use crate::step;

/// Per-spec state handed to every hook and leaf.
pub trait SpecContext {
    /// The stack drained by the runner when the spec or scope ends.
    fn cleanup(&mut self) -> &mut CleanupStack;
}

/// What the context factory knows about the scope it builds a context for.
#[derive(Debug, Clone)]
pub struct SpecInfo {
    /// Full path text of the leaf, or of the group for scope hooks.
    pub full_text: String,
    /// Deadline of the scope.
    pub deadline: Deadline,
}

type Reporter = Box<dyn FnMut(&SpecReport)>;

/// Walks the spec tree and runs the selected leaves sequentially.
pub struct Runner {
    spec_timeout: Duration,
    interrupt: Arc<AtomicBool>,
    reporter: Option<Reporter>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("spec_timeout", &self.spec_timeout)
            .field("interrupted", &self.interrupt.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct Frame<'a, C> {
    group: &'a Group<C>,
    entered: bool,
    before_all: Option<Interruption>,
    scope: Option<C>,
    first_report: usize,
}

struct RunState<'f, C> {
    filter: &'f Filter,
    factory: &'f mut dyn FnMut(&SpecInfo) -> C,
    reports: Vec<SpecReport>,
    suite_failure: Option<Interruption>,
}

impl Runner {
    /// Creates a runner with the given per-spec deadline.
    #[must_use]
    pub fn new(spec_timeout: Duration) -> Self {
        Self {
            spec_timeout,
            interrupt: Arc::new(AtomicBool::new(false)),
            reporter: None,
        }
    }

    /// Flag that, once set, expires the running spec's deadline and skips
    /// every leaf that has not started yet.
    #[must_use]
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Installs a callback invoked as soon as each leaf finishes.
    #[must_use]
    pub fn with_reporter(mut self, reporter: impl FnMut(&SpecReport) + 'static) -> Self {
        self.reporter = Some(Box::new(reporter));
        self
    }

    /// Full path texts of the leaves `filter` selects, in run order.
    #[must_use]
    pub fn list<C>(registry: &Registry<C>, filter: &Filter) -> Vec<String> {
        let mut selected = Vec::new();
        collect_selected(&registry.root, &mut Vec::new(), filter, &mut selected);
        selected
    }

    /// Runs every selected leaf of `registry`.
    ///
    /// `factory` builds a fresh context for each leaf and for each group
    /// scope that has `before_all`/`after_all` hooks.
    pub fn run<C: SpecContext>(
        &mut self,
        registry: &Registry<C>,
        filter: &Filter,
        mut factory: impl FnMut(&SpecInfo) -> C,
    ) -> SuiteReport {
        let started = Instant::now();
        let selected = Self::list(registry, filter).len();
        tracing::info!(
            total = registry.spec_count(),
            selected,
            "running suite"
        );

        let mut state = RunState {
            filter,
            factory: &mut factory,
            reports: Vec::with_capacity(selected),
            suite_failure: None,
        };

        let mut suite_scope = None;
        if selected > 0 && !registry.before_suite.is_empty() {
            let (scope, failure) =
                self.run_scope_hooks("BeforeSuite", &registry.before_suite, None, &mut state);
            suite_scope = scope;
            state.suite_failure = failure;
        }

        let mut frames = Vec::new();
        self.walk(&registry.root, &mut frames, &mut state);

        if let Some(mut scope) = suite_scope {
            log_teardown_errors("BeforeSuite", scope.cleanup().drain());
        }

        let report = SuiteReport {
            specs: state.reports,
            duration: started.elapsed(),
        };
        tracing::info!(
            passed = report.count(Outcome::Passed),
            failed = report.count(Outcome::Failed),
            skipped = report.count(Outcome::Skipped),
            panicked = report.count(Outcome::Panicked),
            duration = ?report.duration,
            "suite finished"
        );
        report
    }

    fn scope_deadline(&self) -> Deadline {
        Deadline::after(self.spec_timeout).with_interrupt(self.interrupt.clone())
    }

    /// Runs scope hooks (before-suite, before-all, after-all) in a fresh
    /// context and returns that context together with the first failure.
    fn run_scope_hooks<C: SpecContext>(
        &self,
        label: &str,
        hooks: &[Thunk<C>],
        existing: Option<C>,
        state: &mut RunState<'_, C>,
    ) -> (Option<C>, Option<Interruption>) {
        let deadline = self.scope_deadline();
        let info = SpecInfo {
            full_text: label.to_string(),
            deadline: deadline.clone(),
        };
        deadline::scoped(deadline, || {
            let mut context = match existing {
                Some(context) => context,
                None => match failure::catch(|| (state.factory)(&info)) {
                    Ok(context) => context,
                    Err(interruption) => return (None, Some(interruption)),
                },
            };
            for hook in hooks {
                if let Err(interruption) = failure::recover(|| hook(&mut context)) {
                    tracing::warn!(scope = label, error = interruption.message(), "scope hook failed");
                    return (Some(context), Some(interruption));
                }
            }
            (Some(context), None)
        })
    }

    fn walk<'a, C: SpecContext>(
        &mut self,
        group: &'a Group<C>,
        frames: &mut Vec<Frame<'a, C>>,
        state: &mut RunState<'_, C>,
    ) {
        let mut path: Vec<&str> = frames.iter().map(|f| Group::description(f.group)).collect();
        path.push(group.description());
        if count_selected(group, &mut path, state.filter) == 0 {
            return;
        }

        frames.push(Frame {
            group,
            entered: false,
            before_all: None,
            scope: None,
            first_report: state.reports.len(),
        });

        for child in &group.children {
            match child {
                Node::Group(child) => self.walk(child, frames, state),
                Node::Spec(spec) => {
                    let mut parts: Vec<&str> =
                        frames.iter().map(|f| Group::description(f.group)).collect();
                    parts.push(spec.description());
                    let full_text = filter::full_text(&parts);
                    if state.filter.selects(&full_text) {
                        let report = self.run_leaf(spec, full_text, frames, state);
                        if let Some(reporter) = self.reporter.as_mut() {
                            reporter(&report);
                        }
                        state.reports.push(report);
                    }
                }
            }
        }

        if let Some(frame) = frames.pop() {
            self.finish_group(frame, state);
        }
    }

    fn run_leaf<C: SpecContext>(
        &self,
        spec: &Spec<C>,
        full_text: String,
        frames: &mut [Frame<'_, C>],
        state: &mut RunState<'_, C>,
    ) -> SpecReport {
        if self.interrupt.load(Ordering::SeqCst) {
            return SpecReport::skipped(full_text, "run interrupted");
        }
        if let Some(interruption) = &state.suite_failure {
            return hook_report(full_text, "BeforeSuite", interruption);
        }

        for frame in frames.iter_mut() {
            if !frame.entered {
                frame.entered = true;
                if !frame.group.before_all.is_empty() {
                    let label = format!("{} [BeforeAll]", frame.group.description());
                    let (scope, failure) =
                        self.run_scope_hooks(&label, &frame.group.before_all, None, state);
                    frame.scope = scope;
                    frame.before_all = failure;
                }
            }
            if let Some(interruption) = &frame.before_all {
                return hook_report(full_text, "BeforeAll", interruption);
            }
        }

        tracing::info!(spec = %full_text, "running spec");
        let started = Instant::now();
        let deadline = self.scope_deadline();
        let info = SpecInfo {
            full_text: full_text.clone(),
            deadline: deadline.clone(),
        };

        step::begin();
        let spec_timeout = self.spec_timeout;
        let result = deadline::scoped(deadline.clone(), || {
            let mut context = failure::catch(|| (state.factory)(&info))?;
            let mut result = run_leaf_body(spec, frames, &mut context);
            if result.is_ok() && deadline.timed_out() {
                result = Err(Interruption::Failed(format!(
                    "spec exceeded its {:.1}s deadline",
                    spec_timeout.as_secs_f64()
                )));
            }
            log_teardown_errors(&full_text, context.cleanup().drain());
            result
        });
        let steps = step::finish();

        let (outcome, message) = match result {
            Ok(()) => (Outcome::Passed, None),
            Err(Interruption::Failed(m)) => (Outcome::Failed, Some(m)),
            Err(Interruption::Skipped(m)) => (Outcome::Skipped, Some(m)),
            Err(Interruption::Panicked(m)) => (Outcome::Panicked, Some(m)),
        };
        let duration = started.elapsed();
        tracing::info!(spec = %full_text, %outcome, ?duration, "spec finished");
        if let Some(message) = &message {
            tracing::debug!(spec = %full_text, %message, ?steps, "spec message");
        }

        SpecReport {
            full_text,
            outcome,
            message,
            steps,
            duration,
        }
    }

    fn finish_group<C: SpecContext>(&self, frame: Frame<'_, C>, state: &mut RunState<'_, C>) {
        if !frame.entered {
            return;
        }
        let label = format!("{} [AfterAll]", frame.group.description());
        let mut scope = frame.scope;
        if !frame.group.after_all.is_empty() {
            let (returned, failure) =
                self.run_scope_hooks(&label, &frame.group.after_all, scope.take(), state);
            scope = returned;
            if let Some(interruption) = failure {
                for report in &mut state.reports[frame.first_report..] {
                    if report.outcome == Outcome::Passed {
                        report.outcome = Outcome::Failed;
                        report.message = Some(format!(
                            "AfterAll hook of \"{}\" failed: {}",
                            frame.group.description(),
                            interruption.message()
                        ));
                    }
                }
            }
        }
        if let Some(mut scope) = scope {
            log_teardown_errors(&label, scope.cleanup().drain());
        }
    }
}

fn run_leaf_body<C>(
    spec: &Spec<C>,
    frames: &[Frame<'_, C>],
    context: &mut C,
) -> Result<(), Interruption> {
    let mut result = Ok(());
    'before: for frame in frames {
        for hook in &frame.group.before_each {
            if let Err(interruption) = failure::recover(|| hook(&mut *context)) {
                result = Err(annotate(interruption, "BeforeEach"));
                break 'before;
            }
        }
    }

    if result.is_ok() {
        result = failure::recover(|| (spec.body)(&mut *context));
    }

    for frame in frames.iter().rev() {
        for hook in &frame.group.after_each {
            if let Err(interruption) = failure::recover(|| hook(&mut *context)) {
                if result.is_ok() {
                    result = Err(annotate(interruption, "AfterEach"));
                } else {
                    tracing::warn!(error = interruption.message(), "AfterEach hook failed");
                }
            }
        }
    }
    result
}

fn annotate(interruption: Interruption, phase: &str) -> Interruption {
    match interruption {
        Interruption::Failed(m) => Interruption::Failed(format!("{phase} hook failed: {m}")),
        Interruption::Panicked(m) => Interruption::Panicked(format!("{phase} hook panicked: {m}")),
        skipped @ Interruption::Skipped(_) => skipped,
    }
}

fn hook_report(full_text: String, phase: &str, interruption: &Interruption) -> SpecReport {
    match interruption {
        Interruption::Skipped(reason) => SpecReport::skipped(full_text, reason.clone()),
        other => SpecReport::failed_without_running(
            full_text,
            format!("{phase} hook failed: {}", other.message()),
        ),
    }
}

fn log_teardown_errors(scope: &str, errors: Vec<String>) {
    for error in errors {
        tracing::warn!(scope, %error, "teardown error");
    }
}

fn count_selected<'a, C>(group: &'a Group<C>, path: &mut Vec<&'a str>, filter: &Filter) -> usize {
    let mut count = 0;
    for child in &group.children {
        match child {
            Node::Group(child) => {
                path.push(child.description());
                count += count_selected(child, path, filter);
                let _ = path.pop();
            }
            Node::Spec(spec) => {
                path.push(spec.description());
                if filter.selects(&filter::full_text(path)) {
                    count += 1;
                }
                let _ = path.pop();
            }
        }
    }
    count
}

fn collect_selected<'a, C>(
    group: &'a Group<C>,
    path: &mut Vec<&'a str>,
    filter: &Filter,
    out: &mut Vec<String>,
) {
    path.push(group.description());
    for child in &group.children {
        match child {
            Node::Group(child) => collect_selected(child, path, filter, out),
            Node::Spec(spec) => {
                path.push(spec.description());
                let text = filter::full_text(path);
                if filter.selects(&text) {
                    out.push(text);
                }
                let _ = path.pop();
            }
        }
    }
    let _ = path.pop();
}
