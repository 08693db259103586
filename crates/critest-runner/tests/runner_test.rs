//! Integration tests for the spec runner.
//!
//! These tests verify the observable contract of a run:
//! 1. Hook ordering around every leaf
//! 2. Once-per-group `before_all`/`after_all` latches
//! 3. Failure, skip, and panic attribution
//! 4. Focus/skip filtering and listing
//! 5. Cleanup stack draining and interrupt handling

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use critest_runner::assertion::equal;
use critest_runner::{
    CleanupStack, Filter, Outcome, Registry, Runner, SpecContext, SuiteReport, deadline, expect,
    fail, skip, step,
};

type Log = Rc<RefCell<Vec<String>>>;

struct Ctx {
    log: Log,
    cleanup: CleanupStack,
}

impl Ctx {
    fn push(&self, entry: &str) {
        self.log.borrow_mut().push(entry.to_string());
    }
}

impl SpecContext for Ctx {
    fn cleanup(&mut self) -> &mut CleanupStack {
        &mut self.cleanup
    }
}

fn run(registry: &Registry<Ctx>, filter: &Filter, log: &Log) -> SuiteReport {
    let log = log.clone();
    Runner::new(Duration::from_secs(30)).run(registry, filter, move |_| Ctx {
        log: log.clone(),
        cleanup: CleanupStack::new(),
    })
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

// ── Ordering ─────────────────────────────────────────────────────────

#[test]
fn hooks_wrap_every_leaf_in_order() {
    let mut registry = Registry::new();
    registry.describe("outer", |g| {
        g.before_all(|c: &mut Ctx| c.push("outer before_all"));
        g.before_each(|c: &mut Ctx| c.push("outer before_each"));
        g.after_each(|c: &mut Ctx| c.push("outer after_each"));
        g.after_all(|c: &mut Ctx| c.push("outer after_all"));
        g.describe("inner", |g| {
            g.before_each(|c: &mut Ctx| c.push("inner before_each"));
            g.after_each(|c: &mut Ctx| c.push("inner after_each"));
            g.it("first", |c: &mut Ctx| c.push("first"));
            g.it("second", |c: &mut Ctx| c.push("second"));
        });
    });

    let log = Log::default();
    let report = run(&registry, &Filter::all(), &log);

    assert!(report.passed());
    assert_eq!(report.count(Outcome::Passed), 2);
    assert_eq!(
        entries(&log),
        vec![
            "outer before_all",
            "outer before_each",
            "inner before_each",
            "first",
            "inner after_each",
            "outer after_each",
            "outer before_each",
            "inner before_each",
            "second",
            "inner after_each",
            "outer after_each",
            "outer after_all",
        ]
    );
}

#[test]
fn full_text_joins_group_descriptions() {
    let mut registry: Registry<Ctx> = Registry::new();
    registry.describe("[k8s.io] PodSandbox", |g| {
        g.describe("runtime should support basic operations", |g| {
            g.it("should support running PodSandbox [Conformance]", |_| {});
        });
    });
    let report = run(&registry, &Filter::all(), &Log::default());
    assert_eq!(
        report.specs[0].full_text,
        "[k8s.io] PodSandbox runtime should support basic operations should support running PodSandbox [Conformance]"
    );
}

// ── Latches ──────────────────────────────────────────────────────────

#[test]
fn before_all_runs_lazily_and_only_for_selected_groups() {
    let mut registry = Registry::new();
    registry.describe("selected", |g| {
        g.before_all(|c: &mut Ctx| c.push("selected before_all"));
        g.it("a", |c: &mut Ctx| c.push("a"));
        g.it("b", |c: &mut Ctx| c.push("b"));
    });
    registry.describe("filtered", |g| {
        g.before_all(|c: &mut Ctx| c.push("filtered before_all"));
        g.after_all(|c: &mut Ctx| c.push("filtered after_all"));
        g.it("c", |c: &mut Ctx| c.push("c"));
    });

    let log = Log::default();
    let filter = Filter::new(Some("selected"), None).unwrap();
    let report = run(&registry, &filter, &log);

    assert_eq!(report.specs.len(), 2);
    assert_eq!(entries(&log), vec!["selected before_all", "a", "b"]);
}

#[test]
fn before_all_failure_fails_every_leaf_of_the_group() {
    let mut registry = Registry::new();
    registry.describe("broken", |g| {
        g.before_all(|_: &mut Ctx| fail("runtime unreachable"));
        g.it("a", |c: &mut Ctx| c.push("a"));
        g.it("b", |c: &mut Ctx| c.push("b"));
    });
    registry.describe("healthy", |g| {
        g.it("c", |c: &mut Ctx| c.push("c"));
    });

    let log = Log::default();
    let report = run(&registry, &Filter::all(), &log);

    assert_eq!(report.count(Outcome::Failed), 2);
    assert_eq!(report.count(Outcome::Passed), 1);
    assert!(
        report.specs[0]
            .message
            .as_deref()
            .unwrap()
            .starts_with("BeforeAll hook failed: runtime unreachable")
    );
    assert_eq!(entries(&log), vec!["c"]);
}

#[test]
fn before_suite_failure_fails_everything() {
    let mut registry = Registry::new();
    registry.before_suite(|_: &mut Ctx| fail("version check failed"));
    registry.describe("g", |g| {
        g.it("a", |c: &mut Ctx| c.push("a"));
    });

    let log = Log::default();
    let report = run(&registry, &Filter::all(), &log);
    assert!(!report.passed());
    assert!(entries(&log).is_empty());
}

#[test]
fn after_all_failure_is_attributed_to_passed_leaves() {
    let mut registry = Registry::new();
    registry.describe("g", |g| {
        g.after_all(|_: &mut Ctx| fail("leaked sandbox"));
        g.it("passes", |_: &mut Ctx| {});
        g.it("skips", |_: &mut Ctx| skip("not supported"));
    });

    let report = run(&registry, &Filter::all(), &Log::default());
    assert_eq!(report.specs[0].outcome, Outcome::Failed);
    assert!(
        report.specs[0]
            .message
            .as_deref()
            .unwrap()
            .contains("AfterAll hook of \"g\" failed: leaked sandbox")
    );
    assert_eq!(report.specs[1].outcome, Outcome::Skipped);
}

// ── Attribution ──────────────────────────────────────────────────────

#[test]
fn failure_panic_and_skip_are_classified() {
    let mut registry = Registry::new();
    registry.describe("g", |g| {
        g.it("fails", |_: &mut Ctx| expect(1).to(equal(2)));
        g.it("panics", |_: &mut Ctx| panic!("index out of range"));
        g.it("skips", |_: &mut Ctx| skip("AppArmor is not enabled"));
        g.it("passes", |_: &mut Ctx| {});
    });

    let report = run(&registry, &Filter::all(), &Log::default());
    let outcomes: Vec<_> = report.specs.iter().map(|s| s.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Failed,
            Outcome::Panicked,
            Outcome::Skipped,
            Outcome::Passed
        ]
    );
    assert_eq!(
        report.specs[2].message.as_deref(),
        Some("AppArmor is not enabled")
    );
    assert!(!report.passed());
}

#[test]
fn after_each_runs_even_when_before_each_fails() {
    let mut registry = Registry::new();
    registry.describe("g", |g| {
        g.before_each(|_: &mut Ctx| fail("create sandbox"));
        g.after_each(|c: &mut Ctx| c.push("after_each"));
        g.it("leaf", |c: &mut Ctx| c.push("leaf"));
    });

    let log = Log::default();
    let report = run(&registry, &Filter::all(), &log);
    assert_eq!(report.specs[0].outcome, Outcome::Failed);
    assert!(
        report.specs[0]
            .message
            .as_deref()
            .unwrap()
            .starts_with("BeforeEach hook failed: create sandbox")
    );
    assert_eq!(entries(&log), vec!["after_each"]);
}

#[test]
fn first_failure_wins_over_after_each_failure() {
    let mut registry = Registry::new();
    registry.describe("g", |g| {
        g.after_each(|_: &mut Ctx| fail("teardown"));
        g.it("leaf", |_: &mut Ctx| fail("body"));
    });

    let report = run(&registry, &Filter::all(), &Log::default());
    assert!(report.specs[0].message.as_deref().unwrap().starts_with("body"));
}

#[test]
fn steps_are_recorded_per_spec() {
    let mut registry: Registry<Ctx> = Registry::new();
    registry.describe("g", |g| {
        g.it("one", |_| {
            step("create sandbox");
            step("start container");
        });
        g.it("two", |_| step("list images"));
    });

    let report = run(&registry, &Filter::all(), &Log::default());
    assert_eq!(report.specs[0].steps, vec!["create sandbox", "start container"]);
    assert_eq!(report.specs[1].steps, vec!["list images"]);
}

// ── Filtering ────────────────────────────────────────────────────────

#[test]
fn list_respects_focus_and_skip() {
    let mut registry: Registry<Ctx> = Registry::new();
    registry.describe("[k8s.io] Image", |g| {
        g.it("should pull [Conformance]", |_| {});
        g.it("should remove", |_| {});
    });
    registry.describe("[k8s.io] AppArmor", |g| {
        g.it("should deny [Conformance]", |_| {});
    });

    let filter = Filter::new(Some(r"\[Conformance\]"), Some("AppArmor")).unwrap();
    assert_eq!(
        Runner::list(&registry, &filter),
        vec!["[k8s.io] Image should pull [Conformance]"]
    );
}

// ── Cleanup and interrupts ───────────────────────────────────────────

#[test]
fn cleanup_stack_drains_after_after_each() {
    let mut registry = Registry::new();
    registry.describe("g", |g| {
        g.after_each(|c: &mut Ctx| c.push("after_each"));
        g.it("leaf", |c: &mut Ctx| {
            for name in ["sandbox", "container"] {
                let log = c.log.clone();
                c.cleanup.defer(format!("remove {name}"), move || {
                    log.borrow_mut().push(format!("remove {name}"));
                    Ok::<(), String>(())
                });
            }
            fail("assertion after resources were created");
        });
    });

    let log = Log::default();
    let report = run(&registry, &Filter::all(), &log);
    assert_eq!(report.specs[0].outcome, Outcome::Failed);
    assert_eq!(
        entries(&log),
        vec!["after_each", "remove container", "remove sandbox"]
    );
}

#[test]
fn slow_leaf_fails_and_cleanup_gets_a_fresh_budget() {
    let budgets: Rc<RefCell<Vec<Option<Duration>>>> = Rc::default();
    let sink = budgets.clone();
    let mut registry = Registry::new();
    registry.describe("g", move |g| {
        g.it("slow", move |c: &mut Ctx| {
            let sink = sink.clone();
            c.cleanup.defer("remove sandbox", move || {
                sink.borrow_mut().push(deadline::current().remaining());
                Ok::<(), String>(())
            });
            std::thread::sleep(Duration::from_millis(100));
        });
    });

    let log = Log::default();
    let report = Runner::new(Duration::from_millis(20)).run(&registry, &Filter::all(), move |_| Ctx {
        log: log.clone(),
        cleanup: CleanupStack::new(),
    });

    assert_eq!(report.specs[0].outcome, Outcome::Failed);
    assert!(
        report.specs[0]
            .message
            .as_deref()
            .is_some_and(|m| m.contains("exceeded its"))
    );
    let budgets = budgets.borrow();
    assert_eq!(budgets.len(), 1);
    assert!(budgets[0].is_some_and(|left| left > Duration::from_secs(1)));
}

#[test]
fn interrupt_skips_remaining_specs() {
    let mut registry = Registry::new();
    let flag_slot: Rc<RefCell<Option<std::sync::Arc<std::sync::atomic::AtomicBool>>>> =
        Rc::default();
    let slot = flag_slot.clone();
    registry.describe("g", move |g| {
        g.it("first", move |_: &mut Ctx| {
            if let Some(flag) = slot.borrow().as_ref() {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        });
        g.it("second", |c: &mut Ctx| c.push("second"));
    });

    let mut runner = Runner::new(Duration::from_secs(30));
    *flag_slot.borrow_mut() = Some(runner.interrupt_flag());
    let log = Log::default();
    let factory_log = log.clone();
    let report = runner.run(&registry, &Filter::all(), move |_| Ctx {
        log: factory_log.clone(),
        cleanup: CleanupStack::new(),
    });

    assert_eq!(report.specs[0].outcome, Outcome::Passed);
    assert_eq!(report.specs[1].outcome, Outcome::Skipped);
    assert_eq!(report.specs[1].message.as_deref(), Some("run interrupted"));
    assert!(entries(&log).is_empty());
}

#[test]
fn reporter_sees_each_leaf_as_it_finishes() {
    let mut registry: Registry<Ctx> = Registry::new();
    registry.describe("g", |g| {
        g.it("a", |_| {});
        g.it("b", |_| fail("nope"));
    });

    let seen: Rc<RefCell<Vec<(String, Outcome)>>> = Rc::default();
    let sink = seen.clone();
    let log = Log::default();
    let report = Runner::new(Duration::from_secs(30))
        .with_reporter(move |spec| {
            sink.borrow_mut()
                .push((spec.full_text.clone(), spec.outcome));
        })
        .run(&registry, &Filter::all(), move |_| Ctx {
            log: log.clone(),
            cleanup: CleanupStack::new(),
        });

    assert_eq!(report.specs.len(), 2);
    assert_eq!(
        *seen.borrow(),
        vec![
            ("g a".to_string(), Outcome::Passed),
            ("g b".to_string(), Outcome::Failed)
        ]
    );
}
