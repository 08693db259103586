//! Human-readable progress lines and the end-of-run summary.

use std::fmt::Write as _;
use std::time::Duration;

use critest_runner::{Outcome, SpecReport, SuiteReport};

/// Formats a duration as `850ms`, `12.3s`, or `4m 05s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

const fn marker(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Passed => "•",
        Outcome::Failed => "✗",
        Outcome::Skipped => "S",
        Outcome::Panicked => "!",
    }
}

/// One line printed as soon as a spec finishes.
#[must_use]
pub fn progress_line(report: &SpecReport) -> String {
    format!(
        "{} [{}] {} ({})",
        marker(report.outcome),
        report.outcome,
        report.full_text,
        format_duration(report.duration)
    )
}

/// Totals line, followed by every failure with its message and steps.
#[must_use]
pub fn summary(report: &SuiteReport) -> String {
    let mut out = format!(
        "Ran {} specs in {}\nPassed: {} | Failed: {} | Skipped: {} | Panicked: {}\n",
        report.specs.len(),
        format_duration(report.duration),
        report.count(Outcome::Passed),
        report.count(Outcome::Failed),
        report.count(Outcome::Skipped),
        report.count(Outcome::Panicked),
    );
    for failure in report.failures() {
        let _ = write!(out, "\n[{}] {}\n", failure.outcome, failure.full_text);
        if let Some(message) = &failure.message {
            for line in message.lines() {
                let _ = writeln!(out, "    {line}");
            }
        }
        for step in &failure.steps {
            let _ = writeln!(out, "    STEP: {step}");
        }
    }
    let verdict = if report.passed() { "SUCCESS" } else { "FAIL" };
    let _ = write!(out, "\n{verdict}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(full_text: &str, outcome: Outcome, message: Option<&str>) -> SpecReport {
        SpecReport {
            full_text: full_text.into(),
            outcome,
            message: message.map(str::to_string),
            steps: vec!["run pod sandbox".into()],
            duration: Duration::from_millis(1500),
        }
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(850)), "850ms");
        assert_eq!(format_duration(Duration::from_millis(12_340)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(245)), "4m 05s");
    }

    #[test]
    fn progress_line_names_outcome_and_spec() {
        let line = progress_line(&spec("[k8s.io] PodSandbox runs", Outcome::Skipped, None));
        assert_eq!(line, "S [skipped] [k8s.io] PodSandbox runs (1.5s)");
    }

    #[test]
    fn summary_lists_failures_with_steps() {
        let report = SuiteReport {
            specs: vec![
                spec("a passes", Outcome::Passed, None),
                spec("b fails", Outcome::Failed, Some("Expected\n    1\nto equal 2")),
                spec("c skipped", Outcome::Skipped, Some("no AppArmor")),
            ],
            duration: Duration::from_secs(3),
        };
        let text = summary(&report);
        assert!(text.starts_with("Ran 3 specs in 3.0s\nPassed: 1 | Failed: 1 | Skipped: 1 | Panicked: 0\n"));
        assert!(text.contains("[failed] b fails\n    Expected\n        1\n    to equal 2\n    STEP: run pod sandbox"));
        assert!(!text.contains("c skipped"));
        assert!(text.ends_with("FAIL"));
    }

    #[test]
    fn summary_of_a_clean_run() {
        let report = SuiteReport {
            specs: vec![spec("a passes", Outcome::Passed, None)],
            duration: Duration::from_millis(10),
        };
        assert!(summary(&report).ends_with("SUCCESS"));
    }
}
