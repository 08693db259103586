//! Runs the suite described by the command line.

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::Context;

use critest_fixtures::Clients;
use critest_runner::{Runner, SuiteReport};

use crate::cli::Cli;
use crate::output;

/// Shell convention for a process stopped by SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

/// Lists or runs the selected specs.
///
/// # Errors
///
/// Returns an error if the arguments are invalid, the runtime is
/// unreachable, or the report cannot be written.
pub fn execute(cli: &Cli) -> anyhow::Result<ExitCode> {
    let filter = cli.filter().context("invalid --focus or --skip pattern")?;
    let registry = critest_suite::registry();

    if cli.list {
        for full_text in Runner::list(&registry, &filter) {
            println!("{full_text}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = cli.suite_config()?;
    let spec_timeout = config.spec_timeout;
    tracing::info!(
        runtime = %config.runtime_endpoint,
        image = %config.image_endpoint,
        handler = config.runtime_handler.as_deref().unwrap_or_default(),
        "connecting"
    );
    let clients = Clients::connect(config).context("connect to the container runtime")?;

    let mut runner =
        Runner::new(spec_timeout).with_reporter(|report| println!("{}", output::progress_line(report)));
    let interrupted = runner.interrupt_flag();
    let interrupt = runner.interrupt_flag();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupted, cleaning up the running spec");
        interrupt.store(true, Ordering::SeqCst);
    })
    .context("install interrupt handler")?;

    let report = runner.run(&registry, &filter, |info| clients.framework(info));
    println!("{}", output::summary(&report));

    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }
    Ok(exit_code(&report, interrupted.load(Ordering::SeqCst)))
}

/// Exit status of a finished run.
///
/// An interrupted run never reports success, even if every spec that ran passed.
fn exit_code(report: &SuiteReport, interrupted: bool) -> ExitCode {
    if interrupted {
        tracing::warn!("run was interrupted before every spec ran");
        ExitCode::from(INTERRUPTED_EXIT)
    } else if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn write_report(path: &Path, report: &SuiteReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(path, json).with_context(|| format!("write report {}", path.display()))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use critest_runner::{Outcome, SpecReport};

    use super::*;

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = SuiteReport {
            specs: vec![SpecReport {
                full_text: "[k8s.io] OOMKilled".into(),
                outcome: Outcome::Passed,
                message: None,
                steps: Vec::new(),
                duration: Duration::from_secs(2),
            }],
            duration: Duration::from_secs(2),
        };
        write_report(&path, &report).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["specs"][0]["outcome"], "passed");
        assert_eq!(json["specs"][0]["full_text"], "[k8s.io] OOMKilled");
    }

    fn report_of(outcome: Outcome) -> SuiteReport {
        SuiteReport {
            specs: vec![SpecReport {
                full_text: "[k8s.io] Runtime info".into(),
                outcome,
                message: None,
                steps: Vec::new(),
                duration: Duration::from_millis(10),
            }],
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn exit_code_follows_outcomes() {
        assert_eq!(exit_code(&report_of(Outcome::Passed), false), ExitCode::SUCCESS);
        assert_eq!(exit_code(&report_of(Outcome::Failed), false), ExitCode::FAILURE);
    }

    #[test]
    fn interrupted_run_never_succeeds() {
        let code = exit_code(&report_of(Outcome::Passed), true);
        assert_ne!(code, ExitCode::SUCCESS);
        assert_eq!(code, ExitCode::from(INTERRUPTED_EXIT));
    }

    #[test]
    fn list_mode_needs_no_runtime() {
        let cli = <Cli as clap::Parser>::try_parse_from([
            "critest",
            "--list",
            "--focus",
            "OOMKilled",
            "--runtime-endpoint",
            "unix:///nonexistent.sock",
        ])
        .unwrap();
        assert_eq!(execute(&cli).unwrap(), ExitCode::SUCCESS);
    }
}
