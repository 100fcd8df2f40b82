use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{CASE_TIMEOUT_MESSAGE, HIDDEN_PLACEHOLDER, NOT_RUN_MESSAGE};
use crate::core::adapter::LanguageAdapter;
use crate::core::domain::{RunLimits, TestCase, TestReport, TestSuite};
use crate::core::errors::RunFailure;
use crate::core::output::truncate_at_char_boundary;
use crate::core::traits::sandbox::{ExecOutput, SandboxError, SandboxHandle};

/// Outcome of driving a suite (or a plain run) inside one sandbox.
#[derive(Clone, Debug, PartialEq)]
pub struct SuiteOutcome {
    /// One report per case, in suite order. Empty for a plain run.
    pub reports: Vec<TestReport>,
    /// Program output of a plain run.
    pub plain: Option<PlainRun>,
    /// Set when the run as a whole was cut short.
    pub termination: Option<RunFailure>,
    pub output_truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlainRun {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Executes the cases one after another in the same sandbox. A single case
/// crashing or hitting its own time limit only fails that case; running out
/// of the run's time budget stops the suite and marks the remaining cases as
/// not run.
#[tracing::instrument(skip_all, fields(cases = suite.cases.len()))]
pub async fn run_suite(
    adapter: &LanguageAdapter<'_>,
    handle: &SandboxHandle,
    entry_point: &str,
    suite: &TestSuite,
    limits: &RunLimits,
) -> Result<SuiteOutcome, SandboxError> {
    let budget = Duration::from_millis(limits.timeout_ms);
    let deadline = Instant::now() + budget;

    if suite.cases.is_empty() {
        return plain_run(adapter, handle, entry_point, limits, budget).await;
    }

    let mut outcome = SuiteOutcome {
        reports: Vec::with_capacity(suite.cases.len()),
        plain: None,
        termination: None,
        output_truncated: false,
    };

    for (idx, case) in suite.cases.iter().enumerate() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            outcome.termination = Some(RunFailure::Timeout);
            mark_not_run(&mut outcome.reports, &suite.cases[idx..]);
            break;
        }

        let case_limit = case.timeout_ms.map_or(budget, Duration::from_millis);
        let bounded_by_run = remaining <= case_limit;
        let timeout = case_limit.min(remaining);

        tracing::debug!(case = %case.name, ?timeout, "Running test case");
        let out = adapter
            .execute(
                handle,
                entry_point,
                Some(&case.stdin),
                timeout,
                limits.output_limit_bytes,
            )
            .await?;
        outcome.output_truncated |= out.output_truncated;

        if out.resource_killed {
            tracing::info!(case = %case.name, "Test case killed by resource controller");
            let (report, cut) = failed_report(
                case,
                out,
                "killed: resource limit exceeded",
                limits.output_limit_bytes,
            );
            outcome.output_truncated |= cut;
            outcome.reports.push(report);
            outcome.termination = Some(RunFailure::ResourceExceeded);
            mark_not_run(&mut outcome.reports, &suite.cases[idx + 1..]);
            break;
        }

        if out.timed_out {
            let (report, cut) =
                failed_report(case, out, CASE_TIMEOUT_MESSAGE, limits.output_limit_bytes);
            outcome.output_truncated |= cut;
            outcome.reports.push(report);
            if bounded_by_run {
                tracing::info!(case = %case.name, "Run time budget exhausted");
                outcome.termination = Some(RunFailure::Timeout);
                mark_not_run(&mut outcome.reports, &suite.cases[idx + 1..]);
                break;
            }
            continue;
        }

        let (report, cut) = check_case(case, out, limits.output_limit_bytes);
        outcome.output_truncated |= cut;
        outcome.reports.push(report);
    }

    Ok(outcome)
}

async fn plain_run(
    adapter: &LanguageAdapter<'_>,
    handle: &SandboxHandle,
    entry_point: &str,
    limits: &RunLimits,
    budget: Duration,
) -> Result<SuiteOutcome, SandboxError> {
    let out = adapter
        .execute(handle, entry_point, None, budget, limits.output_limit_bytes)
        .await?;

    let termination = if out.timed_out {
        Some(RunFailure::Timeout)
    } else if out.resource_killed {
        Some(RunFailure::ResourceExceeded)
    } else {
        None
    };

    Ok(SuiteOutcome {
        reports: Vec::new(),
        output_truncated: out.output_truncated,
        plain: Some(PlainRun {
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
        }),
        termination,
    })
}

/// Returns the report and whether program output was cut to fit it.
fn check_case(case: &TestCase, out: ExecOutput, output_limit_bytes: u64) -> (TestReport, bool) {
    let output_ok = case.comparator.matches(&case.expected_stdout, &out.stdout);
    let passed = out.exit_code == 0 && output_ok;

    if out.exit_code != 0 {
        let reason = format!("exited with status {}", out.exit_code);
        let (stderr, cut) = annotate(&reason, &out.stderr, output_limit_bytes);
        return (report(case, passed, out.stdout, Some(stderr)), cut);
    }

    let stderr = Some(out.stderr).filter(|s| !s.is_empty());
    (report(case, passed, out.stdout, stderr), false)
}

fn failed_report(
    case: &TestCase,
    out: ExecOutput,
    reason: &str,
    output_limit_bytes: u64,
) -> (TestReport, bool) {
    let (stderr, cut) = annotate(reason, &out.stderr, output_limit_bytes);
    (report(case, false, out.stdout, Some(stderr)), cut)
}

/// `reason` followed by the program's stderr, never longer than `limit`
/// bytes. The program's stderr gets whatever room the reason leaves; the flag
/// is set when any of it was dropped.
fn annotate(reason: &str, stderr: &str, limit: u64) -> (String, bool) {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let mut msg = reason.to_string();
    truncate_at_char_boundary(&mut msg, limit);
    if stderr.is_empty() {
        return (msg, false);
    }

    let room = limit.saturating_sub(reason.len() + 1);
    let mut program = stderr.to_string();
    let cut = truncate_at_char_boundary(&mut program, room);
    if !program.is_empty() {
        msg.push('\n');
        msg.push_str(&program);
    }
    (msg, cut)
}

fn report(case: &TestCase, passed: bool, actual: String, stderr: Option<String>) -> TestReport {
    if case.hidden {
        return TestReport {
            name: case.name.clone(),
            passed,
            expected: HIDDEN_PLACEHOLDER.to_string(),
            actual: HIDDEN_PLACEHOLDER.to_string(),
            stderr: None,
        };
    }

    TestReport {
        name: case.name.clone(),
        passed,
        expected: case.expected_stdout.clone(),
        actual,
        stderr,
    }
}

fn mark_not_run(reports: &mut Vec<TestReport>, cases: &[TestCase]) {
    for case in cases {
        reports.push(TestReport {
            name: case.name.clone(),
            passed: false,
            expected: if case.hidden {
                HIDDEN_PLACEHOLDER.to_string()
            } else {
                case.expected_stdout.clone()
            },
            actual: String::new(),
            stderr: Some(NOT_RUN_MESSAGE.to_string()),
        });
    }
}
