use crate::core::domain::{CompileReport, RunLimits, RunResult, SubmissionStatus};
use crate::core::pipeline::testing::SuiteOutcome;

/// Terminal state of a run that reached the sandbox.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub result: RunResult,
    pub error_message: Option<String>,
}

/// Merges compile and test outcomes into the immutable result record.
///
/// `suite` is `None` only when compilation failed and nothing was run.
pub fn assemble(
    compile: CompileReport,
    suite: Option<SuiteOutcome>,
    limits: RunLimits,
    timing_ms: u64,
) -> Verdict {
    let Some(suite) = suite.filter(|_| compile.ok) else {
        return Verdict {
            status: SubmissionStatus::Failed,
            result: RunResult {
                passed: false,
                compile,
                tests: None,
                stdout: None,
                stderr: None,
                timing_ms,
                output_truncated: false,
                limits,
            },
            error_message: None,
        };
    };

    let (passed, tests, stdout, stderr) = match suite.plain {
        Some(plain) => (
            plain.exit_code == 0,
            None,
            Some(plain.stdout),
            Some(plain.stderr).filter(|s| !s.is_empty()),
        ),
        None => (
            suite.reports.iter().all(|report| report.passed),
            Some(suite.reports),
            None,
            None,
        ),
    };

    let (status, error_message) = match &suite.termination {
        Some(failure) => (SubmissionStatus::Error, Some(failure.user_message().to_string())),
        None if passed => (SubmissionStatus::Passed, None),
        None => (SubmissionStatus::Failed, None),
    };

    Verdict {
        status,
        result: RunResult {
            passed: passed && suite.termination.is_none(),
            compile,
            tests,
            stdout,
            stderr,
            timing_ms,
            output_truncated: suite.output_truncated,
            limits,
        },
        error_message,
    }
}
