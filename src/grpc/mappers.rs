use crate::core::domain::{self, Comparator};
use crate::core::languages::Language;
use crate::core::pipeline::orchestrator::{Completion, Rejection};
use crate::core::traits::counters::{AdmissionCeilings, UsageSnapshot};
use crate::grpc::models::{self, chrono_to_prost, rejected, run_request};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },
    #[error("Invalid value {value} for field: {field}")]
    InvalidValue { field: String, value: String },
}

impl TryFrom<models::RunRequest> for domain::RunRequest {
    type Error = ConversionError;

    fn try_from(req: models::RunRequest) -> Result<Self, ConversionError> {
        let language = Language::try_from(req.language)?;

        let target = match req.target.ok_or_else(|| missing("target"))? {
            run_request::Target::Challenge(challenge) => domain::RunTarget::Challenge {
                item_id: challenge.item_id,
            },
            run_request::Target::Project(project) => domain::RunTarget::Project {
                project_id: project.project_id,
            },
        };

        let source = match req.source.ok_or_else(|| missing("source"))? {
            run_request::Source::Code(code) => domain::Source::Code(code),
            run_request::Source::Files(files) => domain::Source::Files(
                files
                    .files
                    .into_iter()
                    .map(|file| domain::SourceFile {
                        path: file.path,
                        content: file.content,
                    })
                    .collect(),
            ),
        };

        let cases = req
            .test_suite
            .map(|suite| suite.cases)
            .unwrap_or_default()
            .into_iter()
            .map(domain::TestCase::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            user_id: req.user_id,
            target,
            language,
            source,
            entry_point: req.entry_point,
            test_suite: domain::TestSuite { cases },
            limits: req.limits.map(Into::into).unwrap_or_default(),
        })
    }
}

impl TryFrom<i32> for Language {
    type Error = ConversionError;

    fn try_from(value: i32) -> Result<Self, ConversionError> {
        match models::Language::try_from(value) {
            Ok(models::Language::Python) => Ok(Language::Python),
            Ok(models::Language::Javascript) => Ok(Language::JavaScript),
            Ok(models::Language::Java) => Ok(Language::Java),
            Ok(models::Language::Unspecified) | Err(_) => Err(ConversionError::InvalidValue {
                field: "language".to_string(),
                value: value.to_string(),
            }),
        }
    }
}

impl TryFrom<models::TestCase> for domain::TestCase {
    type Error = ConversionError;

    fn try_from(case: models::TestCase) -> Result<Self, ConversionError> {
        let comparator = match models::ComparatorKind::try_from(case.comparator) {
            Ok(models::ComparatorKind::Unspecified) => Comparator::default(),
            Ok(models::ComparatorKind::Exact) => Comparator::Exact,
            Ok(models::ComparatorKind::Trimmed) => Comparator::Trimmed,
            Ok(models::ComparatorKind::Tokens) => Comparator::Tokens,
            Ok(models::ComparatorKind::Numeric) => {
                if !case.tolerance.is_finite() || case.tolerance < 0.0 {
                    return Err(ConversionError::InvalidValue {
                        field: "tolerance".to_string(),
                        value: case.tolerance.to_string(),
                    });
                }
                Comparator::Numeric {
                    tolerance: case.tolerance,
                }
            }
            Err(_) => {
                return Err(ConversionError::InvalidValue {
                    field: "comparator".to_string(),
                    value: case.comparator.to_string(),
                });
            }
        };

        Ok(Self {
            name: case.name,
            stdin: case.stdin,
            expected_stdout: case.expected_stdout,
            comparator,
            hidden: case.hidden,
            timeout_ms: case.timeout_ms,
        })
    }
}

impl From<models::LimitsOverride> for domain::LimitsOverride {
    fn from(limits: models::LimitsOverride) -> Self {
        Self {
            cpu: limits.cpu,
            memory_mb: limits.memory_mb,
            timeout_ms: limits.timeout_ms,
            output_limit_bytes: limits.output_limit_bytes,
            pids: limits.pids,
        }
    }
}

impl From<domain::SubmissionStatus> for models::SubmissionStatus {
    fn from(status: domain::SubmissionStatus) -> Self {
        match status {
            domain::SubmissionStatus::Queued => models::SubmissionStatus::Queued,
            domain::SubmissionStatus::Running => models::SubmissionStatus::Running,
            domain::SubmissionStatus::Passed => models::SubmissionStatus::Passed,
            domain::SubmissionStatus::Failed => models::SubmissionStatus::Failed,
            domain::SubmissionStatus::Error => models::SubmissionStatus::Error,
        }
    }
}

impl From<domain::RunLimits> for models::LimitsSnapshot {
    fn from(limits: domain::RunLimits) -> Self {
        Self {
            cpu: limits.cpu,
            memory_mb: limits.memory_mb,
            timeout_ms: limits.timeout_ms,
            output_limit_bytes: limits.output_limit_bytes,
        }
    }
}

impl From<domain::TestReport> for models::TestReport {
    fn from(report: domain::TestReport) -> Self {
        Self {
            name: report.name,
            passed: report.passed,
            expected: report.expected,
            actual: report.actual,
            stderr: report.stderr,
        }
    }
}

impl From<domain::RunResult> for models::RunResult {
    fn from(result: domain::RunResult) -> Self {
        Self {
            passed: result.passed,
            compile: Some(models::CompileReport {
                ok: result.compile.ok,
                stderr: result.compile.stderr,
            }),
            tests: result.tests.map(|tests| models::TestReports {
                items: tests.into_iter().map(Into::into).collect(),
            }),
            stdout: result.stdout,
            stderr: result.stderr,
            timing_ms: result.timing_ms,
            output_truncated: result.output_truncated,
            limits: Some(result.limits.into()),
        }
    }
}

impl From<Completion> for models::Finished {
    fn from(done: Completion) -> Self {
        Self {
            submission_id: done.submission_id.to_string(),
            status: models::SubmissionStatus::from(done.status).into(),
            result: done.result.map(Into::into),
            error_message: done.error_message,
        }
    }
}

impl From<Rejection> for models::Rejected {
    fn from(rejection: Rejection) -> Self {
        let reason = match rejection {
            Rejection::RateLimited { retry_after } => {
                rejected::Reason::RateLimited(models::RateLimited {
                    retry_after_ms: retry_after.as_millis() as u64,
                })
            }
            Rejection::QuotaExceeded { resets_at } => {
                rejected::Reason::QuotaExceeded(models::QuotaExceeded {
                    resets_at: Some(chrono_to_prost(resets_at)),
                })
            }
        };
        Self {
            reason: Some(reason),
        }
    }
}

pub fn usage(snapshot: UsageSnapshot, ceilings: AdmissionCeilings) -> models::Usage {
    models::Usage {
        minute_count: snapshot.minute_count,
        per_minute: ceilings.per_minute,
        day_count: snapshot.day_count,
        per_day: ceilings.per_day,
        resets_at: Some(chrono_to_prost(snapshot.resets_at)),
    }
}

fn missing(field: &str) -> ConversionError {
    ConversionError::MissingField {
        field: field.to_string(),
    }
}
