use std::collections::HashSet;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::languages::Language;
use crate::core::profile::ResourceCeilings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunTarget {
    Challenge { item_id: String },
    Project { project_id: String },
}

impl RunTarget {
    pub fn kind(&self) -> RunKind {
        match self {
            RunTarget::Challenge { .. } => RunKind::Challenge,
            RunTarget::Project { .. } => RunKind::Project,
        }
    }

    pub fn item_id(&self) -> Option<&str> {
        match self {
            RunTarget::Challenge { item_id } => Some(item_id),
            RunTarget::Project { .. } => None,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            RunTarget::Project { project_id } => Some(project_id),
            RunTarget::Challenge { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Challenge,
    Project,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Code(String),
    Files(Vec<SourceFile>),
}

#[derive(Clone, Debug)]
pub struct RunRequest {
    pub user_id: String,
    pub target: RunTarget,
    pub language: Language,
    pub source: Source,
    pub entry_point: Option<String>,
    pub test_suite: TestSuite,
    pub limits: LimitsOverride,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("user id must not be empty")]
    EmptyUser,
    #[error("submission has no files")]
    NoFiles,
    #[error("invalid file path: {path:?}")]
    InvalidPath { path: String },
    #[error("duplicate file path: {path}")]
    DuplicatePath { path: String },
    #[error("entry point {entry_point} is not one of the submitted files")]
    UnknownEntryPoint { entry_point: String },
}

impl RunRequest {
    /// Files in submission order. A single-file submission is named after the
    /// language's default entry point.
    pub fn files(&self) -> Vec<SourceFile> {
        match &self.source {
            Source::Code(code) => vec![SourceFile {
                path: self.language.default_entry_point().to_string(),
                content: code.clone(),
            }],
            Source::Files(files) => files.clone(),
        }
    }

    pub fn entry_point(&self) -> String {
        match (&self.source, &self.entry_point) {
            (Source::Files(_), Some(entry_point)) => entry_point.clone(),
            _ => self.language.default_entry_point().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::EmptyUser);
        }

        let files = self.files();
        if files.is_empty() {
            return Err(ValidationError::NoFiles);
        }

        let mut seen = HashSet::new();
        for file in &files {
            if !is_safe_relative_path(&file.path) {
                return Err(ValidationError::InvalidPath {
                    path: file.path.clone(),
                });
            }
            if !seen.insert(file.path.as_str()) {
                return Err(ValidationError::DuplicatePath {
                    path: file.path.clone(),
                });
            }
        }

        let entry_point = self.entry_point();
        if !seen.contains(entry_point.as_str()) {
            return Err(ValidationError::UnknownEntryPoint { entry_point });
        }
        Ok(())
    }
}

/// Relative, normalized, and unable to escape the workspace it is joined to.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.len() > 255 || path.contains('\0') || path.contains('\\') {
        return false;
    }
    Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestSuite {
    pub cases: Vec<TestCase>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub stdin: String,
    pub expected_stdout: String,
    pub comparator: Comparator,
    pub hidden: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Comparator {
    Exact,
    #[default]
    Trimmed,
    Tokens,
    Numeric {
        tolerance: f64,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LimitsOverride {
    pub cpu: Option<f64>,
    pub memory_mb: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub output_limit_bytes: Option<u64>,
    pub pids: Option<u32>,
}

/// Limits enforced for one run. Serialized into the result as a snapshot so
/// that stored results keep describing the run even when defaults change.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLimits {
    pub cpu: f64,
    pub memory_mb: u64,
    pub timeout_ms: u64,
    pub output_limit_bytes: u64,
    #[serde(skip)]
    pub pids: u32,
}

impl RunLimits {
    pub fn resolve(defaults: &RunLimits, requested: &LimitsOverride, ceilings: &ResourceCeilings) -> Self {
        Self {
            cpu: requested
                .cpu
                .filter(|cpu| cpu.is_finite() && *cpu > 0.0)
                .unwrap_or(defaults.cpu)
                .min(ceilings.max_cpu),
            memory_mb: requested
                .memory_mb
                .unwrap_or(defaults.memory_mb)
                .clamp(1, ceilings.max_memory_mb),
            timeout_ms: requested
                .timeout_ms
                .unwrap_or(defaults.timeout_ms)
                .clamp(1, ceilings.max_timeout_ms),
            output_limit_bytes: requested
                .output_limit_bytes
                .unwrap_or(defaults.output_limit_bytes)
                .min(ceilings.max_output_limit_bytes),
            pids: requested
                .pids
                .unwrap_or(defaults.pids)
                .clamp(1, ceilings.max_pids),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl CompileReport {
    pub fn ok() -> Self {
        Self {
            ok: true,
            stderr: None,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            ok: false,
            stderr: Some(stderr.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TestReport {
    pub name: String,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Produced once per run and never modified afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub passed: bool,
    pub compile: CompileReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<TestReport>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub timing_ms: u64,
    pub output_truncated: bool,
    pub limits: RunLimits,
}

impl RunResult {
    pub fn tests_passed(&self) -> Option<u32> {
        self.tests
            .as_ref()
            .map(|tests| tests.iter().filter(|t| t.passed).count() as u32)
    }

    pub fn tests_failed(&self) -> Option<u32> {
        self.tests
            .as_ref()
            .map(|tests| tests.iter().filter(|t| !t.passed).count() as u32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Running,
    Passed,
    Failed,
    Error,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Passed | SubmissionStatus::Failed | SubmissionStatus::Error
        )
    }

    /// queued -> running -> terminal. A queued submission may also fail
    /// straight to `error` when it never gets a sandbox slot.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        match self {
            SubmissionStatus::Queued => {
                matches!(next, SubmissionStatus::Running | SubmissionStatus::Error)
            }
            SubmissionStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: String,
    pub target: RunTarget,
    pub language: Language,
    pub status: SubmissionStatus,
    pub result: Option<RunResult>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TerminalRecord {
    pub status: SubmissionStatus,
    pub result: Option<RunResult>,
    pub error_message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Passed,
    Failed,
    Error,
    RateLimited,
    QuotaExceeded,
}

impl From<SubmissionStatus> for LogStatus {
    fn from(status: SubmissionStatus) -> Self {
        match status {
            SubmissionStatus::Passed => LogStatus::Passed,
            SubmissionStatus::Failed => LogStatus::Failed,
            SubmissionStatus::Queued | SubmissionStatus::Running | SubmissionStatus::Error => {
                LogStatus::Error
            }
        }
    }
}

/// Audit record of one run attempt, written whether or not the attempt was
/// admitted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub user_id: String,
    pub kind: RunKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: LogStatus,
    pub timing_ms: u64,
    pub compile_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_failed_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
