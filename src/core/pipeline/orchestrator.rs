use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc::Sender};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::constants::INTERNAL_ERROR_MESSAGE;
use crate::core::adapter::LanguageAdapter;
use crate::core::catalog::Catalog;
use crate::core::domain::{
    ExecutionLogEntry, LogStatus, RunLimits, RunRequest, RunResult, SourceFile, SubmissionStatus,
    TerminalRecord, TestSuite,
};
use crate::core::errors::RunFailure;
use crate::core::pipeline::admission::AdmissionController;
use crate::core::pipeline::assembling::{Verdict, assemble};
use crate::core::pipeline::provisioning::provision_with_retry;
use crate::core::pipeline::testing::run_suite;
use crate::core::profile::ExecutionProfile;
use crate::core::traits::counters::{AdmissionDecision, UsageSnapshot};
use crate::core::traits::sandbox::{Sandbox, SandboxHandle, SandboxSpec};
use crate::core::traits::store::{ExecutionLog, NewSubmission, SubmissionStore};

/// Progress of one request as seen by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    Queued(Uuid),
    Running(Uuid),
    Done(RunOutcome),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// Refused at admission. No submission exists.
    Rejected(Rejection),
    Completed(Completion),
    /// The submission could not even be recorded.
    Aborted { error_message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    RateLimited { retry_after: Duration },
    QuotaExceeded { resets_at: DateTime<Utc> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub submission_id: Uuid,
    pub status: SubmissionStatus,
    pub result: Option<RunResult>,
    pub error_message: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub pool_size: usize,
    pub slot_wait: Duration,
    pub default_limits: RunLimits,
    pub compile_timeout: Duration,
    pub provision_backoff: Duration,
}

impl From<&RunnerConfig> for OrchestratorSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            slot_wait: config.slot_wait,
            default_limits: config.default_limits,
            compile_timeout: config.compile_timeout,
            provision_backoff: config.provision_backoff,
        }
    }
}

/// Drives a request from admission to its terminal state.
///
/// Sandbox work is bounded by a pool of `pool_size` slots. Every request
/// produces exactly one execution log entry, and every admitted request
/// exactly one terminal submission write.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    admission: AdmissionController,
    catalog: Arc<Catalog>,
    sandbox: Arc<dyn Sandbox>,
    store: Arc<dyn SubmissionStore>,
    log: Arc<dyn ExecutionLog>,
    slots: Arc<Semaphore>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        admission: AdmissionController,
        catalog: Arc<Catalog>,
        sandbox: Arc<dyn Sandbox>,
        store: Arc<dyn SubmissionStore>,
        log: Arc<dyn ExecutionLog>,
    ) -> Self {
        Self {
            admission,
            catalog,
            sandbox,
            store,
            log,
            slots: Arc::new(Semaphore::new(settings.pool_size)),
            settings,
        }
    }

    pub async fn usage(&self, user_id: &str) -> UsageSnapshot {
        self.admission.usage(user_id).await
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Runs the request to completion. Progress is reported on `events`; a
    /// receiver that went away does not stop the run.
    #[tracing::instrument(skip_all, fields(user_id = %request.user_id, language = %request.language))]
    pub async fn run(&self, request: RunRequest, events: Sender<RunEvent>) -> RunOutcome {
        let started_at = Utc::now();
        let started = Instant::now();

        let outcome = match self.admission.admit_at(&request.user_id, started_at).await {
            AdmissionDecision::Allow => self.run_admitted(&request, &events).await,
            AdmissionDecision::RateLimited { retry_after } => {
                RunOutcome::Rejected(Rejection::RateLimited { retry_after })
            }
            AdmissionDecision::QuotaExceeded { resets_at } => {
                RunOutcome::Rejected(Rejection::QuotaExceeded { resets_at })
            }
        };

        let entry = log_entry(&request, &outcome, started_at, elapsed_ms(started));
        tracing::info!(
            submission_id = ?entry.submission_id,
            status = ?entry.status,
            timing_ms = entry.timing_ms,
            compile_ok = entry.compile_ok,
            tests_failed = ?entry.tests_failed_count,
            "Run finished"
        );
        if let Err(err) = self.log.append(entry).await {
            tracing::error!(error = %err, "Failed to append execution log entry");
        }

        let _ = events.send(RunEvent::Done(outcome.clone())).await;
        outcome
    }

    async fn run_admitted(&self, request: &RunRequest, events: &Sender<RunEvent>) -> RunOutcome {
        let profile = self.catalog.profile(request.language).clone();
        let limits = RunLimits::resolve(&self.settings.default_limits, &request.limits, &profile.ceilings);

        let new = NewSubmission {
            user_id: request.user_id.clone(),
            target: request.target.clone(),
            language: request.language,
        };
        let id = match self.store.create(new).await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(error = %err, "Failed to create submission");
                return RunOutcome::Aborted {
                    error_message: INTERNAL_ERROR_MESSAGE.to_string(),
                };
            }
        };
        let _ = events.send(RunEvent::Queued(id)).await;

        let permit = match tokio::time::timeout(
            self.settings.slot_wait,
            self.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                let failure = RunFailure::Infrastructure {
                    detail: format!("no sandbox slot within {:?}", self.settings.slot_wait),
                };
                return self.finish(id, Err(failure)).await;
            }
        };

        if let Err(err) = self.store.mark_running(id).await {
            return self.finish(id, Err(err.into())).await;
        }
        let _ = events.send(RunEvent::Running(id)).await;

        let job = Job {
            sandbox: self.sandbox.clone(),
            profile,
            limits,
            files: request.files(),
            entry_point: request.entry_point(),
            suite: request.test_suite.clone(),
            compile_timeout: self.settings.compile_timeout,
            provision_backoff: self.settings.provision_backoff,
        };
        let verdict = tokio::spawn(async move {
            let _permit = permit;
            job.execute().await
        })
        .await
        .unwrap_or_else(|err| {
            Err(RunFailure::Infrastructure {
                detail: format!("run task failed: {err}"),
            })
        });

        self.finish(id, verdict).await
    }

    async fn finish(&self, id: Uuid, verdict: Result<Verdict, RunFailure>) -> RunOutcome {
        let record = match verdict {
            Ok(verdict) => TerminalRecord {
                status: verdict.status,
                result: Some(verdict.result),
                error_message: verdict.error_message,
            },
            Err(failure) => {
                tracing::error!(submission_id = %id, error = %failure, "Run failed");
                TerminalRecord {
                    status: SubmissionStatus::Error,
                    result: None,
                    error_message: Some(failure.user_message().to_string()),
                }
            }
        };

        if let Err(err) = self.store.finish(id, record.clone()).await {
            tracing::error!(submission_id = %id, error = %err, "Failed to record terminal state");
        }

        RunOutcome::Completed(Completion {
            submission_id: id,
            status: record.status,
            result: record.result,
            error_message: record.error_message,
        })
    }
}

/// Everything the sandboxed part of a run needs, owned so it can be moved
/// onto its own task.
struct Job {
    sandbox: Arc<dyn Sandbox>,
    profile: Arc<ExecutionProfile>,
    limits: RunLimits,
    files: Vec<SourceFile>,
    entry_point: String,
    suite: TestSuite,
    compile_timeout: Duration,
    provision_backoff: Duration,
}

impl Job {
    async fn execute(self) -> Result<Verdict, RunFailure> {
        let spec = SandboxSpec {
            profile: self.profile.clone(),
            limits: self.limits,
        };
        let guard = provision_with_retry(&self.sandbox, &spec, self.provision_backoff).await?;
        let verdict = self.evaluate(guard.handle()).await;
        guard.release().await;
        verdict
    }

    async fn evaluate(&self, handle: &SandboxHandle) -> Result<Verdict, RunFailure> {
        let adapter = LanguageAdapter::new(self.profile.language, self.sandbox.as_ref());

        let started = Instant::now();
        let compiled = adapter
            .compile(
                handle,
                &self.files,
                self.compile_timeout,
                self.limits.output_limit_bytes,
            )
            .await?;
        let compile = compiled.report;
        if !compile.ok {
            let mut verdict = assemble(compile, None, self.limits, elapsed_ms(started));
            verdict.result.output_truncated = compiled.output_truncated;
            return Ok(verdict);
        }

        let started = Instant::now();
        let suite = run_suite(&adapter, handle, &self.entry_point, &self.suite, &self.limits).await?;
        Ok(assemble(compile, Some(suite), self.limits, elapsed_ms(started)))
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

fn log_entry(
    request: &RunRequest,
    outcome: &RunOutcome,
    started_at: DateTime<Utc>,
    elapsed_ms: u64,
) -> ExecutionLogEntry {
    let mut entry = ExecutionLogEntry {
        user_id: request.user_id.clone(),
        kind: request.target.kind(),
        item_id: request.target.item_id().map(str::to_string),
        project_id: request.target.project_id().map(str::to_string),
        submission_id: None,
        started_at,
        finished_at: Utc::now(),
        status: LogStatus::Error,
        timing_ms: elapsed_ms,
        compile_ok: false,
        tests_passed: None,
        tests_failed_count: None,
        error_message: None,
    };

    match outcome {
        RunOutcome::Rejected(Rejection::RateLimited { .. }) => {
            entry.status = LogStatus::RateLimited;
        }
        RunOutcome::Rejected(Rejection::QuotaExceeded { .. }) => {
            entry.status = LogStatus::QuotaExceeded;
        }
        RunOutcome::Aborted { error_message } => {
            entry.error_message = Some(error_message.clone());
        }
        RunOutcome::Completed(completion) => {
            entry.submission_id = Some(completion.submission_id);
            entry.status = completion.status.into();
            entry.error_message = completion.error_message.clone();
            if let Some(result) = &completion.result {
                entry.timing_ms = result.timing_ms;
                entry.compile_ok = result.compile.ok;
                entry.tests_passed = result.tests_passed();
                entry.tests_failed_count = result.tests_failed();
            }
        }
    }
    entry
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{Receiver, channel};

    use super::*;
    use crate::constants::HIDDEN_PLACEHOLDER;
    use crate::core::domain::{Comparator, LimitsOverride, RunTarget, Source, TestCase};
    use crate::core::languages::Language;
    use crate::core::traits::counters::AdmissionCeilings;
    use crate::core::traits::sandbox::{ExecOutput, ExecRequest, SandboxError};
    use crate::memory::counters::InMemoryCounters;
    use crate::memory::store::InMemoryStore;
    use crate::stubs::sandbox::{ScriptedSandbox, is_compile};

    struct Harness {
        orchestrator: Orchestrator,
        sandbox: ScriptedSandbox,
        store: Arc<InMemoryStore>,
    }

    fn harness(sandbox: ScriptedSandbox, tweak: impl FnOnce(&mut RunnerConfig)) -> Harness {
        let mut config = RunnerConfig {
            pool_size: 2,
            slot_wait: Duration::from_secs(5),
            provision_backoff: Duration::from_millis(1),
            admission: AdmissionCeilings {
                per_minute: 100,
                per_day: 100,
            },
            ..RunnerConfig::default()
        };
        tweak(&mut config);

        let catalog = Arc::new(Catalog::from_config(&config).unwrap());
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = Orchestrator::new(
            OrchestratorSettings::from(&config),
            AdmissionController::new(Arc::new(InMemoryCounters::new()), config.admission),
            catalog,
            Arc::new(sandbox.clone()),
            store.clone(),
            store.clone(),
        );
        Harness {
            orchestrator,
            sandbox,
            store,
        }
    }

    /// Python program that echoes stdin, loops forever on "loop" and blows
    /// its memory limit on "oom". Code containing "syntax error" fails to
    /// compile.
    fn echo_program(req: &ExecRequest) -> Result<ExecOutput, SandboxError> {
        let stdin = req.stdin.clone().unwrap_or_default();
        Ok(match stdin.as_str() {
            _ if is_compile(req) => ExecOutput::default(),
            "loop" => ExecOutput {
                exit_code: 124,
                timed_out: true,
                elapsed_ms: req.timeout.as_millis() as u64,
                ..Default::default()
            },
            "oom" => ExecOutput {
                exit_code: 137,
                resource_killed: true,
                ..Default::default()
            },
            _ => ExecOutput {
                stdout: format!("{stdin}\n"),
                ..Default::default()
            },
        })
    }

    fn case(stdin: &str, expected: &str) -> TestCase {
        TestCase {
            name: format!("echo {stdin}"),
            stdin: stdin.to_string(),
            expected_stdout: expected.to_string(),
            comparator: Comparator::Trimmed,
            hidden: false,
            timeout_ms: None,
        }
    }

    fn request(cases: Vec<TestCase>) -> RunRequest {
        RunRequest {
            user_id: "user-1".to_string(),
            target: RunTarget::Challenge {
                item_id: "echo".to_string(),
            },
            language: Language::Python,
            source: Source::Code("print(input())".to_string()),
            entry_point: None,
            test_suite: TestSuite { cases },
            limits: LimitsOverride::default(),
        }
    }

    async fn run(orchestrator: &Orchestrator, request: RunRequest) -> (RunOutcome, Vec<RunEvent>) {
        let (tx, rx) = channel(16);
        let outcome = orchestrator.run(request, tx).await;
        (outcome, drain(rx).await)
    }

    async fn drain(mut rx: Receiver<RunEvent>) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn completion(outcome: RunOutcome) -> Completion {
        match outcome {
            RunOutcome::Completed(completion) => completion,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_passing_run() {
        let h = harness(ScriptedSandbox::new(echo_program), |_| {});
        let (outcome, events) = run(&h.orchestrator, request(vec![case("1", "1"), case("2", "2")])).await;

        let done = completion(outcome.clone());
        assert_eq!(done.status, SubmissionStatus::Passed);
        let result = done.result.unwrap();
        assert!(result.passed);
        assert!(result.compile.ok);
        assert!(result.tests.unwrap().iter().all(|t| t.passed));
        assert_eq!(result.limits, RunnerConfig::default().default_limits);

        assert_eq!(
            events,
            vec![
                RunEvent::Queued(done.submission_id),
                RunEvent::Running(done.submission_id),
                RunEvent::Done(outcome),
            ]
        );

        let stored = h.store.get(done.submission_id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Passed);
        assert!(stored.result.is_some());

        let log = h.store.log_entries().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, LogStatus::Passed);
        assert_eq!(log[0].submission_id, Some(done.submission_id));
        assert_eq!(log[0].item_id.as_deref(), Some("echo"));
        assert_eq!(log[0].tests_passed, Some(2));
        assert_eq!(log[0].tests_failed_count, Some(0));

        assert_eq!(h.sandbox.provisioned_count(), 1);
        assert_eq!(h.sandbox.teardown_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_answer_is_failed() {
        let h = harness(ScriptedSandbox::new(echo_program), |_| {});
        let (outcome, _) = run(&h.orchestrator, request(vec![case("1", "1"), case("2", "3")])).await;

        let done = completion(outcome);
        assert_eq!(done.status, SubmissionStatus::Failed);
        assert!(done.error_message.is_none());
        let log = h.store.log_entries().await;
        assert_eq!(log[0].status, LogStatus::Failed);
        assert_eq!(log[0].tests_failed_count, Some(1));
    }

    #[tokio::test]
    async fn test_syntax_error_is_failed_without_tests() {
        let sandbox = ScriptedSandbox::new(|req| {
            if is_compile(req) {
                Ok(ExecOutput {
                    exit_code: 1,
                    stderr: "SyntaxError: invalid syntax".to_string(),
                    ..Default::default()
                })
            } else {
                panic!("program must not run after a failed compile")
            }
        });
        let h = harness(sandbox, |_| {});
        let (outcome, _) = run(&h.orchestrator, request(vec![case("1", "1")])).await;

        let done = completion(outcome);
        assert_eq!(done.status, SubmissionStatus::Failed);
        let result = done.result.unwrap();
        assert!(!result.compile.ok);
        assert!(!result.compile.stderr.unwrap().is_empty());
        assert!(result.tests.is_none());

        let log = h.store.log_entries().await;
        assert!(!log[0].compile_ok);
        assert_eq!(h.sandbox.teardown_count(), 1);
    }

    #[tokio::test]
    async fn test_truncated_compile_diagnostics_keep_the_flag() {
        let sandbox = ScriptedSandbox::new(|req| {
            Ok(ExecOutput {
                exit_code: 1,
                stderr: "SyntaxError: invalid syntax".to_string(),
                output_truncated: is_compile(req),
                ..Default::default()
            })
        });
        let h = harness(sandbox, |_| {});
        let (outcome, _) = run(&h.orchestrator, request(vec![case("1", "1")])).await;

        let result = completion(outcome).result.unwrap();
        assert!(!result.compile.ok);
        assert!(result.output_truncated);
    }

    #[tokio::test]
    async fn test_infinite_loop_is_timeout_error() {
        let h = harness(ScriptedSandbox::new(echo_program), |_| {});
        let mut req = request(vec![case("loop", ""), case("1", "1")]);
        req.limits.timeout_ms = Some(2000);
        let (outcome, _) = run(&h.orchestrator, req).await;

        let done = completion(outcome);
        assert_eq!(done.status, SubmissionStatus::Error);
        assert_eq!(done.error_message.as_deref(), Some("timeout"));
        let result = done.result.unwrap();
        assert_eq!(result.limits.timeout_ms, 2000);
        assert_eq!(result.tests.unwrap().len(), 2);

        let log = h.store.log_entries().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, LogStatus::Error);
        assert_eq!(log[0].error_message.as_deref(), Some("timeout"));
        assert_eq!(h.sandbox.teardown_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_kill_is_resource_error() {
        let h = harness(ScriptedSandbox::new(echo_program), |_| {});
        let (outcome, _) = run(&h.orchestrator, request(vec![case("oom", "")])).await;

        let done = completion(outcome);
        assert_eq!(done.status, SubmissionStatus::Error);
        assert_eq!(done.error_message.as_deref(), Some("resource limit exceeded"));
        assert_eq!(h.sandbox.teardown_count(), 1);
    }

    #[tokio::test]
    async fn test_hidden_case_is_redacted() {
        let h = harness(ScriptedSandbox::new(echo_program), |_| {});
        let mut secret = case("7", "8");
        secret.hidden = true;
        let (outcome, _) = run(&h.orchestrator, request(vec![secret])).await;

        let tests = completion(outcome).result.unwrap().tests.unwrap();
        assert_eq!(tests[0].expected, HIDDEN_PLACEHOLDER);
        assert_eq!(tests[0].actual, HIDDEN_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_quota_exceeded_creates_no_submission() {
        let h = harness(ScriptedSandbox::new(echo_program), |config| {
            config.admission.per_day = 1;
        });
        let (first, _) = run(&h.orchestrator, request(vec![case("1", "1")])).await;
        assert!(matches!(first, RunOutcome::Completed(_)));

        let (second, events) = run(&h.orchestrator, request(vec![case("1", "1")])).await;
        assert!(matches!(
            second,
            RunOutcome::Rejected(Rejection::QuotaExceeded { .. })
        ));
        assert_eq!(events, vec![RunEvent::Done(second)]);

        assert_eq!(h.store.submission_count(), 1);
        let log = h.store.log_entries().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].status, LogStatus::QuotaExceeded);
        assert!(log[1].submission_id.is_none());
        assert_eq!(h.sandbox.provisioned_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_reports_retry_after() {
        let h = harness(ScriptedSandbox::new(echo_program), |config| {
            config.admission.per_minute = 1;
        });
        run(&h.orchestrator, request(vec![])).await;
        let (outcome, _) = run(&h.orchestrator, request(vec![])).await;

        let RunOutcome::Rejected(Rejection::RateLimited { retry_after }) = outcome else {
            panic!("expected rate limiting, got {outcome:?}");
        };
        assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(60));
        let log = h.store.log_entries().await;
        assert_eq!(log[1].status, LogStatus::RateLimited);
    }

    #[tokio::test]
    async fn test_provisioning_is_retried_once() {
        let h = harness(ScriptedSandbox::new(echo_program).failing_provisions(1), |_| {});
        let (outcome, _) = run(&h.orchestrator, request(vec![case("1", "1")])).await;
        assert_eq!(completion(outcome).status, SubmissionStatus::Passed);
    }

    #[tokio::test]
    async fn test_persistent_provisioning_failure_is_opaque_error() {
        let h = harness(ScriptedSandbox::new(echo_program).failing_provisions(2), |_| {});
        let (outcome, _) = run(&h.orchestrator, request(vec![case("1", "1")])).await;

        let done = completion(outcome);
        assert_eq!(done.status, SubmissionStatus::Error);
        assert_eq!(done.error_message.as_deref(), Some("internal error"));
        assert!(done.result.is_none());
        assert_eq!(h.sandbox.teardown_count(), 0);

        let stored = h.store.get(done.submission_id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Error);
        assert_eq!(h.store.log_entries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sandbox_failure_mid_run_still_tears_down() {
        let sandbox = ScriptedSandbox::new(|req| {
            if is_compile(req) {
                Ok(ExecOutput::default())
            } else {
                Err(SandboxError::Exec {
                    msg: "container vanished".to_string(),
                })
            }
        });
        let h = harness(sandbox, |_| {});
        let (outcome, _) = run(&h.orchestrator, request(vec![case("1", "1")])).await;

        let done = completion(outcome);
        assert_eq!(done.status, SubmissionStatus::Error);
        assert_eq!(done.error_message.as_deref(), Some("internal error"));
        assert_eq!(h.sandbox.teardown_count(), 1);
    }

    #[tokio::test]
    async fn test_slot_wait_timeout_errors_queued_submission() {
        let sandbox = ScriptedSandbox::new(echo_program).with_delay(Duration::from_millis(300));
        let h = harness(sandbox, |config| {
            config.pool_size = 1;
            config.slot_wait = Duration::from_millis(50);
        });

        let (slow, starved) = tokio::join!(
            run(&h.orchestrator, request(vec![case("1", "1")])),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                run(&h.orchestrator, request(vec![case("1", "1")])).await
            }
        );

        assert_eq!(completion(slow.0).status, SubmissionStatus::Passed);

        let done = completion(starved.0);
        assert_eq!(done.status, SubmissionStatus::Error);
        assert_eq!(done.error_message.as_deref(), Some("internal error"));
        assert!(!starved.1.iter().any(|e| matches!(e, RunEvent::Running(_))));
        assert_eq!(h.store.get(done.submission_id).unwrap().status, SubmissionStatus::Error);
        assert_eq!(h.store.log_entries().await.len(), 2);
        assert_eq!(h.sandbox.provisioned_count(), 1);
    }

    #[tokio::test]
    async fn test_identical_requests_are_deterministic() {
        let h = harness(ScriptedSandbox::new(echo_program), |_| {});
        let req = request(vec![case("1", "1"), case("2", "5")]);
        let (first, _) = run(&h.orchestrator, req.clone()).await;
        let (second, _) = run(&h.orchestrator, req).await;

        let (first, second) = (completion(first), completion(second));
        assert_ne!(first.submission_id, second.submission_id);
        assert_eq!(
            first.result.map(|r| r.passed),
            second.result.map(|r| r.passed)
        );
        assert_eq!(h.store.log_entries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_cancel_run() {
        let h = harness(ScriptedSandbox::new(echo_program), |_| {});
        let (tx, rx) = channel(1);
        drop(rx);

        let outcome = h.orchestrator.run(request(vec![case("1", "1")]), tx).await;
        assert_eq!(completion(outcome).status, SubmissionStatus::Passed);
        assert_eq!(h.sandbox.teardown_count(), 1);
    }
}
