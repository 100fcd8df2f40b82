use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::core::domain::{RunLimits, SourceFile};
use crate::core::profile::ExecutionProfile;

/// Everything needed to start one isolated environment.
#[derive(Clone, Debug)]
pub struct SandboxSpec {
    pub profile: Arc<ExecutionProfile>,
    pub limits: RunLimits,
}

/// Identifies a live sandbox. Owned by exactly one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: Uuid,
    pub container_id: String,
    pub workspace: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub output_limit_bytes: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// The command hit its deadline and was killed.
    pub timed_out: bool,
    /// The command was SIGKILLed before its deadline: the memory or pids
    /// controller took it down.
    pub resource_killed: bool,
    pub output_truncated: bool,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to provision sandbox: {msg}")]
    Provision { msg: String },
    #[error("failed to prepare sandbox files: {msg}")]
    Files { msg: String },
    #[error("failed to execute in sandbox: {msg}")]
    Exec { msg: String },
    #[error("failed to tear down sandbox: {msg}")]
    Teardown { msg: String },
}

/// Creates, drives and destroys isolated execution environments.
///
/// Every method except `provision` operates on a handle that the caller owns
/// exclusively, so implementations need no per-sandbox locking.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Sandbox: std::fmt::Debug + Send + Sync {
    async fn provision(&self, spec: &SandboxSpec) -> Result<SandboxHandle, SandboxError>;

    async fn write_files(
        &self,
        handle: &SandboxHandle,
        files: &[SourceFile],
    ) -> Result<(), SandboxError>;

    /// Runs a command to completion or deadline. Timeouts and kills are
    /// reported in the output, not as errors.
    async fn exec(
        &self,
        handle: &SandboxHandle,
        request: ExecRequest,
    ) -> Result<ExecOutput, SandboxError>;

    async fn teardown(&self, handle: &SandboxHandle) -> Result<(), SandboxError>;
}
