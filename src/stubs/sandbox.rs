use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use uuid::Uuid;

use crate::core::domain::SourceFile;
use crate::core::traits::sandbox::{
    ExecOutput, ExecRequest, Sandbox, SandboxError, SandboxHandle, SandboxSpec,
};

type Script = dyn Fn(&ExecRequest) -> Result<ExecOutput, SandboxError> + Send + Sync;

/// In-process sandbox whose exec results come from a script. Keeps count of
/// every lifecycle call so tests can assert that sandboxes are not leaked.
#[derive(Clone)]
pub struct ScriptedSandbox {
    script: Arc<Script>,
    delay: Duration,
    provision_failures: Arc<AtomicUsize>,
    provisioned: Arc<AtomicUsize>,
    torn_down: Arc<AtomicUsize>,
    execs: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ScriptedSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedSandbox")
            .field("delay", &self.delay)
            .field("provisioned", &self.provisioned_count())
            .field("torn_down", &self.teardown_count())
            .finish()
    }
}

impl ScriptedSandbox {
    pub fn new(
        script: impl Fn(&ExecRequest) -> Result<ExecOutput, SandboxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Arc::new(script),
            delay: Duration::ZERO,
            provision_failures: Arc::new(AtomicUsize::new(0)),
            provisioned: Arc::new(AtomicUsize::new(0)),
            torn_down: Arc::new(AtomicUsize::new(0)),
            execs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every exec succeeds with empty output.
    pub fn passing() -> Self {
        Self::new(|_| Ok(ExecOutput::default()))
    }

    /// Every exec takes `delay` of wall time before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The next `count` provision calls fail.
    pub fn failing_provisions(self, count: usize) -> Self {
        self.provision_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn handle() -> SandboxHandle {
        SandboxHandle {
            id: Uuid::nil(),
            container_id: "scripted".to_string(),
            workspace: PathBuf::from("/nonexistent"),
        }
    }

    pub fn provisioned_count(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn teardown_count(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }
}

/// Whether the request is a compile step rather than a program run.
pub fn is_compile(request: &ExecRequest) -> bool {
    request.argv.iter().any(|arg| {
        arg == "py_compile" || arg == "node-check" || arg == "javac"
    })
}

#[async_trait::async_trait]
impl Sandbox for ScriptedSandbox {
    async fn provision(&self, _spec: &SandboxSpec) -> Result<SandboxHandle, SandboxError> {
        let failing = self
            .provision_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SandboxError::Provision {
                msg: "scripted provisioning failure".to_string(),
            });
        }

        self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxHandle {
            id: Uuid::new_v4(),
            ..Self::handle()
        })
    }

    async fn write_files(
        &self,
        _handle: &SandboxHandle,
        _files: &[SourceFile],
    ) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn exec(
        &self,
        _handle: &SandboxHandle,
        request: ExecRequest,
    ) -> Result<ExecOutput, SandboxError> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(&request)
    }

    async fn teardown(&self, _handle: &SandboxHandle) -> Result<(), SandboxError> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
