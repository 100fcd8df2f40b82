use std::sync::Arc;
use std::time::Duration;

use crate::core::traits::sandbox::{Sandbox, SandboxError, SandboxHandle, SandboxSpec};

/// Exclusive ownership of a live sandbox.
///
/// `release` tears the sandbox down and should be awaited on every normal
/// path. If the guard is dropped instead (panic, cancelled future), teardown
/// is spawned onto the runtime so the container never outlives its run.
#[derive(Debug)]
pub struct SandboxGuard {
    sandbox: Arc<dyn Sandbox>,
    handle: SandboxHandle,
    released: bool,
}

impl SandboxGuard {
    pub fn handle(&self) -> &SandboxHandle {
        &self.handle
    }

    pub async fn release(mut self) {
        self.released = true;
        teardown(self.sandbox.as_ref(), &self.handle).await;
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let sandbox = self.sandbox.clone();
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(sandbox_id = %handle.id, "Sandbox dropped without release, tearing down");
                runtime.spawn(async move {
                    teardown(sandbox.as_ref(), &handle).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    sandbox_id = %handle.id,
                    container_id = %handle.container_id,
                    "Sandbox leaked: no runtime available for teardown"
                );
            }
        }
    }
}

async fn teardown(sandbox: &dyn Sandbox, handle: &SandboxHandle) {
    match sandbox.teardown(handle).await {
        Ok(()) => tracing::debug!(sandbox_id = %handle.id, "Sandbox torn down"),
        Err(err) => tracing::error!(sandbox_id = %handle.id, error = %err, "Sandbox teardown failed"),
    }
}

/// Provisions a sandbox, retrying once after `backoff` when the first
/// attempt fails.
#[tracing::instrument(skip(sandbox, spec), fields(language = %spec.profile.language))]
pub async fn provision_with_retry(
    sandbox: &Arc<dyn Sandbox>,
    spec: &SandboxSpec,
    backoff: Duration,
) -> Result<SandboxGuard, SandboxError> {
    let handle = match sandbox.provision(spec).await {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(error = %err, ?backoff, "Provisioning failed, retrying once");
            tokio::time::sleep(backoff).await;
            sandbox.provision(spec).await?
        }
    };

    tracing::debug!(sandbox_id = %handle.id, "Sandbox provisioned");
    Ok(SandboxGuard {
        sandbox: sandbox.clone(),
        handle,
        released: false,
    })
}
