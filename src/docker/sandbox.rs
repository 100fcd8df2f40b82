use std::path::{Path, PathBuf};
use std::time::Instant;

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, RemoveContainerOptions, StartContainerOptions,
};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::constants::HOST_DEADLINE_GRACE;
use crate::core::domain::{SourceFile, is_safe_relative_path};
use crate::core::output::CappedOutput;
use crate::core::traits::sandbox::{
    ExecOutput, ExecRequest, Sandbox, SandboxError, SandboxHandle, SandboxSpec,
};
use crate::docker::container::{classify_exit, container_body, deadline_argv, reap_argv};

/// One hardened container per run, driven through the local Docker daemon.
///
/// Sources live in a host directory that is bind-mounted read-only, so the
/// sandboxed process can read but never modify them.
#[derive(Debug)]
pub struct DockerSandbox {
    docker: Docker,
    workspace_root: PathBuf,
}

impl DockerSandbox {
    pub fn connect(workspace_root: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| SandboxError::Provision {
            msg: format!("cannot connect to docker: {e}"),
        })?;
        Ok(Self {
            docker,
            workspace_root: workspace_root.into(),
        })
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image, "Pulling sandbox image");
        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| SandboxError::Provision {
                msg: format!("pull {image}: {e}"),
            })?;
        }
        Ok(())
    }

    async fn create_workspace(&self, id: Uuid) -> Result<PathBuf, SandboxError> {
        let workspace = self.workspace_root.join(id.to_string());
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| SandboxError::Provision {
                msg: format!("create workspace {}: {e}", workspace.display()),
            })?;
        Ok(workspace)
    }

    async fn start_container(
        &self,
        spec: &SandboxSpec,
        workspace: &Path,
        id: Uuid,
    ) -> Result<String, SandboxError> {
        let provision_err = |e: bollard::errors::Error| SandboxError::Provision { msg: e.to_string() };

        let body = container_body(spec, workspace, id).map_err(|e| SandboxError::Provision {
            msg: format!("serialize seccomp profile: {e}"),
        })?;
        let options = Some(CreateContainerOptions {
            name: Some(format!("sandbox-{id}")),
            ..Default::default()
        });
        let container = self
            .docker
            .create_container(options, body)
            .await
            .map_err(provision_err)?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
        {
            self.remove_container(&container.id).await;
            return Err(provision_err(e));
        }
        Ok(container.id)
    }

    async fn remove_container(&self, container_id: &str) {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        });
        if let Err(e) = self.docker.remove_container(container_id, options).await {
            tracing::warn!(container_id, error = %e, "Failed to remove container");
        }
    }

    /// Kills whatever an abandoned exec left running so the next exec in the
    /// same container starts clean. The exec runs as the sandbox user, so it
    /// only reaches the sandbox's own processes.
    async fn reap_processes(&self, container_id: &str) {
        let reap = async {
            let exec = self
                .docker
                .create_exec(
                    container_id,
                    CreateExecOptions {
                        cmd: Some(reap_argv()),
                        attach_stdout: Some(true),
                        attach_stderr: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            let started = self
                .docker
                .start_exec(
                    &exec.id,
                    Some(StartExecOptions {
                        detach: false,
                        ..Default::default()
                    }),
                )
                .await?;
            if let StartExecResults::Attached { mut output, .. } = started {
                while output.next().await.is_some() {}
            }
            Ok::<(), bollard::errors::Error>(())
        };

        match tokio::time::timeout(HOST_DEADLINE_GRACE, reap).await {
            Ok(Ok(())) => tracing::info!(container_id, "Killed processes left by an overdue exec"),
            Ok(Err(e)) => {
                tracing::warn!(container_id, error = %e, "Failed to kill processes left by an overdue exec")
            }
            Err(_) => tracing::warn!(container_id, "Killing processes left by an overdue exec timed out"),
        }
    }

    /// Runs the exec and drains its output. Returns the exit code, or `None`
    /// when the host-side deadline fired first.
    async fn run_exec(
        &self,
        container_id: &str,
        request: &ExecRequest,
        stdout: &mut CappedOutput,
        stderr: &mut CappedOutput,
    ) -> Result<Option<i64>, SandboxError> {
        let exec_err = |e: bollard::errors::Error| SandboxError::Exec { msg: e.to_string() };

        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(deadline_argv(&request.argv, request.timeout)),
                    env: Some(request.env.clone()),
                    attach_stdin: Some(request.stdin.is_some()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(exec_err)?;

        let started = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(exec_err)?;
        let StartExecResults::Attached { mut output, mut input } = started else {
            return Err(SandboxError::Exec {
                msg: "exec started detached".to_string(),
            });
        };

        // The program may exit without reading stdin; a broken pipe here is not
        // a sandbox failure.
        let stdin = request.stdin.clone();
        let feeder = tokio::spawn(async move {
            if let Some(stdin) = stdin {
                let _ = input.write_all(stdin.as_bytes()).await;
            }
            let _ = input.shutdown().await;
        });

        let drain = async {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(exec_err)? {
                    LogOutput::StdOut { message } => stdout.push(&message),
                    LogOutput::StdErr { message } => stderr.push(&message),
                    _ => {}
                }
            }
            Ok::<(), SandboxError>(())
        };
        let finished = tokio::time::timeout(request.timeout + HOST_DEADLINE_GRACE, drain).await;
        feeder.abort();

        match finished {
            Err(_) => {
                tracing::warn!(container_id, "Exec outlived its deadline on the host side");
                self.reap_processes(container_id).await;
                Ok(None)
            }
            Ok(drained) => {
                drained?;
                let inspect = self.docker.inspect_exec(&exec.id).await.map_err(exec_err)?;
                Ok(Some(inspect.exit_code.unwrap_or(-1)))
            }
        }
    }
}

#[async_trait::async_trait]
impl Sandbox for DockerSandbox {
    #[tracing::instrument(skip_all, fields(language = %spec.profile.language))]
    async fn provision(&self, spec: &SandboxSpec) -> Result<SandboxHandle, SandboxError> {
        self.ensure_image(&spec.profile.image).await?;

        let id = Uuid::new_v4();
        let workspace = self.create_workspace(id).await?;
        match self.start_container(spec, &workspace, id).await {
            Ok(container_id) => {
                tracing::debug!(sandbox_id = %id, container_id, "Container started");
                Ok(SandboxHandle {
                    id,
                    container_id,
                    workspace,
                })
            }
            Err(err) => {
                let _ = tokio::fs::remove_dir_all(&workspace).await;
                Err(err)
            }
        }
    }

    async fn write_files(
        &self,
        handle: &SandboxHandle,
        files: &[SourceFile],
    ) -> Result<(), SandboxError> {
        for file in files {
            if !is_safe_relative_path(&file.path) {
                return Err(SandboxError::Files {
                    msg: format!("refusing path {:?}", file.path),
                });
            }

            let path = handle.workspace.join(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SandboxError::Files { msg: e.to_string() })?;
            }
            tokio::fs::write(&path, &file.content)
                .await
                .map_err(|e| SandboxError::Files { msg: e.to_string() })?;
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(sandbox_id = %handle.id))]
    async fn exec(
        &self,
        handle: &SandboxHandle,
        request: ExecRequest,
    ) -> Result<ExecOutput, SandboxError> {
        let mut stdout = CappedOutput::new(request.output_limit_bytes);
        let mut stderr = CappedOutput::new(request.output_limit_bytes);

        let started = Instant::now();
        let exit_code = self
            .run_exec(&handle.container_id, &request, &mut stdout, &mut stderr)
            .await?;
        let elapsed = started.elapsed();

        let (exit_code, timed_out, resource_killed) = match exit_code {
            None => (-1, true, false),
            Some(code) => {
                let (timed_out, resource_killed) = classify_exit(code, elapsed, request.timeout);
                (code, timed_out, resource_killed)
            }
        };
        tracing::debug!(exit_code, timed_out, resource_killed, ?elapsed, "Exec finished");

        let (stdout, stdout_truncated) = stdout.into_string();
        let (stderr, stderr_truncated) = stderr.into_string();
        Ok(ExecOutput {
            exit_code,
            output_truncated: stdout_truncated || stderr_truncated,
            stdout,
            stderr,
            timed_out,
            resource_killed,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }

    #[tracing::instrument(skip_all, fields(sandbox_id = %handle.id))]
    async fn teardown(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        });
        let removed = self
            .docker
            .remove_container(&handle.container_id, options)
            .await
            .map_err(|e| SandboxError::Teardown { msg: e.to_string() });

        if let Err(e) = tokio::fs::remove_dir_all(&handle.workspace).await {
            tracing::warn!(workspace = %handle.workspace.display(), error = %e, "Failed to remove workspace");
        }
        removed
    }
}
