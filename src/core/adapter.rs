use std::time::Duration;

use crate::core::domain::{CompileReport, SourceFile};
use crate::core::languages::Language;
use crate::core::traits::sandbox::{
    ExecOutput, ExecRequest, Sandbox, SandboxError, SandboxHandle,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Compiled {
    pub report: CompileReport,
    /// Compiler output was cut to the run's output limit.
    pub output_truncated: bool,
}

/// Compile/execute contract shared by every language. Languages differ only
/// in the commands `Language` produces; the flow here is identical.
#[derive(Debug)]
pub struct LanguageAdapter<'a> {
    language: Language,
    sandbox: &'a dyn Sandbox,
}

impl<'a> LanguageAdapter<'a> {
    pub fn new(language: Language, sandbox: &'a dyn Sandbox) -> Self {
        Self { language, sandbox }
    }

    /// Places the sources in the sandbox and runs the compile step.
    /// A `CompileReport` with `ok == false` is a verdict about the code, not an
    /// error; `Err` is reserved for the sandbox itself misbehaving.
    #[tracing::instrument(skip(self, handle, files), fields(language = %self.language))]
    pub async fn compile(
        &self,
        handle: &SandboxHandle,
        files: &[SourceFile],
        timeout: Duration,
        output_limit_bytes: u64,
    ) -> Result<Compiled, SandboxError> {
        self.sandbox.write_files(handle, files).await?;

        let sources: Vec<&str> = files
            .iter()
            .map(|file| file.path.as_str())
            .filter(|path| self.language.is_source(path))
            .collect();
        if sources.is_empty() {
            return Ok(Compiled {
                report: CompileReport::failed(format!(
                    "no {} source files submitted",
                    self.language
                )),
                output_truncated: false,
            });
        }

        tracing::debug!("Start compiling");
        let out = self
            .sandbox
            .exec(
                handle,
                ExecRequest {
                    argv: self.language.compile_command(&sources),
                    env: self.language.env(),
                    stdin: None,
                    timeout,
                    output_limit_bytes,
                },
            )
            .await?;
        tracing::debug!(exit_code = out.exit_code, timed_out = out.timed_out, "Compilation finished");

        Ok(Compiled {
            output_truncated: out.output_truncated,
            report: compile_report(out),
        })
    }

    #[tracing::instrument(skip(self, handle, stdin), fields(language = %self.language))]
    pub async fn execute(
        &self,
        handle: &SandboxHandle,
        entry_point: &str,
        stdin: Option<&str>,
        timeout: Duration,
        output_limit_bytes: u64,
    ) -> Result<ExecOutput, SandboxError> {
        self.sandbox
            .exec(
                handle,
                ExecRequest {
                    argv: self.language.run_command(entry_point),
                    env: self.language.env(),
                    stdin: stdin.map(str::to_string),
                    timeout,
                    output_limit_bytes,
                },
            )
            .await
    }
}

fn compile_report(out: ExecOutput) -> CompileReport {
    if out.timed_out {
        return CompileReport::failed("compilation time limit exceeded");
    }
    if out.resource_killed {
        return CompileReport::failed("compilation exceeded its resource limits");
    }
    if out.exit_code == 0 {
        return CompileReport::ok();
    }

    let diagnostics = if out.stderr.trim().is_empty() {
        out.stdout
    } else {
        out.stderr
    };
    if diagnostics.trim().is_empty() {
        CompileReport::failed(format!("compiler exited with status {}", out.exit_code))
    } else {
        CompileReport::failed(diagnostics)
    }
}
