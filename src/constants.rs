use std::time::Duration;

/// Mount point of the read-only source bind mount inside every sandbox.
pub const WORKSPACE_DIR: &str = "/workspace";
/// The only writable path inside a sandbox.
pub const TMP_DIR: &str = "/tmp";
/// `nobody:nogroup`
pub const SANDBOX_USER: &str = "65534:65534";

/// Extra time the host waits past an exec deadline before it gives up on the
/// in-container `timeout` wrapper, abandons the exec and kills every process
/// left in the sandbox.
pub const HOST_DEADLINE_GRACE: Duration = Duration::from_millis(1500);

/// GNU `timeout` exit status when the wrapped command ran out of time.
pub const TIMEOUT_EXIT_CODE: i64 = 124;
/// 128 + SIGKILL
pub const SIGKILL_EXIT_CODE: i64 = 137;

pub const HIDDEN_PLACEHOLDER: &str = "[hidden]";
pub const NOT_RUN_MESSAGE: &str = "not run: run terminated early";
pub const CASE_TIMEOUT_MESSAGE: &str = "time limit exceeded";

pub const TIMEOUT_ERROR_MESSAGE: &str = "timeout";
pub const RESOURCE_ERROR_MESSAGE: &str = "resource limit exceeded";
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

pub const SANDBOX_LABEL: &str = "sandbox-runner.run-id";

pub const STREAM_CHANNEL_CAPACITY: usize = 16;
