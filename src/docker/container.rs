use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use bollard::models::{ContainerCreateBody, HostConfig};
use uuid::Uuid;

use crate::constants::{SANDBOX_LABEL, SIGKILL_EXIT_CODE, TIMEOUT_EXIT_CODE};
use crate::core::traits::sandbox::SandboxSpec;

const MB: i64 = 1024 * 1024;

/// Container that idles until commands are exec'd into it. Every isolation
/// flag comes from the profile; resource limits come from the run.
pub fn container_body(
    spec: &SandboxSpec,
    workspace: &Path,
    sandbox_id: Uuid,
) -> Result<ContainerCreateBody, serde_json::Error> {
    let flags = &spec.profile.container;
    Ok(ContainerCreateBody {
        image: Some(spec.profile.image.clone()),
        cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
        user: Some(flags.user.clone()),
        working_dir: Some(flags.workspace_path.clone()),
        network_disabled: Some(flags.network_mode == "none"),
        labels: Some(HashMap::from([(
            SANDBOX_LABEL.to_string(),
            sandbox_id.to_string(),
        )])),
        host_config: Some(host_config(spec, workspace)?),
        ..Default::default()
    })
}

pub fn host_config(spec: &SandboxSpec, workspace: &Path) -> Result<HostConfig, serde_json::Error> {
    let flags = &spec.profile.container;
    let limits = &spec.limits;
    let memory = limits.memory_mb as i64 * MB;

    let mut security_opt = vec![format!("seccomp={}", spec.profile.seccomp.to_json()?)];
    if flags.no_new_privileges {
        security_opt.push("no-new-privileges:true".to_string());
    }

    Ok(HostConfig {
        binds: Some(vec![format!(
            "{}:{}:ro",
            workspace.display(),
            flags.workspace_path
        )]),
        tmpfs: Some(HashMap::from([(
            flags.tmpfs_path.clone(),
            flags.tmpfs_options(),
        )])),
        network_mode: Some(flags.network_mode.clone()),
        readonly_rootfs: Some(flags.read_only_root),
        cap_drop: Some(flags.cap_drop.clone()),
        security_opt: Some(security_opt),
        memory: Some(memory),
        memory_swap: Some(memory),
        nano_cpus: Some((limits.cpu * 1e9) as i64),
        pids_limit: Some(i64::from(limits.pids)),
        ..Default::default()
    })
}

/// Wraps `argv` so the sandbox itself kills the command at its deadline.
pub fn deadline_argv(argv: &[String], timeout: Duration) -> Vec<String> {
    let mut wrapped = vec![
        "timeout".to_string(),
        "--signal=KILL".to_string(),
        format!("{}.{:03}s", timeout.as_secs(), timeout.subsec_millis()),
    ];
    wrapped.extend(argv.iter().cloned());
    wrapped
}

/// Kills every process the sandbox user owns except the container's init
/// and the calling shell.
pub fn reap_argv() -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), "kill -KILL -1".to_string()]
}

/// Tells a deadline kill apart from a kill by the memory or pids controller.
/// Both end in SIGKILL; only the deadline kill happens at or after the
/// deadline. A program can exit with 124 on its own, so that status only
/// counts as a timeout once the deadline has passed.
pub fn classify_exit(exit_code: i64, elapsed: Duration, timeout: Duration) -> (bool, bool) {
    let past_deadline = elapsed >= timeout;
    match exit_code {
        TIMEOUT_EXIT_CODE | SIGKILL_EXIT_CODE if past_deadline => (true, false),
        SIGKILL_EXIT_CODE => (false, true),
        _ => (false, false),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::core::domain::RunLimits;
    use crate::core::languages::Language;
    use crate::core::profile::{BLOCKED_SYSCALLS, ExecutionProfile, SeccompProfile};

    fn spec() -> SandboxSpec {
        SandboxSpec {
            profile: Arc::new(ExecutionProfile::builtin(Language::Python, "python:3.12-slim", 32)),
            limits: RunLimits {
                cpu: 0.5,
                memory_mb: 256,
                timeout_ms: 2000,
                output_limit_bytes: 1024,
                pids: 32,
            },
        }
    }

    #[test]
    fn test_host_config_applies_isolation_flags() {
        let config = host_config(&spec(), &PathBuf::from("/srv/runs/abc")).unwrap();

        assert_eq!(config.network_mode.as_deref(), Some("none"));
        assert_eq!(config.readonly_rootfs, Some(true));
        assert_eq!(config.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(config.binds, Some(vec!["/srv/runs/abc:/workspace:ro".to_string()]));

        let tmpfs = config.tmpfs.unwrap();
        let tmp = &tmpfs["/tmp"];
        assert!(tmp.contains("noexec"));
        assert!(tmp.contains("nosuid"));
        assert!(tmp.contains("size=32m"));

        let security_opt = config.security_opt.unwrap();
        assert!(security_opt.contains(&"no-new-privileges:true".to_string()));
        let seccomp = security_opt
            .iter()
            .find_map(|opt| opt.strip_prefix("seccomp="))
            .unwrap();
        let profile: SeccompProfile = serde_json::from_str(seccomp).unwrap();
        assert!(BLOCKED_SYSCALLS.iter().all(|s| profile.denied().contains(s)));
    }

    #[test]
    fn test_host_config_applies_run_limits() {
        let config = host_config(&spec(), &PathBuf::from("/w")).unwrap();
        assert_eq!(config.memory, Some(256 * MB));
        assert_eq!(config.memory_swap, config.memory);
        assert_eq!(config.nano_cpus, Some(500_000_000));
        assert_eq!(config.pids_limit, Some(32));
    }

    #[test]
    fn test_container_runs_unprivileged_without_network() {
        let id = Uuid::new_v4();
        let body = container_body(&spec(), &PathBuf::from("/w"), id).unwrap();
        assert_eq!(body.user.as_deref(), Some("65534:65534"));
        assert_eq!(body.network_disabled, Some(true));
        assert_eq!(body.image.as_deref(), Some("python:3.12-slim"));
        assert_eq!(body.labels.unwrap()[SANDBOX_LABEL], id.to_string());
    }

    #[test]
    fn test_deadline_argv() {
        let argv = deadline_argv(
            &["python3".to_string(), "/workspace/main.py".to_string()],
            Duration::from_millis(2500),
        );
        assert_eq!(
            argv,
            vec!["timeout", "--signal=KILL", "2.500s", "python3", "/workspace/main.py"]
        );
    }

    #[test]
    fn test_reap_signals_every_process() {
        assert_eq!(reap_argv(), vec!["sh", "-c", "kill -KILL -1"]);
    }

    #[test]
    fn test_classify_exit() {
        let limit = Duration::from_secs(2);
        assert_eq!(classify_exit(0, Duration::from_millis(10), limit), (false, false));
        assert_eq!(classify_exit(1, Duration::from_millis(10), limit), (false, false));
        assert_eq!(classify_exit(124, Duration::from_millis(2001), limit), (true, false));
        assert_eq!(classify_exit(137, Duration::from_millis(2050), limit), (true, false));
        assert_eq!(classify_exit(137, Duration::from_millis(300), limit), (false, true));
    }

    #[test]
    fn test_early_exit_124_is_a_plain_failure() {
        let limit = Duration::from_secs(2);
        assert_eq!(classify_exit(124, Duration::from_millis(10), limit), (false, false));
        assert_eq!(classify_exit(124, Duration::from_millis(1999), limit), (false, false));
    }
}
