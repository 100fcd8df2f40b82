//! Hardened execution profiles: the syscall filter and container flags every
//! sandbox of a language is started with.
//!
//! Profiles are plain data. They are built once at startup, validated, and
//! shared read-only between runs.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{SANDBOX_USER, TMP_DIR, WORKSPACE_DIR};
use crate::core::languages::Language;

/// Syscalls no sandbox may ever reach: module loading, mounts and chroot,
/// clock setting, kernel log access and privilege escalation.
pub const BLOCKED_SYSCALLS: [&str; 26] = [
    "ptrace",
    "kexec_load",
    "kexec_file_load",
    "init_module",
    "finit_module",
    "delete_module",
    "acct",
    "swapon",
    "swapoff",
    "reboot",
    "settimeofday",
    "stime",
    "clock_settime",
    "adjtimex",
    "mount",
    "umount2",
    "chroot",
    "pivot_root",
    "sethostname",
    "setdomainname",
    "iopl",
    "ioperm",
    "syslog",
    "sysctl",
    "vhangup",
    "bdflush",
];

const BASE_ALLOWED_SYSCALLS: &[&str] = &[
    "access", "arch_prctl", "brk", "capget", "chdir", "clock_getres", "clock_gettime",
    "clock_nanosleep", "clone", "clone3", "close", "close_range", "connect", "copy_file_range",
    "dup", "dup2", "dup3", "epoll_create", "epoll_create1", "epoll_ctl", "epoll_pwait",
    "epoll_pwait2", "epoll_wait", "eventfd", "eventfd2", "execve", "execveat", "exit",
    "exit_group", "faccessat", "faccessat2", "fadvise64", "fallocate", "fchdir", "fchmod",
    "fchmodat", "fcntl", "fdatasync", "flock", "fstat", "fstatfs", "fsync", "ftruncate",
    "futex", "futex_waitv", "getcwd", "getdents", "getdents64", "getegid", "geteuid",
    "getgid", "getgroups", "getitimer", "getpeername", "getpgid", "getpgrp", "getpid",
    "getppid", "getpriority", "getrandom", "getresgid", "getresuid", "getrlimit",
    "get_robust_list", "getrusage", "getsid", "getsockname", "getsockopt", "gettid",
    "gettimeofday", "getuid", "getxattr", "inotify_add_watch", "inotify_init",
    "inotify_init1", "inotify_rm_watch", "ioctl", "kill", "lgetxattr", "link", "linkat",
    "listxattr", "lseek", "lstat", "madvise", "memfd_create", "mincore", "mkdir", "mkdirat",
    "mlock", "mmap", "mprotect", "mremap", "msync", "munlock", "munmap", "nanosleep",
    "newfstatat", "open", "openat", "openat2", "pause", "pipe", "pipe2", "poll", "ppoll",
    "prctl", "pread64", "preadv", "preadv2", "prlimit64", "pselect6", "pwrite64", "pwritev",
    "pwritev2", "read", "readahead", "readlink", "readlinkat", "readv", "recvfrom",
    "recvmmsg", "recvmsg", "rename", "renameat", "renameat2", "restart_syscall", "rmdir",
    "rseq", "rt_sigaction", "rt_sigpending", "rt_sigprocmask", "rt_sigqueueinfo",
    "rt_sigreturn", "rt_sigsuspend", "rt_sigtimedwait", "rt_tgsigqueueinfo",
    "sched_getaffinity", "sched_getattr", "sched_getparam", "sched_get_priority_max",
    "sched_get_priority_min", "sched_getscheduler", "sched_yield", "select", "sendfile",
    "sendmmsg", "sendmsg", "sendto", "set_robust_list", "set_tid_address", "setitimer",
    "setpgid", "setsid", "setsockopt", "shutdown", "sigaltstack", "socket", "socketpair",
    "stat", "statfs", "statx", "symlink", "symlinkat", "sync", "sysinfo", "tgkill", "time",
    "timer_create", "timer_delete", "timer_getoverrun", "timer_gettime", "timer_settime",
    "timerfd_create", "timerfd_gettime", "timerfd_settime", "tkill", "truncate", "umask",
    "uname", "unlink", "unlinkat", "utime", "utimensat", "utimes", "vfork", "wait4",
    "waitid", "write", "writev",
];

const ARCHITECTURES: [&str; 3] = ["SCMP_ARCH_X86_64", "SCMP_ARCH_X86", "SCMP_ARCH_AARCH64"];

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile for {language} must deny by default")]
    PermissiveDefault { language: Language },
    #[error("profile for {language} does not deny {syscall}")]
    MissingDeny { language: Language, syscall: String },
    #[error("profile for {language} allows blocked syscall {syscall}")]
    BlockedAllowed { language: Language, syscall: String },
    #[error("container flags for {language} are not hardened: {reason}")]
    WeakContainer { language: Language, reason: String },
    #[error("failed to read profile {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse profile {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeccompAction {
    #[serde(rename = "SCMP_ACT_ALLOW")]
    Allow,
    #[serde(rename = "SCMP_ACT_ERRNO")]
    Errno,
    #[serde(rename = "SCMP_ACT_KILL")]
    Kill,
    #[serde(rename = "SCMP_ACT_KILL_PROCESS")]
    KillProcess,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallRule {
    pub names: Vec<String>,
    pub action: SeccompAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Syscall filter in the JSON shape the container runtime accepts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompProfile {
    pub default_action: SeccompAction,
    pub architectures: Vec<String>,
    pub syscalls: Vec<SyscallRule>,
}

impl SeccompProfile {
    pub fn hardened(extra_allowed: &[&str]) -> Self {
        let allowed: BTreeSet<&str> = BASE_ALLOWED_SYSCALLS
            .iter()
            .chain(extra_allowed)
            .copied()
            .filter(|name| !BLOCKED_SYSCALLS.contains(name))
            .collect();

        Self {
            default_action: SeccompAction::Errno,
            architectures: ARCHITECTURES.iter().map(|a| a.to_string()).collect(),
            syscalls: vec![
                SyscallRule {
                    names: allowed.into_iter().map(str::to_string).collect(),
                    action: SeccompAction::Allow,
                    comment: None,
                },
                SyscallRule {
                    names: BLOCKED_SYSCALLS.iter().map(|s| s.to_string()).collect(),
                    action: SeccompAction::Errno,
                    comment: Some("never reachable from a sandbox".to_string()),
                },
            ],
        }
    }

    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ProfileError::Parse {
            path: display,
            source,
        })
    }

    fn names_with(&self, pred: impl Fn(SeccompAction) -> bool) -> BTreeSet<&str> {
        self.syscalls
            .iter()
            .filter(|rule| pred(rule.action))
            .flat_map(|rule| rule.names.iter().map(String::as_str))
            .collect()
    }

    pub fn allowed(&self) -> BTreeSet<&str> {
        self.names_with(|action| action == SeccompAction::Allow)
    }

    pub fn denied(&self) -> BTreeSet<&str> {
        self.names_with(|action| action != SeccompAction::Allow)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn validate(&self, language: Language) -> Result<(), ProfileError> {
        if self.default_action == SeccompAction::Allow {
            return Err(ProfileError::PermissiveDefault { language });
        }

        let allowed = self.allowed();
        let denied = self.denied();
        for syscall in BLOCKED_SYSCALLS {
            if allowed.contains(syscall) {
                return Err(ProfileError::BlockedAllowed {
                    language,
                    syscall: syscall.to_string(),
                });
            }
            if !denied.contains(syscall) {
                return Err(ProfileError::MissingDeny {
                    language,
                    syscall: syscall.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerFlags {
    pub network_mode: String,
    pub read_only_root: bool,
    pub user: String,
    pub cap_drop: Vec<String>,
    pub no_new_privileges: bool,
    pub tmpfs_path: String,
    pub tmpfs_size_mb: u64,
    pub workspace_path: String,
}

impl ContainerFlags {
    pub fn hardened(tmpfs_size_mb: u64) -> Self {
        Self {
            network_mode: "none".to_string(),
            read_only_root: true,
            user: SANDBOX_USER.to_string(),
            cap_drop: vec!["ALL".to_string()],
            no_new_privileges: true,
            tmpfs_path: TMP_DIR.to_string(),
            tmpfs_size_mb,
            workspace_path: WORKSPACE_DIR.to_string(),
        }
    }

    pub fn tmpfs_options(&self) -> String {
        format!("rw,nosuid,nodev,noexec,size={}m", self.tmpfs_size_mb)
    }

    fn validate(&self, language: Language) -> Result<(), ProfileError> {
        let weak = |reason: &str| ProfileError::WeakContainer {
            language,
            reason: reason.to_string(),
        };

        if self.network_mode != "none" {
            return Err(weak("network must be disabled"));
        }
        if !self.read_only_root {
            return Err(weak("root filesystem must be read-only"));
        }
        if self.user.split(':').any(|id| id == "0" || id == "root") {
            return Err(weak("sandbox must not run as root"));
        }
        if !self.cap_drop.iter().any(|cap| cap == "ALL") {
            return Err(weak("all capabilities must be dropped"));
        }
        if !self.no_new_privileges {
            return Err(weak("no-new-privileges must be set"));
        }
        if self.tmpfs_size_mb == 0 {
            return Err(weak("temp mount needs a size cap"));
        }
        Ok(())
    }
}

/// Upper bounds a request may raise its limits to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResourceCeilings {
    pub max_cpu: f64,
    pub max_memory_mb: u64,
    pub max_pids: u32,
    pub max_timeout_ms: u64,
    pub max_output_limit_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct ExecutionProfile {
    pub language: Language,
    pub image: String,
    pub seccomp: SeccompProfile,
    pub container: ContainerFlags,
    pub ceilings: ResourceCeilings,
}

impl ExecutionProfile {
    pub fn builtin(language: Language, image: impl Into<String>, tmpfs_size_mb: u64) -> Self {
        Self {
            language,
            image: image.into(),
            seccomp: SeccompProfile::hardened(language.extra_syscalls()),
            container: ContainerFlags::hardened(tmpfs_size_mb),
            ceilings: language.ceilings(),
        }
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        self.seccomp.validate(self.language)?;
        self.container.validate(self.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_deny_every_blocked_syscall() {
        for language in Language::ALL {
            let profile = ExecutionProfile::builtin(language, language.default_image(), 64);
            let denied = profile.seccomp.denied();
            for syscall in BLOCKED_SYSCALLS {
                assert!(denied.contains(syscall), "{language} does not deny {syscall}");
            }
            assert!(profile.validate().is_ok());
        }
    }

    #[test]
    fn test_blocked_syscalls_never_allowed() {
        let profile = SeccompProfile::hardened(&["ptrace", "mount", "read"]);
        let allowed = profile.allowed();
        assert!(allowed.contains("read"));
        assert!(!allowed.contains("ptrace"));
        assert!(!allowed.contains("mount"));
    }

    #[test]
    fn test_blocked_list_has_no_duplicates() {
        let unique: BTreeSet<_> = BLOCKED_SYSCALLS.iter().collect();
        assert_eq!(unique.len(), 26);
    }

    #[test]
    fn test_validate_rejects_permissive_default() {
        let mut profile = SeccompProfile::hardened(&[]);
        profile.default_action = SeccompAction::Allow;
        assert!(matches!(
            profile.validate(Language::Python),
            Err(ProfileError::PermissiveDefault { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_deny() {
        let mut profile = SeccompProfile::hardened(&[]);
        profile.syscalls[1].names.retain(|name| name != "kexec_load");
        assert!(matches!(
            profile.validate(Language::Java),
            Err(ProfileError::MissingDeny { syscall, .. }) if syscall == "kexec_load"
        ));
    }

    #[test]
    fn test_validate_rejects_allowed_blocked_syscall() {
        let mut profile = SeccompProfile::hardened(&[]);
        profile.syscalls[0].names.push("reboot".to_string());
        assert!(matches!(
            profile.validate(Language::JavaScript),
            Err(ProfileError::BlockedAllowed { syscall, .. }) if syscall == "reboot"
        ));
    }

    #[test]
    fn test_profile_json_uses_runtime_field_names() {
        let json = SeccompProfile::hardened(&[]).to_json().unwrap();
        assert!(json.contains("\"defaultAction\":\"SCMP_ACT_ERRNO\""));
        assert!(json.contains("\"architectures\""));
        assert!(json.contains("\"SCMP_ACT_ALLOW\""));

        let parsed: SeccompProfile = serde_json::from_str(&json).unwrap();
        assert!(parsed.validate(Language::Python).is_ok());
    }

    #[test]
    fn test_load_rejects_profile_file_without_blocked_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("python.json");
        std::fs::write(
            &path,
            r#"{"defaultAction":"SCMP_ACT_ERRNO","architectures":[],"syscalls":[{"names":["read"],"action":"SCMP_ACT_ALLOW"}]}"#,
        )
        .unwrap();

        let profile = SeccompProfile::load(&path).unwrap();
        assert!(matches!(
            profile.validate(Language::Python),
            Err(ProfileError::MissingDeny { .. })
        ));
    }

    #[test]
    fn test_container_flags_are_hardened() {
        let flags = ContainerFlags::hardened(64);
        assert_eq!(flags.network_mode, "none");
        assert_eq!(flags.tmpfs_options(), "rw,nosuid,nodev,noexec,size=64m");
        assert!(flags.validate(Language::Python).is_ok());

        let mut root = flags.clone();
        root.user = "0:0".to_string();
        assert!(root.validate(Language::Python).is_err());

        let mut networked = flags;
        networked.network_mode = "bridge".to_string();
        assert!(networked.validate(Language::Python).is_err());
    }
}
