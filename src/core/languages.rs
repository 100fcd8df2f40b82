use std::fmt;

use crate::constants::{TMP_DIR, WORKSPACE_DIR};
use crate::core::profile::ResourceCeilings;

/// Supported toolchains. Adding a language means adding a variant here and
/// the compiler points out every match that needs a new arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    Python,
    JavaScript,
    Java,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Python, Language::JavaScript, Language::Java];

    pub fn id(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
        }
    }

    pub fn default_image(&self) -> &'static str {
        match self {
            Language::Python => "python:3.12-slim",
            Language::JavaScript => "node:20-slim",
            Language::Java => "eclipse-temurin:21-jdk",
        }
    }

    /// File name used for single-file submissions and as the default entry
    /// point of a project.
    pub fn default_entry_point(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::JavaScript => "main.js",
            Language::Java => "Main.java",
        }
    }

    fn source_extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py"],
            Language::JavaScript => &["js", "mjs", "cjs"],
            Language::Java => &["java"],
        }
    }

    pub fn is_source(&self, path: &str) -> bool {
        path.rsplit_once('.')
            .is_some_and(|(_, ext)| self.source_extensions().contains(&ext))
    }

    /// Syscalls the runtime needs on top of the shared allow set.
    pub fn extra_syscalls(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &[],
            Language::JavaScript => &["io_uring_setup", "io_uring_enter", "io_uring_register"],
            Language::Java => &["sched_setaffinity", "membarrier", "mbind", "get_mempolicy"],
        }
    }

    pub fn ceilings(&self) -> ResourceCeilings {
        match self {
            Language::Java => ResourceCeilings {
                max_cpu: 2.0,
                max_memory_mb: 1024,
                max_pids: 256,
                max_timeout_ms: 60_000,
                max_output_limit_bytes: 1024 * 1024,
            },
            Language::Python | Language::JavaScript => ResourceCeilings {
                max_cpu: 2.0,
                max_memory_mb: 512,
                max_pids: 128,
                max_timeout_ms: 30_000,
                max_output_limit_bytes: 1024 * 1024,
            },
        }
    }

    pub fn env(&self) -> Vec<String> {
        let mut env = vec![format!("HOME={TMP_DIR}"), "LANG=C.UTF-8".to_string()];
        match self {
            Language::Python => {
                env.push("PYTHONDONTWRITEBYTECODE=1".to_string());
                env.push(format!("PYTHONPYCACHEPREFIX={TMP_DIR}/pycache"));
                env.push("PYTHONUNBUFFERED=1".to_string());
            }
            Language::JavaScript => env.push("NODE_OPTIONS=--max-old-space-size=192".to_string()),
            Language::Java => {}
        }
        env
    }

    /// Command that validates or compiles the sources. Interpreted languages
    /// get a syntax check. Paths are relative to the workspace.
    pub fn compile_command(&self, sources: &[&str]) -> Vec<String> {
        let mut argv = match self {
            Language::Python => vec!["python3".to_string(), "-m".to_string(), "py_compile".to_string()],
            Language::JavaScript => vec![
                "sh".to_string(),
                "-c".to_string(),
                "for f; do node --check \"$f\" || exit 1; done".to_string(),
                "node-check".to_string(),
            ],
            Language::Java => vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("mkdir -p {TMP_DIR}/classes && exec javac -d {TMP_DIR}/classes \"$@\""),
                "javac".to_string(),
            ],
        };
        argv.extend(sources.iter().map(|s| s.to_string()));
        argv
    }

    pub fn run_command(&self, entry_point: &str) -> Vec<String> {
        match self {
            Language::Python => vec![
                "python3".to_string(),
                format!("{WORKSPACE_DIR}/{entry_point}"),
            ],
            Language::JavaScript => vec!["node".to_string(), format!("{WORKSPACE_DIR}/{entry_point}")],
            Language::Java => vec![
                "java".to_string(),
                "-XX:-UsePerfData".to_string(),
                "-XX:+UseSerialGC".to_string(),
                "-XX:TieredStopAtLevel=1".to_string(),
                "-cp".to_string(),
                format!("{TMP_DIR}/classes"),
                java_main_class(entry_point),
            ],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// `com/example/Main.java` -> `com.example.Main`
fn java_main_class(entry_point: &str) -> String {
    entry_point
        .strip_suffix(".java")
        .unwrap_or(entry_point)
        .replace('/', ".")
}
