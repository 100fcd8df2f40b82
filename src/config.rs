use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::domain::RunLimits;
use crate::core::languages::Language;
use crate::core::traits::counters::AdmissionCeilings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub listen_addr: SocketAddr,
    pub pool_size: usize,
    pub slot_wait: Duration,
    pub admission: AdmissionCeilings,
    pub default_limits: RunLimits,
    pub compile_timeout: Duration,
    pub tmpfs_size_mb: u64,
    pub provision_backoff: Duration,
    pub workspace_root: PathBuf,
    pub profile_dir: Option<PathBuf>,
    pub images: BTreeMap<Language, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 1], 50051)),
            pool_size: std::thread::available_parallelism().map_or(2, |n| n.get()),
            slot_wait: Duration::from_secs(30),
            admission: AdmissionCeilings {
                per_minute: 10,
                per_day: 200,
            },
            default_limits: RunLimits {
                cpu: 1.0,
                memory_mb: 256,
                timeout_ms: 5000,
                output_limit_bytes: 64 * 1024,
                pids: 64,
            },
            compile_timeout: Duration::from_secs(20),
            tmpfs_size_mb: 64,
            provision_backoff: Duration::from_millis(250),
            workspace_root: std::env::temp_dir().join("sandbox-runner"),
            profile_dir: None,
            images: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let limits = defaults.default_limits;

        let mut images = BTreeMap::new();
        for language in Language::ALL {
            let key = format!("RUNNER_IMAGE_{}", language.id().to_uppercase());
            if let Some(image) = lookup(&key).filter(|image| !image.trim().is_empty()) {
                images.insert(language, image);
            }
        }

        let config = Self {
            listen_addr: parse(&lookup, "RUNNER_LISTEN_ADDR", defaults.listen_addr)?,
            pool_size: parse(&lookup, "RUNNER_POOL_SIZE", defaults.pool_size)?,
            slot_wait: millis(&lookup, "RUNNER_SLOT_WAIT_MS", defaults.slot_wait)?,
            admission: AdmissionCeilings {
                per_minute: parse(&lookup, "RUNNER_RATE_PER_MINUTE", defaults.admission.per_minute)?,
                per_day: parse(&lookup, "RUNNER_DAILY_QUOTA", defaults.admission.per_day)?,
            },
            default_limits: RunLimits {
                cpu: parse(&lookup, "RUNNER_DEFAULT_CPU", limits.cpu)?,
                memory_mb: parse(&lookup, "RUNNER_DEFAULT_MEMORY_MB", limits.memory_mb)?,
                timeout_ms: parse(&lookup, "RUNNER_DEFAULT_TIMEOUT_MS", limits.timeout_ms)?,
                output_limit_bytes: parse(
                    &lookup,
                    "RUNNER_DEFAULT_OUTPUT_LIMIT_BYTES",
                    limits.output_limit_bytes,
                )?,
                pids: parse(&lookup, "RUNNER_DEFAULT_PIDS", limits.pids)?,
            },
            compile_timeout: millis(&lookup, "RUNNER_COMPILE_TIMEOUT_MS", defaults.compile_timeout)?,
            tmpfs_size_mb: parse(&lookup, "RUNNER_TMPFS_SIZE_MB", defaults.tmpfs_size_mb)?,
            provision_backoff: millis(
                &lookup,
                "RUNNER_PROVISION_BACKOFF_MS",
                defaults.provision_backoff,
            )?,
            workspace_root: lookup("RUNNER_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            profile_dir: lookup("RUNNER_PROFILE_DIR").map(PathBuf::from),
            images,
        };
        config.check()?;
        Ok(config)
    }

    pub fn image_for(&self, language: Language) -> &str {
        self.images
            .get(&language)
            .map(String::as_str)
            .unwrap_or(language.default_image())
    }

    fn check(&self) -> Result<(), ConfigError> {
        let positive = |key: &str, value: String, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    key: key.to_string(),
                    value,
                    reason: "must be positive".to_string(),
                })
            }
        };
        positive("RUNNER_POOL_SIZE", self.pool_size.to_string(), self.pool_size > 0)?;
        positive(
            "RUNNER_DEFAULT_CPU",
            self.default_limits.cpu.to_string(),
            self.default_limits.cpu.is_finite() && self.default_limits.cpu > 0.0,
        )?;
        positive(
            "RUNNER_DEFAULT_TIMEOUT_MS",
            self.default_limits.timeout_ms.to_string(),
            self.default_limits.timeout_ms > 0,
        )?;
        positive(
            "RUNNER_TMPFS_SIZE_MB",
            self.tmpfs_size_mb.to_string(),
            self.tmpfs_size_mb > 0,
        )
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            value,
            reason: e.to_string(),
        }),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let ms = parse(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}
