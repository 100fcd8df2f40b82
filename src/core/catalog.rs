use std::sync::Arc;

use crate::config::RunnerConfig;
use crate::core::languages::Language;
use crate::core::profile::{ExecutionProfile, ProfileError, SeccompProfile};

/// Validated execution profile for every supported language, resolved once
/// at startup.
#[derive(Clone, Debug)]
pub struct Catalog {
    python: Arc<ExecutionProfile>,
    javascript: Arc<ExecutionProfile>,
    java: Arc<ExecutionProfile>,
}

impl Catalog {
    pub fn from_config(config: &RunnerConfig) -> Result<Self, ProfileError> {
        let load = |language: Language| -> Result<Arc<ExecutionProfile>, ProfileError> {
            let mut profile =
                ExecutionProfile::builtin(language, config.image_for(language), config.tmpfs_size_mb);

            if let Some(dir) = &config.profile_dir {
                let path = dir.join(format!("{}.json", language.id()));
                if path.exists() {
                    tracing::info!(%language, path = %path.display(), "Loading syscall profile override");
                    profile.seccomp = SeccompProfile::load(&path)?;
                }
            }

            profile.validate()?;
            Ok(Arc::new(profile))
        };

        Ok(Self {
            python: load(Language::Python)?,
            javascript: load(Language::JavaScript)?,
            java: load(Language::Java)?,
        })
    }

    pub fn profile(&self, language: Language) -> &Arc<ExecutionProfile> {
        match language {
            Language::Python => &self.python,
            Language::JavaScript => &self.javascript,
            Language::Java => &self.java,
        }
    }
}
