use crate::constants::{INTERNAL_ERROR_MESSAGE, RESOURCE_ERROR_MESSAGE, TIMEOUT_ERROR_MESSAGE};
use crate::core::traits::sandbox::SandboxError;
use crate::core::traits::store::StoreError;

/// Ways a run can end in `error`. Candidate-code failures (compile errors,
/// wrong answers, crashes) are not failures here: they produce a normal
/// `failed` result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RunFailure {
    #[error("run exceeded its time limit")]
    Timeout,
    #[error("run was killed by the resource controller")]
    ResourceExceeded,
    #[error("infrastructure failure: {detail}")]
    Infrastructure { detail: String },
}

impl RunFailure {
    /// Text safe to show the submitter. Infrastructure detail stays in the
    /// server logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            RunFailure::Timeout => TIMEOUT_ERROR_MESSAGE,
            RunFailure::ResourceExceeded => RESOURCE_ERROR_MESSAGE,
            RunFailure::Infrastructure { .. } => INTERNAL_ERROR_MESSAGE,
        }
    }
}

impl From<SandboxError> for RunFailure {
    fn from(err: SandboxError) -> Self {
        RunFailure::Infrastructure {
            detail: err.to_string(),
        }
    }
}

impl From<StoreError> for RunFailure {
    fn from(err: StoreError) -> Self {
        RunFailure::Infrastructure {
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_detail_is_not_user_visible() {
        let failure: RunFailure = SandboxError::Provision {
            msg: "/var/lib/docker/overlay2 is full".to_string(),
        }
        .into();
        assert_eq!(failure.user_message(), "internal error");
        assert!(failure.to_string().contains("overlay2"));
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(RunFailure::Timeout.user_message(), "timeout");
    }
}
