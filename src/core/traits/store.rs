use uuid::Uuid;

use crate::core::domain::{ExecutionLogEntry, RunTarget, TerminalRecord};
use crate::core::languages::Language;

#[derive(Clone, Debug)]
pub struct NewSubmission {
    pub user_id: String,
    pub target: RunTarget,
    pub language: Language,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    #[error("submission {id} not found")]
    NotFound { id: Uuid },
    #[error("submission {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },
    #[error("storage unavailable: {msg}")]
    Unavailable { msg: String },
}

/// Persistence of submissions. Implementations must refuse any transition
/// that is not queued -> running -> terminal, so a terminal state is written
/// at most once.
#[mockall::automock]
#[async_trait::async_trait]
pub trait SubmissionStore: std::fmt::Debug + Send + Sync {
    async fn create(&self, submission: NewSubmission) -> Result<Uuid, StoreError>;

    async fn mark_running(&self, id: Uuid) -> Result<(), StoreError>;

    async fn finish(&self, id: Uuid, record: TerminalRecord) -> Result<(), StoreError>;
}

/// Append-only audit trail of run attempts.
#[mockall::automock]
#[async_trait::async_trait]
pub trait ExecutionLog: std::fmt::Debug + Send + Sync {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), StoreError>;
}
