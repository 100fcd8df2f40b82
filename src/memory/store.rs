use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::domain::{ExecutionLogEntry, Submission, SubmissionStatus, TerminalRecord};
use crate::core::traits::store::{ExecutionLog, NewSubmission, StoreError, SubmissionStore};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    submissions: DashMap<Uuid, Submission>,
    log: Mutex<Vec<ExecutionLogEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<Submission> {
        self.submissions.get(&id).map(|entry| entry.clone())
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.len()
    }

    pub async fn log_entries(&self) -> Vec<ExecutionLogEntry> {
        self.log.lock().await.clone()
    }

    fn transition(
        &self,
        id: Uuid,
        next: SubmissionStatus,
        update: impl FnOnce(&mut Submission),
    ) -> Result<(), StoreError> {
        let mut submission = self
            .submissions
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;

        if !submission.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                id,
                from: format!("{:?}", submission.status),
                to: format!("{next:?}"),
            });
        }

        submission.status = next;
        submission.updated_at = Utc::now();
        update(&mut *submission);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubmissionStore for InMemoryStore {
    async fn create(&self, new: NewSubmission) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.submissions.insert(
            id,
            Submission {
                id,
                user_id: new.user_id,
                target: new.target,
                language: new.language,
                status: SubmissionStatus::Queued,
                result: None,
                error_message: None,
                created_at: now,
                updated_at: now,
            },
        );
        tracing::debug!(submission_id = %id, "Submission created");
        Ok(id)
    }

    async fn mark_running(&self, id: Uuid) -> Result<(), StoreError> {
        self.transition(id, SubmissionStatus::Running, |_| {})
    }

    async fn finish(&self, id: Uuid, record: TerminalRecord) -> Result<(), StoreError> {
        if !record.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id,
                from: "any".to_string(),
                to: format!("{:?}", record.status),
            });
        }
        self.transition(id, record.status, |submission| {
            submission.result = record.result;
            submission.error_message = record.error_message;
        })
    }
}

#[async_trait::async_trait]
impl ExecutionLog for InMemoryStore {
    async fn append(&self, entry: ExecutionLogEntry) -> Result<(), StoreError> {
        self.log.lock().await.push(entry);
        Ok(())
    }
}
