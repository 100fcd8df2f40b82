use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::traits::counters::{
    AdmissionCeilings, AdmissionDecision, UsageCounters, UsageSnapshot,
};

/// Rejects over-limit requests before any sandbox work is done.
#[derive(Clone, Debug)]
pub struct AdmissionController {
    counters: Arc<dyn UsageCounters>,
    ceilings: AdmissionCeilings,
}

impl AdmissionController {
    pub fn new(counters: Arc<dyn UsageCounters>, ceilings: AdmissionCeilings) -> Self {
        Self { counters, ceilings }
    }

    pub fn ceilings(&self) -> AdmissionCeilings {
        self.ceilings
    }

    pub async fn admit(&self, user_id: &str) -> AdmissionDecision {
        self.admit_at(user_id, Utc::now()).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn admit_at(&self, user_id: &str, now: DateTime<Utc>) -> AdmissionDecision {
        let decision = self.counters.try_reserve(user_id, now, self.ceilings).await;
        match &decision {
            AdmissionDecision::Allow => tracing::debug!("Admitted"),
            AdmissionDecision::RateLimited { retry_after } => {
                tracing::info!(?retry_after, "Rate limited")
            }
            AdmissionDecision::QuotaExceeded { resets_at } => {
                tracing::info!(%resets_at, "Daily quota exceeded")
            }
        }
        decision
    }

    pub async fn usage(&self, user_id: &str) -> UsageSnapshot {
        self.counters.usage(user_id, Utc::now()).await
    }
}
