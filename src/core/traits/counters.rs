use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionCeilings {
    pub per_minute: u32,
    pub per_day: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow,
    RateLimited { retry_after: Duration },
    QuotaExceeded { resets_at: DateTime<Utc> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub minute_count: u32,
    pub day_count: u32,
    pub resets_at: DateTime<Utc>,
}

/// Per-user rate window and daily usage counter.
///
/// `try_reserve` is one atomic unit per user: both ceilings are checked and
/// both counters incremented (or neither) without another reservation for
/// the same user interleaving, like a single-row transactional update.
/// The rate window is checked before the daily quota.
#[mockall::automock]
#[async_trait::async_trait]
pub trait UsageCounters: std::fmt::Debug + Send + Sync {
    async fn try_reserve(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        ceilings: AdmissionCeilings,
    ) -> AdmissionDecision;

    async fn usage(&self, user_id: &str, now: DateTime<Utc>) -> UsageSnapshot;
}
