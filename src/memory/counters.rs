use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use dashmap::DashMap;

use crate::core::traits::counters::{
    AdmissionCeilings, AdmissionDecision, UsageCounters, UsageSnapshot,
};

fn rate_window() -> TimeDelta {
    TimeDelta::seconds(60)
}

/// Reservations between two sweeps for idle users.
const SWEEP_INTERVAL: u64 = 1024;

#[derive(Debug)]
struct UserUsage {
    /// Admission times inside the sliding rate window, oldest first.
    recent: VecDeque<DateTime<Utc>>,
    day: NaiveDate,
    day_count: u32,
}

impl UserUsage {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            recent: VecDeque::new(),
            day: now.date_naive(),
            day_count: 0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        while self
            .recent
            .front()
            .is_some_and(|admitted| *admitted + rate_window() <= now)
        {
            self.recent.pop_front();
        }
        if now.date_naive() != self.day {
            self.day = now.date_naive();
            self.day_count = 0;
        }
    }

    /// Nothing in the rate window and nothing counted against today.
    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        let window_empty = self
            .recent
            .back()
            .is_none_or(|last| *last + rate_window() <= now);
        window_empty && (self.day_count == 0 || self.day != now.date_naive())
    }
}

/// Per-user counters in a `DashMap`. Each reservation holds the user's shard
/// entry for the whole check-and-increment, so concurrent reservations for
/// one user are serialized.
///
/// Users that hold no usage are dropped every `SWEEP_INTERVAL` reservations.
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    users: DashMap<String, UserUsage>,
    reservations: AtomicU64,
}

impl InMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every user whose counters would read as zero at `now`.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.users.len();
        self.users.retain(|_, usage| !usage.is_idle(now));
        let evicted = before.saturating_sub(self.users.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle usage counters");
        }
        evicted
    }

    fn reserve(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        ceilings: AdmissionCeilings,
    ) -> AdmissionDecision {
        let mut usage = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserUsage::new(now));
        usage.roll(now);

        if usage.recent.len() >= ceilings.per_minute as usize {
            let frees_at = usage
                .recent
                .front()
                .map_or(now + rate_window(), |oldest| *oldest + rate_window());
            return AdmissionDecision::RateLimited {
                retry_after: (frees_at - now).to_std().unwrap_or(Duration::ZERO),
            };
        }

        if usage.day_count >= ceilings.per_day {
            return AdmissionDecision::QuotaExceeded {
                resets_at: next_reset(now),
            };
        }

        usage.recent.push_back(now);
        usage.day_count += 1;
        AdmissionDecision::Allow
    }
}

/// Daily quotas reset at midnight UTC.
fn next_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    (now.date_naive() + Days::new(1))
        .and_time(NaiveTime::MIN)
        .and_utc()
}

#[async_trait::async_trait]
impl UsageCounters for InMemoryCounters {
    async fn try_reserve(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        ceilings: AdmissionCeilings,
    ) -> AdmissionDecision {
        let decision = self.reserve(user_id, now, ceilings);
        // The user's entry guard is released by now; `retain` locks every shard.
        if self.reservations.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.evict_idle(now);
        }
        decision
    }

    async fn usage(&self, user_id: &str, now: DateTime<Utc>) -> UsageSnapshot {
        let resets_at = next_reset(now);
        let Some(usage) = self.users.get(user_id) else {
            return UsageSnapshot {
                minute_count: 0,
                day_count: 0,
                resets_at,
            };
        };

        UsageSnapshot {
            minute_count: usage
                .recent
                .iter()
                .filter(|admitted| **admitted + rate_window() > now)
                .count() as u32,
            day_count: if usage.day == now.date_naive() {
                usage.day_count
            } else {
                0
            },
            resets_at,
        }
    }
}
