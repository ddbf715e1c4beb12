//! Daily usage-quota enforcement for effectively-free users.
//!
//! Active trial, lite, and pro plans bypass quota entirely. Everyone else is
//! limited to a fixed number of each rate-limited action per calendar day,
//! where the day boundary is computed in a fixed reference timezone chosen at
//! construction.
//!
//! The cap is race-free by construction: each consumption performs a single
//! atomic increment-and-read against the usage store, and only post-increment
//! values at or below the cap are reported allowed. Because concurrent
//! increments each observe a distinct value, at most `max_per_day` calls can
//! ever succeed for one `(user, action, day)` no matter how many race. A
//! rejected increment is compensated so the counter stays meaningful for
//! status reporting.
//!
//! # Tracing Events
//!
//! - `quota.denied` - Consumption rejected because the daily cap was reached

use crate::error::{Result, StudygateError};
use crate::plan::ActionType;
use crate::resolver::resolve;
use crate::store::{DayKey, EntitlementStore, UsageStore};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default daily cap for each rate-limited action on the free tier.
const DEFAULT_MAX_PER_DAY: u32 = 3;

/// Quota configuration: per-action daily caps and the reference timezone
/// that defines the day boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Daily cap for practice sessions.
    pub practice_per_day: u32,
    /// Daily cap for mock exams.
    pub exam_per_day: u32,
    /// Fixed offset in which calendar days are bucketed. Every instance of
    /// the service must use the same offset or day keys will disagree.
    pub reference_offset: FixedOffset,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            practice_per_day: DEFAULT_MAX_PER_DAY,
            exam_per_day: DEFAULT_MAX_PER_DAY,
            reference_offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
        }
    }
}

impl QuotaPolicy {
    /// Create a policy with default caps (3 per action per day, UTC days).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the daily practice cap.
    #[must_use]
    pub fn practice_per_day(mut self, cap: u32) -> Self {
        self.practice_per_day = cap;
        self
    }

    /// Set the daily exam cap.
    #[must_use]
    pub fn exam_per_day(mut self, cap: u32) -> Self {
        self.exam_per_day = cap;
        self
    }

    /// Set the reference timezone offset for day bucketing.
    #[must_use]
    pub fn reference_offset(mut self, offset: FixedOffset) -> Self {
        self.reference_offset = offset;
        self
    }

    /// The daily cap for a given action.
    #[must_use]
    pub fn max_per_day(&self, action: ActionType) -> u32 {
        match action {
            ActionType::Practice => self.practice_per_day,
            ActionType::Exam => self.exam_per_day,
        }
    }

    /// The calendar-day bucket for an instant, in the reference timezone.
    #[must_use]
    pub fn day_key(&self, now: DateTime<Utc>) -> DayKey {
        now.with_timezone(&self.reference_offset).date_naive()
    }
}

/// Outcome of a quota consumption or peek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    /// Whether the action may proceed.
    pub allowed: bool,
    /// Slots left today after this call. `None` means unlimited (the user
    /// holds an active plan and quota does not apply).
    pub remaining: Option<u32>,
}

impl QuotaDecision {
    /// Decision for users whose plan exempts them from quota.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: None,
        }
    }

    /// Whether this decision was subject to metering at all.
    #[must_use]
    pub fn is_metered(&self) -> bool {
        self.remaining.is_some()
    }
}

/// Atomically checks and consumes units of rate-limited actions.
pub struct QuotaEnforcer<E, U> {
    entitlements: Arc<E>,
    usage: Arc<U>,
    policy: QuotaPolicy,
}

impl<E: EntitlementStore, U: UsageStore> QuotaEnforcer<E, U> {
    /// Create an enforcer over shared store handles.
    pub fn new(entitlements: Arc<E>, usage: Arc<U>, policy: QuotaPolicy) -> Self {
        Self {
            entitlements,
            usage,
            policy,
        }
    }

    /// Consume one unit of `action` for `user_id` at instant `now`.
    ///
    /// Users with an active plan always get `allowed = true` with unlimited
    /// remaining. Quota-subject users get one atomic increment; if the
    /// post-increment value exceeds the cap, the call is denied and the
    /// increment compensated. Under concurrent calls for the same
    /// `(user, action, day)`, at most `max_per_day` are ever allowed.
    pub async fn consume(
        &self,
        user_id: &str,
        action: ActionType,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision> {
        let record = self
            .entitlements
            .get(user_id)
            .await?
            .ok_or_else(|| StudygateError::not_found(format!("user {}", user_id)))?;

        if resolve(&record, now).active {
            return Ok(QuotaDecision::unlimited());
        }

        let day = self.policy.day_key(now);
        let cap = self.policy.max_per_day(action);
        let count = self.usage.increment(user_id, action, day).await?;

        if count > u64::from(cap) {
            self.usage.decrement(user_id, action, day).await?;
            tracing::debug!(
                target: "quota.denied",
                user_id = %user_id,
                action = %action,
                day = %day,
                cap = cap,
                "Daily quota exhausted"
            );
            return Ok(QuotaDecision {
                allowed: false,
                remaining: Some(0),
            });
        }

        Ok(QuotaDecision {
            allowed: true,
            remaining: Some(cap - count as u32),
        })
    }

    /// Read-only view of today's remaining quota, without consuming.
    ///
    /// `None` means quota does not apply to this user right now.
    pub async fn remaining(
        &self,
        user_id: &str,
        action: ActionType,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let record = self
            .entitlements
            .get(user_id)
            .await?
            .ok_or_else(|| StudygateError::not_found(format!("user {}", user_id)))?;

        if resolve(&record, now).active {
            return Ok(None);
        }

        let day = self.policy.day_key(now);
        let cap = self.policy.max_per_day(action);
        let used = self.usage.current(user_id, action, day).await?;
        Ok(Some(u64::from(cap).saturating_sub(used) as u32))
    }

    /// The policy in force.
    #[must_use]
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{EntitlementRecord, Tier};
    use crate::store::{InMemoryEntitlementStore, InMemoryUsageStore};
    use chrono::{Duration, TimeZone};

    async fn setup_free_user(user_id: &str) -> (Arc<InMemoryEntitlementStore>, Arc<InMemoryUsageStore>) {
        let entitlements = Arc::new(InMemoryEntitlementStore::new());
        entitlements.insert_user(user_id).await;
        (entitlements, Arc::new(InMemoryUsageStore::new()))
    }

    #[test]
    fn test_policy_defaults() {
        let policy = QuotaPolicy::new();
        assert_eq!(policy.max_per_day(ActionType::Practice), 3);
        assert_eq!(policy.max_per_day(ActionType::Exam), 3);
        assert_eq!(policy.reference_offset.local_minus_utc(), 0);
    }

    #[test]
    fn test_policy_builder() {
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        let policy = QuotaPolicy::new()
            .practice_per_day(5)
            .exam_per_day(1)
            .reference_offset(kst);
        assert_eq!(policy.max_per_day(ActionType::Practice), 5);
        assert_eq!(policy.max_per_day(ActionType::Exam), 1);
        assert_eq!(policy.reference_offset, kst);
    }

    #[test]
    fn test_day_key_respects_reference_offset() {
        // 2025-06-01 23:30 UTC is already 2025-06-02 in UTC+9.
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 23, 30, 0).unwrap();

        let utc_policy = QuotaPolicy::new();
        assert_eq!(utc_policy.day_key(now).to_string(), "2025-06-01");

        let kst_policy =
            QuotaPolicy::new().reference_offset(FixedOffset::east_opt(9 * 3600).unwrap());
        assert_eq!(kst_policy.day_key(now).to_string(), "2025-06-02");
    }

    #[tokio::test]
    async fn test_free_user_quota_ladder() {
        let (entitlements, usage) = setup_free_user("u-1").await;
        let enforcer = QuotaEnforcer::new(entitlements, usage, QuotaPolicy::new());
        let now = Utc::now();

        for expected_remaining in [2, 1, 0] {
            let decision = enforcer.consume("u-1", ActionType::Practice, now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, Some(expected_remaining));
        }

        let denied = enforcer.consume("u-1", ActionType::Practice, now).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, Some(0));
    }

    #[tokio::test]
    async fn test_actions_metered_independently() {
        let (entitlements, usage) = setup_free_user("u-1").await;
        let enforcer = QuotaEnforcer::new(entitlements, usage, QuotaPolicy::new());
        let now = Utc::now();

        for _ in 0..3 {
            assert!(enforcer.consume("u-1", ActionType::Practice, now).await.unwrap().allowed);
        }
        assert!(!enforcer.consume("u-1", ActionType::Practice, now).await.unwrap().allowed);

        // Exam quota is untouched by practice consumption.
        let exam = enforcer.consume("u-1", ActionType::Exam, now).await.unwrap();
        assert!(exam.allowed);
        assert_eq!(exam.remaining, Some(2));
    }

    #[tokio::test]
    async fn test_active_plan_bypasses_quota() {
        let entitlements = Arc::new(InMemoryEntitlementStore::new());
        let now = Utc::now();
        entitlements
            .seed(
                "u-1",
                EntitlementRecord::free().with_period(Tier::Trial, now, now + Duration::days(3)),
            )
            .await;
        let usage = Arc::new(InMemoryUsageStore::new());
        let enforcer = QuotaEnforcer::new(entitlements, Arc::clone(&usage), QuotaPolicy::new());

        for _ in 0..10 {
            let decision = enforcer.consume("u-1", ActionType::Practice, now).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, None);
            assert!(!decision.is_metered());
        }

        // No counter was touched for an exempt user.
        assert_eq!(usage.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_plan_is_quota_subject() {
        let entitlements = Arc::new(InMemoryEntitlementStore::new());
        let now = Utc::now();
        entitlements
            .seed(
                "u-1",
                EntitlementRecord::free().with_period(
                    Tier::Pro,
                    now - Duration::days(40),
                    now - Duration::days(10),
                ),
            )
            .await;
        let usage = Arc::new(InMemoryUsageStore::new());
        let enforcer = QuotaEnforcer::new(entitlements, usage, QuotaPolicy::new());

        let decision = enforcer.consume("u-1", ActionType::Exam, now).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Some(2));
    }

    #[tokio::test]
    async fn test_quota_resets_at_day_rollover() {
        let (entitlements, usage) = setup_free_user("u-1").await;
        let enforcer = QuotaEnforcer::new(entitlements, usage, QuotaPolicy::new());
        let day_d = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

        for minutes in [0, 5, 10] {
            let at = day_d + Duration::minutes(minutes);
            assert!(enforcer.consume("u-1", ActionType::Practice, at).await.unwrap().allowed);
        }
        assert!(!enforcer
            .consume("u-1", ActionType::Practice, day_d + Duration::minutes(15))
            .await
            .unwrap()
            .allowed);

        // Midnight of the next day: fresh counter.
        let next_day = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
        let decision = enforcer.consume("u-1", ActionType::Practice, next_day).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Some(2));
    }

    #[tokio::test]
    async fn test_denied_call_does_not_consume_a_slot() {
        let (entitlements, usage) = setup_free_user("u-1").await;
        let enforcer = QuotaEnforcer::new(entitlements, Arc::clone(&usage), QuotaPolicy::new());
        let now = Utc::now();
        let day = enforcer.policy().day_key(now);

        for _ in 0..3 {
            enforcer.consume("u-1", ActionType::Practice, now).await.unwrap();
        }
        for _ in 0..5 {
            enforcer.consume("u-1", ActionType::Practice, now).await.unwrap();
        }

        // Denied calls were compensated: the counter sits exactly at the cap.
        assert_eq!(usage.current("u-1", ActionType::Practice, day).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_consumption_never_overcounts() {
        let (entitlements, usage) = setup_free_user("u-1").await;
        let enforcer = Arc::new(QuotaEnforcer::new(entitlements, usage, QuotaPolicy::new()));
        let now = Utc::now();

        let mut handles = vec![];
        for _ in 0..16 {
            let enforcer = Arc::clone(&enforcer);
            handles.push(tokio::spawn(async move {
                enforcer.consume("u-1", ActionType::Exam, now).await.unwrap()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3, "exactly the cap may succeed under concurrency");
    }

    #[tokio::test]
    async fn test_remaining_peek_does_not_consume() {
        let (entitlements, usage) = setup_free_user("u-1").await;
        let enforcer = QuotaEnforcer::new(entitlements, usage, QuotaPolicy::new());
        let now = Utc::now();

        assert_eq!(enforcer.remaining("u-1", ActionType::Practice, now).await.unwrap(), Some(3));
        assert_eq!(enforcer.remaining("u-1", ActionType::Practice, now).await.unwrap(), Some(3));

        enforcer.consume("u-1", ActionType::Practice, now).await.unwrap();
        assert_eq!(enforcer.remaining("u-1", ActionType::Practice, now).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let entitlements = Arc::new(InMemoryEntitlementStore::new());
        let usage = Arc::new(InMemoryUsageStore::new());
        let enforcer = QuotaEnforcer::new(entitlements, usage, QuotaPolicy::new());

        let err = enforcer
            .consume("ghost", ActionType::Practice, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StudygateError::NotFound(_)));
    }
}
